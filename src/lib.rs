//! Apiary - 智能体应用评估与改进流水线
//!
//! 面向"按版本演进的智能体应用"（AUT）的评估基础设施：对每个版本跑黄金用例集、
//! 打指标、沉淀追踪历史，再由规划引擎依据历史与最佳实践提出下一版的结构化改进提案。
//! 核心只提议不执行：ChangeSet 交由外部评审后再生效。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **observability**: tracing 日志初始化
//! - **error**: 统一错误类型（PipelineError）
//! - **aut**: 被测应用边界（AutSpec 规格、AutClient 调用抽象、黄金用例集）
//! - **llm**: LLM Oracle 抽象与实现（OpenAI 兼容 / Mock），裁判与规划共用
//! - **store**: 追加写 JSONL 存储（追踪历史、最佳实践记忆）
//! - **metrics**: 指标值类型、规则评分器、LLM 裁判、指标包注册表
//! - **eval**: 评估引擎（并发跑黄金集、超时与取消、批内聚合）
//! - **aggregate**: 跨版本指标汇总与版本对比
//! - **planner**: 规划引擎（失败分析 → 经校验的 ChangeSet）

pub mod aggregate;
pub mod aut;
pub mod config;
pub mod error;
pub mod eval;
pub mod llm;
pub mod metrics;
pub mod observability;
pub mod planner;
pub mod store;

pub use error::PipelineError;
