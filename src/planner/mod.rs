//! 规划引擎：历史 + 记忆 → 结构化改进提案
//!
//! - **changeset**: ChangeSet 类型与纯校验函数（配置补丁键、新用例去重）
//! - **prompts**: 失败报告 / 最佳实践块 / 规划 Prompt 的拼装
//! - **engine**: propose_changeset 编排（核心不自动应用提案，交由外部评审）

pub mod changeset;
pub mod engine;
pub mod prompts;

pub use changeset::{filter_new_testcases, validate_config_patch, ChangeSet};
pub use engine::PlannerEngine;
