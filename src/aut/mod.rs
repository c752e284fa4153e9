//! AUT（被测 Agent 应用）边界
//!
//! 流水线只通过两个口子接触 AUT：
//! - **client**: AutClient trait（run_once 一次调用）与响应 / 工具调用类型
//! - **spec**: AUT 规格（可变配置键、评估配置、黄金集位置）的加载与校验

pub mod client;
pub mod spec;

pub use client::{AutClient, AutResponse, MockAutClient, ToolCall};
pub use spec::{AutSpec, EvaluationConfig, JudgeConfig, TestCase, ToolSpec};
