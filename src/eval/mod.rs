//! 评估引擎
//!
//! - **engine**: run_pack 编排（AUT 调用 → 指标包 → 追踪落盘 → 聚合）
//! - **stats**: 均值与最近秩百分位（小样本下百分位口径必须固定）

pub mod engine;
pub mod stats;

pub use engine::{EvalEngine, EvalOptions, EvalRunResult, MetricStats};
pub use stats::{mean, percentile_nearest_rank};
