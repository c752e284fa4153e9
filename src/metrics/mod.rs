//! 指标类型与指标包
//!
//! - **mod**: MetricValue / MetricResult（一次评分的命名指标集合）
//! - **pack**: Scorer 能力接口、规则评分器、MetricPack 组合与按名注册表
//! - **judge**: LLM 裁判评分器（带降级：失败记 judge_unavailable，不中断批次）

pub mod judge;
pub mod pack;

pub use judge::JudgeScorer;
pub use pack::{build_pack, ExpectedKeywordsScorer, MetricPack, Scorer, TaskSuccessScorer};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 单个指标值：数值或布尔
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Bool(bool),
    Number(f64),
}

impl MetricValue {
    /// 数值视角：布尔按 1.0 / 0.0 折算
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            MetricValue::Number(n) => *n,
        }
    }

    /// 真值视角：数值按 >= threshold 判定
    pub fn is_truthy(&self, threshold: f64) -> bool {
        match self {
            MetricValue::Bool(b) => *b,
            MetricValue::Number(n) => *n >= threshold,
        }
    }
}

/// 一次 (用例, 响应) 评分的全部指标：指标名 -> 值，外加裁判的可选理由
///
/// 落盘形态是平铺的 JSON 对象（rationale 与指标同级），与追踪行里的
/// `metrics` 字段一一对应。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    #[serde(flatten)]
    pub values: BTreeMap<String, MetricValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl MetricResult {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.rationale.is_none()
    }

    pub fn set(&mut self, name: impl Into<String>, value: MetricValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<MetricValue> {
        self.values.get(name).copied()
    }

    /// 合并另一组指标；同名后写覆盖，理由拼接
    pub fn merge(&mut self, other: MetricResult) {
        self.values.extend(other.values);
        match (&mut self.rationale, other.rationale) {
            (Some(mine), Some(theirs)) => {
                mine.push_str("; ");
                mine.push_str(&theirs);
            }
            (mine @ None, theirs @ Some(_)) => *mine = theirs,
            _ => {}
        }
    }
}
