//! ChangeSet：一次版本升级提案
//!
//! 配置补丁 + 新黄金用例 + 理由 + 元数据。两条不变量：
//! 1. config_patch 只能引用 AUT 声明的可变配置键（未知键丢弃并告警，不整体拒绝）；
//! 2. 新用例 id 不得与黄金集重复（重复丢弃）。
//! 校验把提案收敛成更小的合法 ChangeSet；全被滤掉时返回空 ChangeSet，
//! 空提案本身是合法可观察的结果（"没找到可行的改进"）。

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aut::TestCase;

/// 规划引擎的输出（落盘 / 展示形态：{config_patch, new_testcases, rationale, metadata}）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    /// 配置键 -> 新值（如 model、temperature、工具开关）
    #[serde(default)]
    pub config_patch: BTreeMap<String, Value>,
    /// 建议追加进黄金集的新用例
    #[serde(default)]
    pub new_testcases: Vec<TestCase>,
    #[serde(default)]
    pub rationale: String,
    /// 来源版本、参考阈值等
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl ChangeSet {
    /// 既无补丁也无新用例
    pub fn is_empty(&self) -> bool {
        self.config_patch.is_empty() && self.new_testcases.is_empty()
    }
}

/// 纯校验：(提案补丁, 声明的可变键) -> (通过的补丁, 被拒的键)
///
/// 与 Oracle 调用完全解耦，可单独测试。
pub fn validate_config_patch(
    proposed: BTreeMap<String, Value>,
    mutable_keys: &BTreeSet<String>,
) -> (BTreeMap<String, Value>, Vec<String>) {
    let mut accepted = BTreeMap::new();
    let mut rejected = Vec::new();
    for (key, value) in proposed {
        if mutable_keys.contains(&key) {
            accepted.insert(key, value);
        } else {
            rejected.push(key);
        }
    }
    (accepted, rejected)
}

/// 纯校验：新用例按 id 去重（对黄金集去重，也对提案内部去重）
///
/// 返回 (保留的用例, 被丢弃的 id)。
pub fn filter_new_testcases(
    proposed: Vec<TestCase>,
    existing_ids: &BTreeSet<String>,
) -> (Vec<TestCase>, Vec<String>) {
    let mut seen: BTreeSet<String> = existing_ids.clone();
    let mut kept = Vec::new();
    let mut dropped = Vec::new();
    for case in proposed {
        if seen.insert(case.id.clone()) {
            kept.push(case);
        } else {
            dropped.push(case.id);
        }
    }
    (kept, dropped)
}
