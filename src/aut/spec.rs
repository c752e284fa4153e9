//! AUT 规格：一个 AUT + 版本对外声明的评估契约
//!
//! 包括：输入 / 输出 schema、工具列表、可变配置键集合、默认指标包、指标列表、
//! 裁判配置（模型 + rubric）、黄金用例集位置。缺少必填字段在加载时立即报错，
//! 绝不静默兜底。

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::PipelineError;

/// 黄金集中的一条测试用例
///
/// input 的 schema 由被测 AUT 决定；judge_question / expected_behavior 是
/// 给裁判与规则指标的可选提示。加载后不可变。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_behavior: Option<String>,
}

/// AUT 声明的一个工具
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub id: String,
    #[serde(default)]
    pub description: String,
}

/// 裁判配置：Oracle 模型名 + rubric 标识
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub model: String,
    pub rubric_id: String,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            rubric_id: "generic_quality_v1".to_string(),
        }
    }
}

/// 评估配置段
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// 指标包名（registry 按名查找，EvalEngine 不得硬编码）
    pub default_pack: String,
    /// 声明要计算的指标；为空表示包内指标全开
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub judge: JudgeConfig,
    /// 黄金用例集（JSONL，一行一条 TestCase）
    pub golden_path: PathBuf,
    /// 低于该分视为失败用例（聚合与规划共用）
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,
    /// 主指标名；未设置时优先 judge_score，否则 task_success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_metric: Option<String>,
}

fn default_failure_threshold() -> f64 {
    4.0
}

/// AUT 规格根
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutSpec {
    pub aut_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// 输入 / 输出 schema（流水线不解释，原样带给规划 Oracle）
    #[serde(default)]
    pub inputs: Value,
    #[serde(default)]
    pub outputs: Value,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    /// ChangeSet 的 config_patch 只允许引用这里声明的键
    #[serde(default)]
    pub mutable_config_keys: Vec<String>,
    pub evaluation: EvaluationConfig,
}

fn default_version() -> String {
    "v1".to_string()
}

impl AutSpec {
    /// 从 JSON 文件加载；必填字段缺失（aut_id、evaluation.default_pack、golden_path）即配置错误
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read AUT spec {}: {}", path.display(), e))
        })?;
        let mut spec: AutSpec = serde_json::from_str(&text).map_err(|e| {
            PipelineError::Config(format!("invalid AUT spec {}: {}", path.display(), e))
        })?;
        if spec.name.is_empty() {
            spec.name = spec.aut_id.clone();
        }
        Ok(spec)
    }

    /// 可变配置键集合（规划校验用）
    pub fn mutable_keys(&self) -> BTreeSet<String> {
        self.mutable_config_keys.iter().cloned().collect()
    }

    /// 加载黄金用例集（JSONL）
    ///
    /// 文件缺失是配置错误（黄金集由规格显式声明，不同于追踪存储的"缺失即为空"）；
    /// 个别坏行跳过并告警。
    pub fn load_golden(&self) -> Result<Vec<TestCase>, PipelineError> {
        let path = &self.evaluation.golden_path;
        let file = File::open(path).map_err(|e| {
            PipelineError::Config(format!(
                "golden set missing for {}: {}: {}",
                self.aut_id,
                path.display(),
                e
            ))
        })?;

        let mut cases = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!(path = %path.display(), line = lineno + 1, error = %e, "golden set read error, stopping");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TestCase>(&line) {
                Ok(case) => cases.push(case),
                Err(e) => {
                    warn!(path = %path.display(), line = lineno + 1, error = %e, "skipping malformed golden row");
                }
            }
        }
        Ok(cases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_spec(dir: &Path, golden: &Path) -> PathBuf {
        let spec_path = dir.join("demo.aut.json");
        let spec = serde_json::json!({
            "aut_id": "demo",
            "version": "v1",
            "mutable_config_keys": ["model", "temperature"],
            "evaluation": {
                "default_pack": "generic",
                "metrics": ["task_success", "judge_score_avg"],
                "judge": { "model": "gpt-4o-mini", "rubric_id": "demo_v1" },
                "golden_path": golden
            }
        });
        std::fs::write(&spec_path, serde_json::to_string_pretty(&spec).unwrap()).unwrap();
        spec_path
    }

    #[test]
    fn test_load_spec_and_golden() {
        let dir = tempfile::tempdir().unwrap();
        let golden_path = dir.path().join("golden.jsonl");
        let mut f = File::create(&golden_path).unwrap();
        writeln!(f, r#"{{"id": "1", "input": {{"q": "hello"}}}}"#).unwrap();
        writeln!(f, "not json").unwrap();
        writeln!(
            f,
            r#"{{"id": "2", "input": {{"q": "bye"}}, "expected_behavior": "says goodbye"}}"#
        )
        .unwrap();

        let spec_path = write_spec(dir.path(), &golden_path);
        let spec = AutSpec::load_from_file(&spec_path).unwrap();
        assert_eq!(spec.aut_id, "demo");
        assert_eq!(spec.name, "demo");
        assert_eq!(spec.evaluation.failure_threshold, 4.0);
        assert!(spec.mutable_keys().contains("temperature"));

        let cases = spec.load_golden().unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[1].expected_behavior.as_deref(), Some("says goodbye"));
    }

    #[test]
    fn test_missing_required_field_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.aut.json");
        std::fs::write(&path, r#"{"aut_id": "demo"}"#).unwrap();
        let err = AutSpec::load_from_file(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_missing_golden_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let spec_path = write_spec(dir.path(), &dir.path().join("nope.jsonl"));
        let spec = AutSpec::load_from_file(&spec_path).unwrap();
        assert!(matches!(
            spec.load_golden(),
            Err(PipelineError::Config(_))
        ));
    }
}
