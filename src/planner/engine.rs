//! 规划引擎编排
//!
//! 读 base 版本的追踪历史与最佳实践记忆，请规划 Oracle 产出 ChangeSet，
//! 再按 AUT 声明的可变配置键与黄金集去重收敛成合法提案。Oracle 调用失败
//! （网络 / 解析）对本次调用是致命的——半截未经校验的提案比没有提案更糟，
//! 由调用方决定重试或放弃。

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::aggregate::MetricsAggregator;
use crate::aut::AutSpec;
use crate::error::PipelineError;
use crate::llm::{extract_json, LlmClient, Message};
use crate::planner::changeset::{filter_new_testcases, validate_config_patch, ChangeSet};
use crate::planner::prompts;
use crate::store::{BestPracticeEntry, BestPracticesMemory, TraceRecord, TraceStore};

/// 规划引擎
pub struct PlannerEngine {
    spec: AutSpec,
    traces: Arc<TraceStore>,
    memory: Arc<BestPracticesMemory>,
    oracle: Arc<dyn LlmClient>,
    /// 注入 Prompt 的最佳实践条数上限
    max_best_practices: usize,
    /// 失败报告单条输出截断长度
    report_truncate_chars: usize,
}

impl PlannerEngine {
    pub fn new(
        spec: AutSpec,
        traces: Arc<TraceStore>,
        memory: Arc<BestPracticesMemory>,
        oracle: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            spec,
            traces,
            memory,
            oracle,
            max_best_practices: 10,
            report_truncate_chars: 500,
        }
    }

    pub fn with_limits(mut self, max_best_practices: usize, report_truncate_chars: usize) -> Self {
        self.max_best_practices = max_best_practices;
        self.report_truncate_chars = report_truncate_chars;
        self
    }

    /// 为 base 版本提出一个经过校验的 ChangeSet（可能为空；空提案=没找到可行改进）
    pub async fn propose_changeset(
        &self,
        base_version: &str,
    ) -> Result<ChangeSet, PipelineError> {
        let threshold = self.spec.evaluation.failure_threshold;

        // 1) 历史：当前版本汇总 + 失败集
        let records: Vec<TraceRecord> = self
            .traces
            .load_for_version(&self.spec.aut_id, base_version)?
            .collect();
        let aggregator = MetricsAggregator::new(
            self.traces.clone(),
            self.spec.evaluation.primary_metric.clone(),
            threshold,
        );
        let summary = aggregator.summary_for(&self.spec.aut_id, base_version)?;
        let primary = crate::aggregate::resolve_primary_metric(
            self.spec.evaluation.primary_metric.as_deref(),
            &records,
        );

        let failing: Vec<TraceRecord> = records
            .iter()
            .filter(|r| {
                r.failed
                    || r.metrics
                        .get(&primary)
                        .map(|v| !v.is_truthy(threshold))
                        .unwrap_or(false)
            })
            .cloned()
            .collect();

        // 2) 记忆：按欠佳指标做关键词匹配，时间倒序截取
        let underperforming = self.underperforming_metrics(&records, threshold);
        let practices = self.select_practices(&underperforming)?;

        info!(
            aut = %self.spec.aut_id,
            version = base_version,
            failing = failing.len(),
            practices = practices.len(),
            "proposing changeset"
        );

        // 3) Prompt 上下文
        let report = prompts::failure_report(&failing, self.report_truncate_chars);
        let practices_block = prompts::best_practices_block(&practices);
        let prompt =
            prompts::planner_prompt(&self.spec, base_version, &summary, &report, &practices_block);

        // 4) 规划 Oracle：失败即致命，带上下文供重试
        let messages = [
            Message::system(prompts::PLANNER_SYSTEM_PROMPT),
            Message::user(prompt),
        ];
        let raw = self.oracle.complete(&messages).await.map_err(|e| {
            PipelineError::OracleCall {
                aut_id: self.spec.aut_id.clone(),
                version_id: base_version.to_string(),
                message: format!("oracle call failed: {}", e),
            }
        })?;

        let proposed: ChangeSet =
            serde_json::from_str(extract_json(&raw)).map_err(|e| PipelineError::OracleCall {
                aut_id: self.spec.aut_id.clone(),
                version_id: base_version.to_string(),
                message: format!(
                    "unparsable oracle response: {} (raw: {})",
                    e,
                    raw.chars().take(200).collect::<String>()
                ),
            })?;

        // 5) 校验收敛：未知键 / 重复用例丢弃并告警，绝不静默接受
        Ok(self.validate(proposed, base_version, &primary))
    }

    /// 样本里有不达标值的指标名（含失败追踪时的主指标）
    fn underperforming_metrics(&self, records: &[TraceRecord], threshold: f64) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for record in records {
            if record.failed {
                continue;
            }
            for (name, value) in &record.metrics.values {
                if !value.is_truthy(threshold) && !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    /// 关键词匹配欠佳指标（或 general 域），时间倒序截取上限条数
    fn select_practices(
        &self,
        underperforming: &[String],
    ) -> Result<Vec<BestPracticeEntry>, PipelineError> {
        let mut relevant: Vec<BestPracticeEntry> = self
            .memory
            .load_all()?
            .filter(|entry| {
                let domain = entry.metric_or_domain.to_lowercase();
                domain == "general"
                    || underperforming.iter().any(|m| {
                        let m = m.to_lowercase();
                        m.contains(&domain) || domain.contains(&m)
                    })
            })
            .collect();
        relevant.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        relevant.truncate(self.max_best_practices);
        Ok(relevant)
    }

    fn validate(&self, proposed: ChangeSet, base_version: &str, primary: &str) -> ChangeSet {
        let mutable = self.spec.mutable_keys();
        let (accepted_patch, rejected_keys) =
            validate_config_patch(proposed.config_patch, &mutable);
        for key in &rejected_keys {
            warn!(key = %key, "dropping patch key not in mutable-config set");
        }

        let golden_ids = match self.spec.load_golden() {
            Ok(cases) => cases.into_iter().map(|c| c.id).collect(),
            Err(e) => {
                // 黄金集在 eval 阶段已经要求存在；这里读不到就只做内部去重
                warn!(error = %e, "golden set unavailable during validation");
                Default::default()
            }
        };
        let (kept_cases, dropped_ids) = filter_new_testcases(proposed.new_testcases, &golden_ids);
        for id in &dropped_ids {
            warn!(id = %id, "dropping proposed testcase with duplicate id");
        }

        let mut metadata = proposed.metadata;
        metadata.insert("source_version".to_string(), json!(base_version));
        metadata.insert("primary_metric".to_string(), json!(primary));
        metadata.insert(
            "failure_threshold".to_string(),
            json!(self.spec.evaluation.failure_threshold),
        );
        if !rejected_keys.is_empty() {
            metadata.insert("rejected_patch_keys".to_string(), json!(rejected_keys));
        }
        if !dropped_ids.is_empty() {
            metadata.insert("dropped_testcase_ids".to_string(), json!(dropped_ids));
        }

        ChangeSet {
            config_patch: accepted_patch,
            new_testcases: kept_cases,
            rationale: proposed.rationale,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{FailingLlmClient, MockLlmClient};
    use crate::metrics::{MetricResult, MetricValue};
    use std::io::Write;
    use std::path::Path;

    fn write_golden(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("golden.jsonl");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, r#"{{"id": "1", "input": {{"q": "a"}}}}"#).unwrap();
        writeln!(f, r#"{{"id": "2", "input": {{"q": "b"}}}}"#).unwrap();
        path
    }

    fn spec(dir: &Path) -> AutSpec {
        serde_json::from_value(serde_json::json!({
            "aut_id": "demo",
            "mutable_config_keys": ["model", "temperature"],
            "evaluation": {
                "default_pack": "generic",
                "metrics": ["task_success", "judge_score_avg"],
                "golden_path": write_golden(dir)
            }
        }))
        .unwrap()
    }

    fn seeded_traces(dir: &Path) -> Arc<TraceStore> {
        let store = Arc::new(TraceStore::new(dir.join("traces.jsonl")));
        for score in [3.0, 5.0] {
            let mut record = TraceRecord::new("demo", "v1", serde_json::json!({"id": "1"}));
            let mut metrics = MetricResult::default();
            metrics.set("judge_score", MetricValue::Number(score));
            record.metrics = metrics;
            store.append(record).unwrap();
        }
        store
    }

    fn engine(dir: &Path, oracle: Arc<dyn LlmClient>) -> PlannerEngine {
        let memory = Arc::new(BestPracticesMemory::new(dir.join("bank.jsonl")));
        memory
            .append(BestPracticeEntry::new("judge_score", "State assumptions."))
            .unwrap();
        memory
            .append(BestPracticeEntry::new("unrelated_domain", "Never selected."))
            .unwrap();
        PlannerEngine::new(spec(dir), seeded_traces(dir), memory, oracle)
    }

    #[tokio::test]
    async fn test_propose_validates_keys_and_testcases() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(MockLlmClient::with_response(
            r#"```json
{
  "config_patch": {"temperature": 0.2, "system_prompt": "be thorough"},
  "new_testcases": [
    {"id": "2", "input": {"q": "dup"}},
    {"id": "7", "input": {"q": "new"}, "expected_behavior": "covers the failure"}
  ],
  "rationale": "lower temperature, add coverage",
  "metadata": {"confidence": "medium"}
}
```"#,
        ));
        let changeset = engine(dir.path(), oracle)
            .propose_changeset("v1")
            .await
            .unwrap();

        // 未知键 system_prompt 被剥除，不整体拒绝
        assert_eq!(changeset.config_patch.len(), 1);
        assert!(changeset.config_patch.contains_key("temperature"));
        // 重复 id "2" 被丢弃，"7" 保留
        assert_eq!(changeset.new_testcases.len(), 1);
        assert_eq!(changeset.new_testcases[0].id, "7");
        assert_eq!(changeset.rationale, "lower temperature, add coverage");
        assert_eq!(
            changeset.metadata["source_version"],
            serde_json::json!("v1")
        );
        assert_eq!(
            changeset.metadata["confidence"],
            serde_json::json!("medium")
        );
        assert_eq!(
            changeset.metadata["rejected_patch_keys"],
            serde_json::json!(["system_prompt"])
        );
    }

    #[tokio::test]
    async fn test_oracle_failure_is_fatal_with_context() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(FailingLlmClient::new("connection reset"));
        let err = engine(dir.path(), oracle)
            .propose_changeset("v1")
            .await
            .unwrap_err();
        match err {
            PipelineError::OracleCall {
                aut_id,
                version_id,
                message,
            } => {
                assert_eq!(aut_id, "demo");
                assert_eq!(version_id, "v1");
                assert!(message.contains("connection reset"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unparsable_oracle_response_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(MockLlmClient::with_response("I suggest trying harder."));
        let err = engine(dir.path(), oracle)
            .propose_changeset("v1")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::OracleCall { .. }));
    }

    #[tokio::test]
    async fn test_empty_proposal_is_valid_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(MockLlmClient::with_response("{}"));
        let changeset = engine(dir.path(), oracle)
            .propose_changeset("v1")
            .await
            .unwrap();
        assert!(changeset.is_empty());
        // 空提案仍是良构 ChangeSet，元数据照常填充
        assert_eq!(
            changeset.metadata["primary_metric"],
            serde_json::json!("judge_score")
        );
    }
}
