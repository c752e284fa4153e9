//! 评估引擎：一次 run_pack 的编排
//!
//! 每条用例：调 AUT（只测这段耗时）→ 跑指标包 → 组追踪记录落盘 → 累积聚合。
//! 用例之间相互独立，可按配置并发；追踪内容与完成顺序无关，物理追加由
//! 存储层串行化。单条用例失败（含超时）记失败追踪后继续，绝不中断整批。
//! 取消只在用例边界生效：已落盘的部分追踪保留，结果里报告完成 / 请求数。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{pin_mut, stream, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aut::{AutClient, AutSpec, TestCase};
use crate::config::EvalSection;
use crate::error::PipelineError;
use crate::eval::stats;
use crate::metrics::pack::TASK_SUCCESS;
use crate::metrics::{MetricPack, MetricResult, MetricValue};
use crate::store::{TraceRecord, TraceStore};

/// run_pack 的运行参数
#[derive(Debug, Clone)]
pub struct EvalOptions {
    /// 同时在途的用例数上限
    pub concurrency: usize,
    /// 单次 AUT 调用超时
    pub aut_timeout: Duration,
    /// 任务成功率看哪个指标
    pub success_metric: String,
    /// 数值型成功指标的判真阈值
    pub success_threshold: f64,
}

impl EvalOptions {
    pub fn from_config(cfg: &EvalSection, spec: &AutSpec) -> Self {
        Self {
            concurrency: cfg.concurrency.max(1),
            aut_timeout: Duration::from_secs(cfg.aut_timeout_secs),
            success_metric: TASK_SUCCESS.to_string(),
            success_threshold: spec.evaluation.failure_threshold,
        }
    }
}

/// 单指标的批内汇总（均值 + 最近秩 p95）
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricStats {
    pub mean: f64,
    pub p95: f64,
}

/// 单条用例的执行结果（已落盘后返回）
#[derive(Debug, Clone, Serialize)]
pub struct CaseOutcome {
    pub case_id: String,
    pub trace_id: String,
    pub failed: bool,
    pub latency_ms: f64,
    pub metrics: MetricResult,
}

/// 一次 run_pack 的聚合结果
#[derive(Debug, Clone, Serialize)]
pub struct EvalRunResult {
    pub aut_id: String,
    pub version_id: String,
    pub pack: String,
    /// 请求的用例数
    pub requested: usize,
    /// 实际执行（含失败）的用例数；取消时小于 requested
    pub completed: usize,
    /// AUT 调用失败（含超时）的用例数
    pub failed_cases: usize,
    pub cancelled: bool,
    /// 各数值指标的均值与 p95（含 latency_ms）
    pub metrics: BTreeMap<String, MetricStats>,
    /// 成功指标为真（或达阈值）的占比；无样本时为 None
    pub task_success_rate: Option<f64>,
}

/// 评估引擎
pub struct EvalEngine {
    aut: Arc<dyn AutClient>,
    spec: AutSpec,
    pack: MetricPack,
    traces: Arc<TraceStore>,
    options: EvalOptions,
}

impl EvalEngine {
    pub fn new(
        aut: Arc<dyn AutClient>,
        spec: AutSpec,
        pack: MetricPack,
        traces: Arc<TraceStore>,
        options: EvalOptions,
    ) -> Self {
        Self {
            aut,
            spec,
            pack,
            traces,
            options,
        }
    }

    /// 对一组用例跑完整个指标包并返回聚合结果
    pub async fn run_pack(
        &self,
        version_id: &str,
        cases: &[TestCase],
        cancel: &CancellationToken,
    ) -> Result<EvalRunResult, PipelineError> {
        info!(
            aut = %self.spec.aut_id,
            version = version_id,
            pack = self.pack.name(),
            cases = cases.len(),
            concurrency = self.options.concurrency,
            "starting eval run"
        );

        let case_stream = stream::iter(
            cases
                .iter()
                .map(|case| self.run_case(version_id, case, cancel)),
        )
        .buffer_unordered(self.options.concurrency);
        pin_mut!(case_stream);

        let mut outcomes: Vec<CaseOutcome> = Vec::new();
        while let Some(res) = case_stream.next().await {
            if let Some(outcome) = res? {
                outcomes.push(outcome);
            }
        }

        let result = self.aggregate(version_id, cases.len(), outcomes, cancel.is_cancelled());
        info!(
            version = version_id,
            completed = result.completed,
            failed = result.failed_cases,
            cancelled = result.cancelled,
            "eval run finished"
        );
        Ok(result)
    }

    /// 执行单条用例（CLI `run` 命令与 run_pack 共用）
    pub async fn run_single(
        &self,
        version_id: &str,
        case: &TestCase,
    ) -> Result<CaseOutcome, PipelineError> {
        let cancel = CancellationToken::new();
        let outcome = self.run_case(version_id, case, &cancel).await?;
        // 新建的 token 不会被取消，run_case 必然产出结果
        Ok(outcome.expect("fresh token cannot be cancelled"))
    }

    async fn run_case(
        &self,
        version_id: &str,
        case: &TestCase,
        cancel: &CancellationToken,
    ) -> Result<Option<CaseOutcome>, PipelineError> {
        // 取消只在用例边界检查，不打断执行中的用例
        if cancel.is_cancelled() {
            return Ok(None);
        }

        let mut record = TraceRecord::new(self.aut.aut_id(), version_id, serde_json::to_value(case)?);

        // 只测 AUT 调用本身的耗时，不含指标计算
        let started = Instant::now();
        let invoked = tokio::time::timeout(
            self.options.aut_timeout,
            self.aut.run_once(version_id, &case.input),
        )
        .await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        record.latency_ms = Some(latency_ms);

        let response = match invoked {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return self.append_failure(case, record, latency_ms, e.to_string()),
            Err(_) => {
                let e = PipelineError::AutTimeout(self.options.aut_timeout.as_secs());
                return self.append_failure(case, record, latency_ms, e.to_string());
            }
        };

        let metrics = self.pack.evaluate(case, &response).await;

        record.output = response.output;
        record.tool_calls = response.tool_calls;
        record.session_graph = response.session_graph;
        record.metrics = metrics.clone();
        let trace_id = self.traces.append(record)?;

        Ok(Some(CaseOutcome {
            case_id: case.id.clone(),
            trace_id,
            failed: false,
            latency_ms,
            metrics,
        }))
    }

    /// AUT 调用失败：输出留空、指标留空、置失败标记，照常落盘后继续批次
    fn append_failure(
        &self,
        case: &TestCase,
        mut record: TraceRecord,
        latency_ms: f64,
        error: String,
    ) -> Result<Option<CaseOutcome>, PipelineError> {
        warn!(case = %case.id, error = %error, "AUT invocation failed, recording failure trace");
        record.failed = true;
        record.error = Some(error);
        let trace_id = self.traces.append(record)?;
        Ok(Some(CaseOutcome {
            case_id: case.id.clone(),
            trace_id,
            failed: true,
            latency_ms,
            metrics: MetricResult::default(),
        }))
    }

    fn aggregate(
        &self,
        version_id: &str,
        requested: usize,
        outcomes: Vec<CaseOutcome>,
        cancelled: bool,
    ) -> EvalRunResult {
        let mut samples: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut latencies: Vec<f64> = Vec::new();
        let mut success_hits = 0usize;
        let mut success_total = 0usize;
        let mut failed_cases = 0usize;

        for outcome in &outcomes {
            if outcome.failed {
                failed_cases += 1;
                continue;
            }
            latencies.push(outcome.latency_ms);
            for (name, value) in &outcome.metrics.values {
                if let MetricValue::Number(n) = value {
                    samples.entry(name.clone()).or_default().push(*n);
                }
            }
            if let Some(value) = outcome.metrics.get(&self.options.success_metric) {
                success_total += 1;
                if value.is_truthy(self.options.success_threshold) {
                    success_hits += 1;
                }
            }
        }

        let mut metrics = BTreeMap::new();
        for (name, values) in samples {
            if let (Some(mean), Some(p95)) = (
                stats::mean(&values),
                stats::percentile_nearest_rank(&values, 95.0),
            ) {
                metrics.insert(name, MetricStats { mean, p95 });
            }
        }
        if let (Some(mean), Some(p95)) = (
            stats::mean(&latencies),
            stats::percentile_nearest_rank(&latencies, 95.0),
        ) {
            metrics.insert("latency_ms".to_string(), MetricStats { mean, p95 });
        }

        let task_success_rate = if success_total > 0 {
            Some(success_hits as f64 / success_total as f64)
        } else {
            None
        };

        EvalRunResult {
            aut_id: self.spec.aut_id.clone(),
            version_id: version_id.to_string(),
            pack: self.pack.name().to_string(),
            requested,
            completed: outcomes.len(),
            failed_cases,
            cancelled,
            metrics,
            task_success_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aut::{AutResponse, MockAutClient};
    use crate::llm::MockLlmClient;
    use crate::metrics::build_pack;
    use async_trait::async_trait;
    use serde_json::json;

    /// 按用例 id 返回预设文本的 AUT（空文本模拟任务失败）
    struct ScriptedAut {
        answers: BTreeMap<String, String>,
    }

    #[async_trait]
    impl AutClient for ScriptedAut {
        fn aut_id(&self) -> &str {
            "demo"
        }

        async fn run_once(
            &self,
            _version_id: &str,
            input: &serde_json::Value,
        ) -> Result<AutResponse, PipelineError> {
            let id = input.get("id").and_then(|v| v.as_str()).unwrap_or_default();
            let text = self.answers.get(id).cloned().unwrap_or_default();
            Ok(AutResponse::from_text(text))
        }
    }

    fn spec(metrics: Vec<&str>) -> AutSpec {
        serde_json::from_value(json!({
            "aut_id": "demo",
            "evaluation": {
                "default_pack": "generic",
                "metrics": metrics,
                "golden_path": "golden.jsonl"
            }
        }))
        .unwrap()
    }

    fn cases(n: usize) -> Vec<TestCase> {
        (0..n)
            .map(|i| TestCase {
                id: i.to_string(),
                input: json!({"id": i.to_string(), "q": format!("question {}", i)}),
                judge_question: None,
                expected_behavior: None,
            })
            .collect()
    }

    fn engine_with(
        aut: Arc<dyn AutClient>,
        spec: AutSpec,
        pack: MetricPack,
        traces: Arc<TraceStore>,
    ) -> EvalEngine {
        let options = EvalOptions::from_config(&EvalSection::default(), &spec);
        EvalEngine::new(aut, spec, pack, traces, options)
    }

    #[tokio::test]
    async fn test_single_aut_failure_does_not_abort_batch() {
        let dir = tempfile::tempdir().unwrap();
        let traces = Arc::new(TraceStore::new(dir.path().join("traces.jsonl")));
        let spec = spec(vec!["task_success"]);
        let pack = build_pack("generic", &spec, None, 5).unwrap();
        let aut = Arc::new(MockAutClient::new("demo").fail_on("3"));
        let engine = engine_with(aut, spec, pack, traces.clone());

        let result = engine
            .run_pack("v1", &cases(5), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.requested, 5);
        assert_eq!(result.completed, 5);
        assert_eq!(result.failed_cases, 1);
        assert!(!result.cancelled);

        let records: Vec<_> = traces.load_all().unwrap().collect();
        assert_eq!(records.len(), 5);
        let failed: Vec<_> = records.iter().filter(|r| r.failed).collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].metrics.is_empty());
        assert_eq!(failed[0].output, json!({}));
        assert_eq!(records.iter().filter(|r| !r.failed).count(), 4);
    }

    #[tokio::test]
    async fn test_end_to_end_rule_plus_stub_judge() {
        let dir = tempfile::tempdir().unwrap();
        let traces = Arc::new(TraceStore::new(dir.path().join("traces.jsonl")));
        let spec = spec(vec!["task_success", "judge_score_avg"]);
        let judge = Arc::new(MockLlmClient::with_response(
            r#"{"score": 5, "rationale": "stub"}"#,
        ));
        let pack = build_pack("generic", &spec, Some(judge), 5).unwrap();

        // 用例 0 有回答、用例 1 空回答 → task_success 率 0.5
        let aut = Arc::new(ScriptedAut {
            answers: BTreeMap::from([("0".to_string(), "a fine answer".to_string())]),
        });
        let engine = engine_with(aut, spec, pack, traces.clone());

        let result = engine
            .run_pack("v1", &cases(2), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.completed, 2);
        assert_eq!(result.task_success_rate, Some(0.5));
        let judge_stats = &result.metrics["judge_score"];
        assert_eq!(judge_stats.mean, 5.0);
        assert_eq!(judge_stats.p95, 5.0);
        assert!(result.metrics.contains_key("latency_ms"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let traces = Arc::new(TraceStore::new(dir.path().join("traces.jsonl")));
        let spec = spec(vec!["task_success"]);
        let pack = build_pack("generic", &spec, None, 5).unwrap();
        let aut = Arc::new(MockAutClient::new("demo"));
        let engine = engine_with(aut, spec, pack, traces.clone());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = engine.run_pack("v1", &cases(3), &cancel).await.unwrap();

        assert_eq!(result.requested, 3);
        assert_eq!(result.completed, 0);
        assert!(result.cancelled);
        assert_eq!(traces.load_all().unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_aut_timeout_is_a_per_case_failure() {
        let dir = tempfile::tempdir().unwrap();
        let traces = Arc::new(TraceStore::new(dir.path().join("traces.jsonl")));
        let spec = spec(vec!["task_success"]);
        let pack = build_pack("generic", &spec, None, 5).unwrap();
        let aut = Arc::new(
            MockAutClient::new("demo").with_delay(Duration::from_millis(200)),
        );
        let mut options = EvalOptions::from_config(&EvalSection::default(), &spec);
        options.aut_timeout = Duration::from_millis(10);
        let engine = EvalEngine::new(aut, spec, pack, traces.clone(), options);

        let result = engine
            .run_pack("v1", &cases(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.failed_cases, 1);
        let records: Vec<_> = traces.load_all().unwrap().collect();
        assert!(records[0].failed);
        assert!(records[0].error.as_ref().unwrap().contains("timed out"));
    }
}
