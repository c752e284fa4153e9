//! 流水线集成测试
//!
//! 评估 → 聚合 → 规划 全链路：用 Mock AUT 与脚本化 Oracle 在临时目录里
//! 跑两个版本的黄金集，核对追踪落盘、版本对比与经校验的 ChangeSet。

use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use apiary::aggregate::MetricsAggregator;
use apiary::aut::{AutClient, AutSpec, MockAutClient};
use apiary::config::EvalSection;
use apiary::eval::{EvalEngine, EvalOptions};
use apiary::llm::{LlmClient, MockLlmClient};
use apiary::metrics::build_pack;
use apiary::planner::PlannerEngine;
use apiary::store::{BestPracticeEntry, BestPracticesMemory, TraceStore};

fn write_golden(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("golden.jsonl");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(
        f,
        r#"{{"id": "1", "input": {{"id": "1", "q": "plan a 3-day trip"}}, "judge_question": "Is the plan complete?"}}"#
    )
    .unwrap();
    writeln!(
        f,
        r#"{{"id": "2", "input": {{"id": "2", "q": "plan on a budget"}}, "expected_behavior": "mentions a daily budget"}}"#
    )
    .unwrap();
    writeln!(
        f,
        r#"{{"id": "3", "input": {{"id": "3", "q": "plan with warnings"}}}}"#
    )
    .unwrap();
    path
}

fn load_spec(dir: &Path) -> AutSpec {
    let golden = write_golden(dir);
    let spec_path = dir.join("travel.aut.json");
    let spec = serde_json::json!({
        "aut_id": "travel_planner",
        "version": "v1",
        "description": "plans trips from free-form requests",
        "tools": [{"id": "weather", "description": "weather lookup"}],
        "mutable_config_keys": ["model", "temperature"],
        "evaluation": {
            "default_pack": "generic",
            "metrics": ["task_success", "judge_score_avg"],
            "judge": {"model": "gpt-4o-mini", "rubric_id": "travel_v1"},
            "golden_path": golden,
            "failure_threshold": 4.0
        }
    });
    std::fs::write(&spec_path, serde_json::to_string(&spec).unwrap()).unwrap();
    AutSpec::load_from_file(&spec_path).unwrap()
}

async fn run_version(
    spec: &AutSpec,
    traces: &Arc<TraceStore>,
    version: &str,
    judge_score: u32,
    fail_case: Option<&str>,
) {
    let judge: Arc<dyn LlmClient> = Arc::new(MockLlmClient::with_response(format!(
        r#"{{"score": {}, "rationale": "integration stub"}}"#,
        judge_score
    )));
    let pack = build_pack("generic", spec, Some(judge), 5).unwrap();

    let mut aut = MockAutClient::new("travel_planner");
    if let Some(case_id) = fail_case {
        aut = aut.fail_on(case_id);
    }
    let aut: Arc<dyn AutClient> = Arc::new(aut);

    let options = EvalOptions::from_config(&EvalSection::default(), spec);
    let engine = EvalEngine::new(aut, spec.clone(), pack, traces.clone(), options);

    let cases = spec.load_golden().unwrap();
    let result = engine
        .run_pack(version, &cases, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.requested, 3);
    assert_eq!(result.completed, 3);
}

#[tokio::test]
async fn test_eval_aggregate_plan_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let spec = load_spec(dir.path());
    let traces = Arc::new(TraceStore::new(dir.path().join("traces.jsonl")));

    // v1 低分且有一条 AUT 失败；v2 满分
    run_version(&spec, &traces, "v1", 2, Some("2")).await;
    run_version(&spec, &traces, "v2", 5, None).await;

    // 追踪落盘：6 条，v1 恰好 1 条失败
    let records: Vec<_> = traces.load_all().unwrap().collect();
    assert_eq!(records.len(), 6);
    let v1_failed = records
        .iter()
        .filter(|r| r.version_id == "v1" && r.failed)
        .count();
    assert_eq!(v1_failed, 1);

    // 聚合：v2 主指标优于 v1
    let aggregator = MetricsAggregator::new(traces.clone(), None, 4.0);
    let summaries = aggregator.summarize("travel_planner").unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries["v2"].failure_count, 0);
    assert_eq!(summaries["v2"].pass_rate, Some(1.0));
    assert!(summaries["v1"].pass_rate.unwrap() < 1.0);

    let comparison = aggregator.compare("travel_planner", "v1", "v2").unwrap();
    assert_eq!(comparison.metric, "judge_score");
    assert!(comparison.delta.unwrap() > 0.0);

    // 规划：Oracle 的提案经可变键与黄金集校验收敛
    let memory = Arc::new(BestPracticesMemory::new(dir.path().join("bank.jsonl")));
    memory
        .append(BestPracticeEntry::new(
            "judge_score",
            "Always list assumptions before the itinerary.",
        ))
        .unwrap();

    let oracle: Arc<dyn LlmClient> = Arc::new(MockLlmClient::with_response(
        r#"```json
{
  "config_patch": {"temperature": 0.1, "retrieval_k": 8},
  "new_testcases": [
    {"id": "1", "input": {"q": "duplicate of golden"}},
    {"id": "budget-edge", "input": {"q": "plan with $0 budget"}, "expected_behavior": "declines politely"}
  ],
  "rationale": "reduce variance and cover the budget failure"
}
```"#,
    ));
    let planner = PlannerEngine::new(spec.clone(), traces.clone(), memory, oracle);
    let changeset = planner.propose_changeset("v1").await.unwrap();

    // retrieval_k 不在可变键里、id "1" 与黄金集重复，均被剥除
    assert_eq!(changeset.config_patch.len(), 1);
    assert!(changeset.config_patch.contains_key("temperature"));
    assert_eq!(changeset.new_testcases.len(), 1);
    assert_eq!(changeset.new_testcases[0].id, "budget-edge");
    assert_eq!(
        changeset.metadata["source_version"],
        serde_json::json!("v1")
    );
}

#[tokio::test]
async fn test_judge_outage_degrades_without_aborting_run() {
    let dir = tempfile::tempdir().unwrap();
    let spec = load_spec(dir.path());
    let traces = Arc::new(TraceStore::new(dir.path().join("traces.jsonl")));

    let judge: Arc<dyn LlmClient> =
        Arc::new(apiary::llm::FailingLlmClient::new("rate limited"));
    let pack = build_pack("generic", &spec, Some(judge), 5).unwrap();
    let aut: Arc<dyn AutClient> = Arc::new(MockAutClient::new("travel_planner"));
    let options = EvalOptions::from_config(&EvalSection::default(), &spec);
    let engine = EvalEngine::new(aut, spec.clone(), pack, traces.clone(), options);

    let cases = spec.load_golden().unwrap();
    let result = engine
        .run_pack("v1", &cases, &CancellationToken::new())
        .await
        .unwrap();

    // 裁判挂掉不算用例失败；judge_unavailable 记在指标里
    assert_eq!(result.completed, 3);
    assert_eq!(result.failed_cases, 0);
    for record in traces.load_all().unwrap() {
        assert!(!record.failed);
        assert_eq!(
            record.metrics.get("judge_unavailable"),
            Some(apiary::metrics::MetricValue::Bool(true))
        );
        assert_eq!(
            record.metrics.get("task_success"),
            Some(apiary::metrics::MetricValue::Bool(true))
        );
    }
}
