//! Apiary - 智能体应用评估与改进流水线
//!
//! 入口：初始化日志、加载配置与 AUT 规格，进入交互 shell。
//! 每条命令 1:1 映射到库内契约（评估 / 聚合 / 规划），shell 本身只做参数拼装。

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use apiary::aggregate::MetricsAggregator;
use apiary::aut::{AutClient, AutSpec, MockAutClient};
use apiary::config::{load_config, AppConfig};
use apiary::eval::{EvalEngine, EvalOptions};
use apiary::llm::{LlmClient, MockLlmClient, OpenAiClient};
use apiary::metrics::build_pack;
use apiary::planner::PlannerEngine;
use apiary::store::{BestPracticesMemory, TraceStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    apiary::observability::init();

    let config = load_config(None).context("Failed to load config")?;
    let spec_path: PathBuf = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| config.app.aut_spec.clone())
        .context("No AUT spec: pass a path argument or set [app] aut_spec")?;
    let spec = AutSpec::load_from_file(&spec_path).context("Failed to load AUT spec")?;

    let traces = Arc::new(TraceStore::new(config.store.traces_path.clone()));
    let memory = Arc::new(BestPracticesMemory::new(config.store.memory_path.clone()));
    // 裁判与规划共用 Oracle 后端；规划可单独指定模型
    let judge_oracle = build_oracle(&config, &config.llm.model);
    let planner_model = config
        .planner
        .model
        .clone()
        .unwrap_or_else(|| config.llm.model.clone());
    let planner_oracle = build_oracle(&config, &planner_model);

    println!(
        "apiary shell - AUT {} @ {} (type 'help' for commands)",
        spec.aut_id, spec.version
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let parts: Vec<&str> = line.split_whitespace().collect();
        let (cmd, args) = match parts.split_first() {
            Some((cmd, args)) => (*cmd, args),
            None => continue,
        };

        let outcome = match cmd {
            "help" => {
                print_help();
                Ok(())
            }
            "discover" => discover(&spec),
            "profile" => {
                println!("{}", serde_json::to_string_pretty(&spec)?);
                Ok(())
            }
            "eval" => {
                let version = args.first().copied().unwrap_or(spec.version.as_str());
                run_eval(&config, &spec, &traces, judge_oracle.clone(), version, None).await
            }
            "run" => match args.first() {
                Some(case_id) => {
                    let version = args.get(1).copied().unwrap_or(spec.version.as_str());
                    run_eval(
                        &config,
                        &spec,
                        &traces,
                        judge_oracle.clone(),
                        version,
                        Some(case_id),
                    )
                    .await
                }
                None => {
                    eprintln!("usage: run <case_id> [version]");
                    Ok(())
                }
            },
            "metrics" => show_metrics(&spec, &traces),
            "compare" => match (args.first(), args.get(1)) {
                (Some(a), Some(b)) => compare(&spec, &traces, a, b),
                _ => {
                    eprintln!("usage: compare <version_a> <version_b>");
                    Ok(())
                }
            },
            "improve" => {
                let version = args.first().copied().unwrap_or(spec.version.as_str());
                improve(
                    &config,
                    &spec,
                    &traces,
                    &memory,
                    planner_oracle.clone(),
                    version,
                )
                .await
            }
            "exit" | "quit" => break,
            other => {
                eprintln!("unknown command: {} (type 'help')", other);
                Ok(())
            }
        };

        if let Err(e) = outcome {
            eprintln!("error: {:#}", e);
        }
    }

    Ok(())
}

fn print_help() {
    println!(
        "commands:\n  \
         discover                 AUT 概要（指标、工具、可变配置键）\n  \
         profile                  完整 AUT 规格 JSON\n  \
         eval [version]           对黄金集跑一轮评估（Ctrl-C 在用例边界取消）\n  \
         run <case_id> [version]  单条用例\n  \
         metrics                  按版本汇总追踪历史\n  \
         compare <a> <b>          两版本主指标对比\n  \
         improve [version]        规划下一版 ChangeSet（只打印，不自动应用）\n  \
         exit"
    );
}

/// 按配置构建 Oracle：mock 用于本地无 API 调试
fn build_oracle(config: &AppConfig, model: &str) -> Arc<dyn LlmClient> {
    match config.llm.provider.as_str() {
        "mock" => Arc::new(MockLlmClient::with_response(
            r#"{"score": 3, "rationale": "mock oracle"}"#,
        )),
        _ => Arc::new(OpenAiClient::new(
            config.llm.base_url.as_deref(),
            model,
            None,
        )),
    }
}

fn discover(spec: &AutSpec) -> anyhow::Result<()> {
    println!("aut_id:       {}", spec.aut_id);
    println!("name:         {}", spec.name);
    println!("version:      {}", spec.version);
    println!("pack:         {}", spec.evaluation.default_pack);
    println!("metrics:      {}", spec.evaluation.metrics.join(", "));
    println!(
        "tools:        {}",
        spec.tools
            .iter()
            .map(|t| t.id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("mutable keys: {}", spec.mutable_config_keys.join(", "));
    println!("golden set:   {}", spec.evaluation.golden_path.display());
    Ok(())
}

/// 跑黄金集（或其中一条用例）；Ctrl-C 触发取消，只在用例边界生效
async fn run_eval(
    config: &AppConfig,
    spec: &AutSpec,
    traces: &Arc<TraceStore>,
    oracle: Arc<dyn LlmClient>,
    version: &str,
    only_case: Option<&str>,
) -> anyhow::Result<()> {
    let mut cases = spec.load_golden().context("Failed to load golden set")?;
    if let Some(case_id) = only_case {
        cases.retain(|c| c.id == case_id);
        if cases.is_empty() {
            anyhow::bail!("no golden case with id {}", case_id);
        }
    }

    let pack = build_pack(
        &spec.evaluation.default_pack,
        spec,
        Some(oracle),
        config.eval.judge_timeout_secs,
    )
    .context("Failed to build metric pack")?;
    let aut: Arc<dyn AutClient> = Arc::new(MockAutClient::new(&spec.aut_id));
    let options = EvalOptions::from_config(&config.eval, spec);
    let engine = EvalEngine::new(aut, spec.clone(), pack, traces.clone(), options);

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = engine.run_pack(version, &cases, &cancel).await?;
    ctrl_c.abort();

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn show_metrics(spec: &AutSpec, traces: &Arc<TraceStore>) -> anyhow::Result<()> {
    let aggregator = MetricsAggregator::new(
        traces.clone(),
        spec.evaluation.primary_metric.clone(),
        spec.evaluation.failure_threshold,
    );
    let summaries = aggregator.summarize(&spec.aut_id)?;
    if summaries.is_empty() {
        println!("no traces for {}", spec.aut_id);
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(())
}

fn compare(spec: &AutSpec, traces: &Arc<TraceStore>, a: &str, b: &str) -> anyhow::Result<()> {
    let aggregator = MetricsAggregator::new(
        traces.clone(),
        spec.evaluation.primary_metric.clone(),
        spec.evaluation.failure_threshold,
    );
    let result = aggregator.compare(&spec.aut_id, a, b)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn improve(
    config: &AppConfig,
    spec: &AutSpec,
    traces: &Arc<TraceStore>,
    memory: &Arc<BestPracticesMemory>,
    oracle: Arc<dyn LlmClient>,
    version: &str,
) -> anyhow::Result<()> {
    let planner = PlannerEngine::new(spec.clone(), traces.clone(), memory.clone(), oracle)
        .with_limits(
            config.planner.max_best_practices,
            config.planner.report_truncate_chars,
        );
    let changeset = planner
        .propose_changeset(version)
        .await
        .context("Planner failed")?;

    if changeset.is_empty() {
        println!("planner proposed no changes");
    }
    println!("{}", serde_json::to_string_pretty(&changeset)?);
    Ok(())
}
