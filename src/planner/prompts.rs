//! 规划 Prompt 拼装
//!
//! 上下文工程集中在这里：当前指标汇总、失败用例报告、挑选出的最佳实践、
//! 目标阈值，最后是严格的 JSON 输出契约。引擎只管取数和校验。

use crate::aggregate::VersionSummary;
use crate::aut::AutSpec;
use crate::store::{BestPracticeEntry, TraceRecord};

pub const PLANNER_SYSTEM_PROMPT: &str = "You are a senior AI agent designer. \
You improve agent applications by proposing configuration changes and new \
evaluation test cases based on observed failures. Respond with JSON only.";

/// 失败用例报告：输入 + 截断输出 + 得分与裁判理由
pub fn failure_report(failing: &[TraceRecord], truncate_chars: usize) -> String {
    if failing.is_empty() {
        return "No failing traces. All scores meet or exceed the threshold.".to_string();
    }

    let mut parts = Vec::new();
    for record in failing {
        let input = serde_json::to_string(&record.input).unwrap_or_default();
        let output: String = serde_json::to_string(&record.output)
            .unwrap_or_default()
            .chars()
            .take(truncate_chars)
            .collect();
        let score = record
            .metrics
            .values
            .iter()
            .map(|(name, value)| format!("{}={:?}", name, value))
            .collect::<Vec<_>>()
            .join(", ");
        let rationale = record.metrics.rationale.as_deref().unwrap_or("");
        let status = if record.failed {
            record.error.as_deref().unwrap_or("invocation failed")
        } else {
            "scored below threshold"
        };
        parts.push(format!(
            "Input: {}\nOutput (truncated): {}\nMetrics: {}\nJudge rationale: {}\nStatus: {}",
            input, output, score, rationale, status
        ));
    }
    parts.join("\n---\n")
}

/// 最佳实践块（空集合时返回空串，不占 Prompt）
pub fn best_practices_block(entries: &[BestPracticeEntry]) -> String {
    if entries.is_empty() {
        return String::new();
    }
    let mut lines = vec!["Best practices to consider:".to_string()];
    for entry in entries {
        lines.push(format!("- [{}] {}", entry.metric_or_domain, entry.text));
    }
    lines.join("\n")
}

/// 主 Prompt：现状 → 任务 → 输出契约
pub fn planner_prompt(
    spec: &AutSpec,
    base_version: &str,
    summary: &VersionSummary,
    report: &str,
    practices: &str,
) -> String {
    let mutable_keys = spec.mutable_config_keys.join(", ");
    let metrics = spec.evaluation.metrics.join(", ");
    let summary_json = serde_json::to_string_pretty(summary).unwrap_or_default();

    format!(
        r#"You are improving the agent application "{aut_id}" ({description}), currently at version "{base_version}".

Declared evaluation metrics: {metrics}
Failure threshold: scores below {threshold} count as failures.
Mutable configuration keys (the ONLY keys you may patch): {mutable_keys}

Current version summary:
{summary_json}

Failing traces for this version:
{report}

{practices}

Your task:
1. Analyze the failure patterns above (if any).
2. Propose configuration changes, restricted to the mutable keys, that could raise the underperforming metrics in the next version.
3. Optionally propose new golden test cases that cover the observed failure modes.

You MUST respond with exactly this JSON shape (no extra fields, no prose outside the JSON):

{{
  "config_patch": {{ "<mutable_key>": <new value> }},
  "new_testcases": [
    {{
      "id": "<unique id not in the golden set>",
      "input": {{ ... }},
      "judge_question": "Does the answer ...?",
      "expected_behavior": "The answer should ..."
    }}
  ],
  "rationale": "short explanation of why these changes should help",
  "metadata": {{}}
}}

Rules:
- config_patch may be empty if no configuration change is warranted.
- new_testcases may be an empty list.
- If there are no failing traces, still propose small robustness improvements but keep the patch minimal."#,
        aut_id = spec.aut_id,
        description = spec.description,
        base_version = base_version,
        metrics = metrics,
        threshold = spec.evaluation.failure_threshold,
        mutable_keys = mutable_keys,
        summary_json = summary_json,
        report = report,
        practices = practices,
    )
}
