//! LLM 裁判评分器
//!
//! 按 rubric 请 Oracle 给回答打 1-5 分。调用可能瞬时失败（网络 / 限流）或
//! 返回不可解析内容：失败时产出 judge_unavailable 标记而非向上抛错，
//! 单次裁判失败绝不中断其余用例的批量评估。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::aut::{AutResponse, JudgeConfig, TestCase};
use crate::llm::{extract_json, LlmClient, Message};
use crate::metrics::pack::{Scorer, JUDGE_SCORE};
use crate::metrics::{MetricResult, MetricValue};

/// 裁判失败标记指标名
pub const JUDGE_UNAVAILABLE: &str = "judge_unavailable";

const JUDGE_SYSTEM_PROMPT: &str = "You are an expert evaluator for agent applications. \
Score the answer strictly against the rubric and respond with JSON only.";

/// 裁判评分器：持有 Oracle 客户端、rubric 配置与独立超时
pub struct JudgeScorer {
    llm: Arc<dyn LlmClient>,
    config: JudgeConfig,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct RawJudgeResponse {
    score: f64,
    #[serde(default)]
    rationale: String,
}

impl JudgeScorer {
    pub fn new(llm: Arc<dyn LlmClient>, config: JudgeConfig, timeout_secs: u64) -> Self {
        Self {
            llm,
            config,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn build_prompt(&self, case: &TestCase, response: &AutResponse) -> String {
        let judge_question = case.judge_question.as_deref().unwrap_or("");
        let expected_behavior = case.expected_behavior.as_deref().unwrap_or("");

        format!(
            r#"Rubric ID: {rubric}

GOLDEN TESTCASE:
- Judge question: {judge_question}
- Expected behavior: {expected_behavior}

MODEL ANSWER:
{answer}

Score the answer on a scale of 1 to 5, where:
1 = Very poor
2 = Weak
3 = Acceptable
4 = Good
5 = Excellent

Return ONLY a JSON object with:
- "score": number (1-5)
- "rationale": short explanation"#,
            rubric = self.config.rubric_id,
            judge_question = judge_question,
            expected_behavior = expected_behavior,
            answer = response.text,
        )
    }

    /// 解析 Oracle 回复：优先 JSON，失败时回退提取文本中第一个 1-5 数字
    fn parse_score(raw: &str) -> Option<(f64, String)> {
        let cleaned = extract_json(raw);
        if let Ok(parsed) = serde_json::from_str::<RawJudgeResponse>(cleaned) {
            return Some((parsed.score, parsed.rationale));
        }

        let re = regex::Regex::new(r"\b([1-5])\b").expect("static regex");
        re.captures(raw)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .map(|score| (score, raw.trim().to_string()))
    }

    /// 不可用标记：无数值分，理由带失败原因
    fn unavailable(case_id: &str, reason: String) -> MetricResult {
        warn!(case = case_id, reason = %reason, "judge unavailable, degrading");
        let mut result = MetricResult::default();
        result.set(JUDGE_UNAVAILABLE, MetricValue::Bool(true));
        result.rationale = Some(reason);
        result
    }
}

#[async_trait]
impl Scorer for JudgeScorer {
    fn name(&self) -> &str {
        JUDGE_SCORE
    }

    async fn score(&self, case: &TestCase, response: &AutResponse) -> MetricResult {
        let messages = [
            Message::system(JUDGE_SYSTEM_PROMPT),
            Message::user(self.build_prompt(case, response)),
        ];

        let raw = match tokio::time::timeout(self.timeout, self.llm.complete(&messages)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return Self::unavailable(&case.id, format!("judge call failed: {}", e)),
            Err(_) => {
                return Self::unavailable(
                    &case.id,
                    format!("judge timed out after {}s", self.timeout.as_secs()),
                )
            }
        };

        match Self::parse_score(&raw) {
            Some((score, rationale)) => {
                let mut result = MetricResult::default();
                result.set(JUDGE_SCORE, MetricValue::Number(score));
                result.rationale = Some(rationale);
                result
            }
            None => Self::unavailable(
                &case.id,
                format!("unparsable judge response: {}", raw.chars().take(200).collect::<String>()),
            ),
        }
    }
}
