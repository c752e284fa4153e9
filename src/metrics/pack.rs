//! 指标包：规则评分器与裁判评分器的组合
//!
//! 包按名从注册表取出，由 AUT 规格的 evaluation.default_pack 选择，
//! EvalEngine 不得硬编码包名。规格的 metrics 列表决定包内哪些评分器生效：
//! 列表为空表示全开；引用 judge_score 的任意聚合名（judge_score_avg 等）
//! 即启用裁判。

use std::sync::Arc;

use async_trait::async_trait;

use crate::aut::{AutResponse, AutSpec, TestCase};
use crate::error::PipelineError;
use crate::llm::LlmClient;
use crate::metrics::judge::JudgeScorer;
use crate::metrics::{MetricResult, MetricValue};

/// 规则指标名
pub const TASK_SUCCESS: &str = "task_success";
pub const EXPECTED_KEYWORDS: &str = "expected_keywords";
/// 裁判指标名
pub const JUDGE_SCORE: &str = "judge_score";

/// 评分能力接口：规则与裁判统一为 score(用例, 响应) -> MetricResult
///
/// 评分器不返回错误——规则指标把坏输入记成失败值，裁判把调用失败记成
/// judge_unavailable，单个评分器的问题不能拖垮整批评估。
#[async_trait]
pub trait Scorer: Send + Sync {
    fn name(&self) -> &str;

    async fn score(&self, case: &TestCase, response: &AutResponse) -> MetricResult;
}

/// 规则：非空回答即任务成功
///
/// 输出缺 text（AUT 输出字段不全）时记 false，而不是报错。
#[derive(Debug, Default)]
pub struct TaskSuccessScorer;

#[async_trait]
impl Scorer for TaskSuccessScorer {
    fn name(&self) -> &str {
        TASK_SUCCESS
    }

    async fn score(&self, _case: &TestCase, response: &AutResponse) -> MetricResult {
        let mut result = MetricResult::default();
        let success = !response.text.trim().is_empty();
        result.set(TASK_SUCCESS, MetricValue::Bool(success));
        result
    }
}

/// 规则：expected_behavior 关键词覆盖率（0.0 - 1.0）
///
/// 纯文本包含判断，不做语义匹配；用例没有 expected_behavior 时不产出指标。
#[derive(Debug, Default)]
pub struct ExpectedKeywordsScorer;

impl ExpectedKeywordsScorer {
    fn keywords(expected: &str) -> Vec<String> {
        expected
            .split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|w| w.chars().count() > 3)
            .collect()
    }
}

#[async_trait]
impl Scorer for ExpectedKeywordsScorer {
    fn name(&self) -> &str {
        EXPECTED_KEYWORDS
    }

    async fn score(&self, case: &TestCase, response: &AutResponse) -> MetricResult {
        let mut result = MetricResult::default();
        let Some(expected) = case.expected_behavior.as_deref() else {
            return result;
        };
        let keywords = Self::keywords(expected);
        if keywords.is_empty() {
            return result;
        }
        let text = response.text.to_lowercase();
        let hit = keywords.iter().filter(|k| text.contains(k.as_str())).count();
        result.set(
            EXPECTED_KEYWORDS,
            MetricValue::Number(hit as f64 / keywords.len() as f64),
        );
        result
    }
}

/// 指标包：零或多个规则评分器 + 零或一个裁判评分器，输出合并为一个 MetricResult
pub struct MetricPack {
    name: String,
    scorers: Vec<Box<dyn Scorer>>,
}

impl MetricPack {
    pub fn new(name: impl Into<String>, scorers: Vec<Box<dyn Scorer>>) -> Self {
        Self {
            name: name.into(),
            scorers,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 依次运行包内评分器并合并输出
    pub async fn evaluate(&self, case: &TestCase, response: &AutResponse) -> MetricResult {
        let mut merged = MetricResult::default();
        for scorer in &self.scorers {
            merged.merge(scorer.score(case, response).await);
        }
        merged
    }
}

/// 规格的 metrics 列表是否启用某评分器
fn wants_metric(metrics: &[String], name: &str) -> bool {
    if metrics.is_empty() {
        // 未声明任何指标时全开
        return true;
    }
    match name {
        // judge_score 或其任意聚合（judge_score_avg / judge_score_p95）都算启用
        JUDGE_SCORE => metrics.iter().any(|m| m.starts_with(JUDGE_SCORE)),
        other => metrics.iter().any(|m| m == other),
    }
}

/// 按名构建指标包
///
/// - `generic`: task_success + 可选裁判
/// - `strict`: generic 外加 expected_keywords
///
/// 未知包名是配置错误；规格启用了裁判但未提供 Oracle 客户端同样报错
/// （绝不静默跳过裁判）。
pub fn build_pack(
    name: &str,
    spec: &AutSpec,
    judge_llm: Option<Arc<dyn LlmClient>>,
    judge_timeout_secs: u64,
) -> Result<MetricPack, PipelineError> {
    let metrics = &spec.evaluation.metrics;
    let mut scorers: Vec<Box<dyn Scorer>> = Vec::new();

    match name {
        "generic" => {
            if wants_metric(metrics, TASK_SUCCESS) {
                scorers.push(Box::new(TaskSuccessScorer));
            }
        }
        "strict" => {
            if wants_metric(metrics, TASK_SUCCESS) {
                scorers.push(Box::new(TaskSuccessScorer));
            }
            if wants_metric(metrics, EXPECTED_KEYWORDS) {
                scorers.push(Box::new(ExpectedKeywordsScorer));
            }
        }
        other => {
            return Err(PipelineError::Config(format!(
                "unknown metric pack: {}",
                other
            )))
        }
    }

    if wants_metric(metrics, JUDGE_SCORE) {
        let llm = judge_llm.ok_or_else(|| {
            PipelineError::Config(format!(
                "pack {} requires a judge oracle but none was provided",
                name
            ))
        })?;
        scorers.push(Box::new(JudgeScorer::new(
            llm,
            spec.evaluation.judge.clone(),
            judge_timeout_secs,
        )));
    }

    Ok(MetricPack::new(name, scorers))
}
