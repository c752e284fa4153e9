//! 指标聚合：按版本汇总追踪历史与版本对比
//!
//! 全部从追踪存储的读路径现算，不落盘、可重复执行；空历史或半截历史
//! 报计数为零、均值为 None，绝不除零。

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::PipelineError;
use crate::eval::stats;
use crate::metrics::pack::{JUDGE_SCORE, TASK_SUCCESS};
use crate::store::{TraceRecord, TraceStore};

/// 某版本的汇总（派生值，按需重算，从不持久化）
#[derive(Debug, Clone, Serialize)]
pub struct VersionSummary {
    pub version_id: String,
    /// 该版本的追踪条数（含失败追踪）
    pub count: usize,
    /// 主指标统计；无样本时为 None
    pub score_avg: Option<f64>,
    pub score_p50: Option<f64>,
    pub score_p95: Option<f64>,
    pub latency_avg_ms: Option<f64>,
    pub latency_p50_ms: Option<f64>,
    pub latency_p95_ms: Option<f64>,
    /// 平均工具调用次数
    pub mean_tool_calls: Option<f64>,
    /// 主指标低于阈值的条数
    pub failure_count: usize,
    /// (有分样本 - 失败) / 有分样本；无样本时为 None
    pub pass_rate: Option<f64>,
}

/// 两个版本按主指标的对比
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonResult {
    pub version_a: String,
    pub version_b: String,
    /// 实际采用的主指标名
    pub metric: String,
    pub avg_a: Option<f64>,
    pub avg_b: Option<f64>,
    /// avg(b) − avg(a)；任一侧无样本时为 None
    pub delta: Option<f64>,
}

/// 解析主指标名：配置优先；历史里出现过 judge_score 就用它，否则 task_success
pub fn resolve_primary_metric(configured: Option<&str>, records: &[TraceRecord]) -> String {
    if let Some(name) = configured {
        return name.to_string();
    }
    if records.iter().any(|r| r.metrics.get(JUDGE_SCORE).is_some()) {
        JUDGE_SCORE.to_string()
    } else {
        TASK_SUCCESS.to_string()
    }
}

/// 聚合器：只读消费追踪存储
pub struct MetricsAggregator {
    traces: Arc<TraceStore>,
    /// 配置的主指标名；None 时优先 judge_score，否则 task_success
    primary_metric: Option<String>,
    failure_threshold: f64,
}

impl MetricsAggregator {
    pub fn new(
        traces: Arc<TraceStore>,
        primary_metric: Option<String>,
        failure_threshold: f64,
    ) -> Self {
        Self {
            traces,
            primary_metric,
            failure_threshold,
        }
    }

    fn resolve_primary(&self, records: &[TraceRecord]) -> String {
        resolve_primary_metric(self.primary_metric.as_deref(), records)
    }

    fn summarize_records(&self, version_id: &str, metric: &str, records: &[TraceRecord]) -> VersionSummary {
        let scores: Vec<f64> = records
            .iter()
            .filter_map(|r| r.metrics.get(metric))
            .map(|v| v.as_f64())
            .collect();
        let latencies: Vec<f64> = records.iter().filter_map(|r| r.latency_ms).collect();
        let tool_calls: Vec<f64> = records
            .iter()
            .filter(|r| !r.failed)
            .map(|r| r.tool_calls.len() as f64)
            .collect();

        let failure_count = scores
            .iter()
            .filter(|s| **s < self.failure_threshold)
            .count();
        let pass_rate = if scores.is_empty() {
            None
        } else {
            Some((scores.len() - failure_count) as f64 / scores.len() as f64)
        };

        VersionSummary {
            version_id: version_id.to_string(),
            count: records.len(),
            score_avg: stats::mean(&scores),
            score_p50: stats::percentile_nearest_rank(&scores, 50.0),
            score_p95: stats::percentile_nearest_rank(&scores, 95.0),
            latency_avg_ms: stats::mean(&latencies),
            latency_p50_ms: stats::percentile_nearest_rank(&latencies, 50.0),
            latency_p95_ms: stats::percentile_nearest_rank(&latencies, 95.0),
            mean_tool_calls: stats::mean(&tool_calls),
            failure_count,
            pass_rate,
        }
    }

    /// 按版本分组汇总某 AUT 的全部历史
    pub fn summarize(
        &self,
        aut_id: &str,
    ) -> Result<BTreeMap<String, VersionSummary>, PipelineError> {
        let mut by_version: BTreeMap<String, Vec<TraceRecord>> = BTreeMap::new();
        for record in self.traces.load_all()? {
            if record.aut_id != aut_id {
                continue;
            }
            by_version
                .entry(record.version_id.clone())
                .or_default()
                .push(record);
        }

        let all: Vec<TraceRecord> = by_version.values().flatten().cloned().collect();
        let metric = self.resolve_primary(&all);

        Ok(by_version
            .into_iter()
            .map(|(version, records)| {
                let summary = self.summarize_records(&version, &metric, &records);
                (version, summary)
            })
            .collect())
    }

    /// 单版本汇总；没有任何追踪时返回计数为零、均值为 None 的空汇总
    pub fn summary_for(
        &self,
        aut_id: &str,
        version_id: &str,
    ) -> Result<VersionSummary, PipelineError> {
        let records: Vec<TraceRecord> =
            self.traces.load_for_version(aut_id, version_id)?.collect();
        let metric = self.resolve_primary(&records);
        Ok(self.summarize_records(version_id, &metric, &records))
    }

    /// 版本对比：delta = avg(b) − avg(a)，对调参数严格反号
    pub fn compare(
        &self,
        aut_id: &str,
        version_a: &str,
        version_b: &str,
    ) -> Result<ComparisonResult, PipelineError> {
        let records_a: Vec<TraceRecord> =
            self.traces.load_for_version(aut_id, version_a)?.collect();
        let records_b: Vec<TraceRecord> =
            self.traces.load_for_version(aut_id, version_b)?.collect();

        let all: Vec<TraceRecord> = records_a
            .iter()
            .chain(records_b.iter())
            .cloned()
            .collect();
        let metric = self.resolve_primary(&all);

        let avg = |records: &[TraceRecord]| {
            let scores: Vec<f64> = records
                .iter()
                .filter_map(|r| r.metrics.get(&metric))
                .map(|v| v.as_f64())
                .collect();
            stats::mean(&scores)
        };

        let avg_a = avg(&records_a);
        let avg_b = avg(&records_b);
        let delta = match (avg_a, avg_b) {
            (Some(a), Some(b)) => Some(b - a),
            _ => None,
        };

        Ok(ComparisonResult {
            version_a: version_a.to_string(),
            version_b: version_b.to_string(),
            metric,
            avg_a,
            avg_b,
            delta,
        })
    }
}
