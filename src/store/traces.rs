//! 追踪存储：每次 AUT 调用 + 评分的不可变记录
//!
//! 追加后记录永不修改、永不删除——纠正以新记录表达。读路径按写入顺序
//! 惰性重放，按 (aut_id, version_id) 过滤即得某版本的序列。

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aut::ToolCall;
use crate::error::PipelineError;
use crate::metrics::MetricResult;
use crate::store::{JsonlIter, JsonlLog};

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// 一条追踪记录（落盘即一行自包含 JSON）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    /// 写入时生成；为空串则由 append 分配
    #[serde(default)]
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
    pub aut_id: String,
    pub version_id: String,
    pub input: Value,
    pub output: Value,
    #[serde(default)]
    pub metrics: MetricResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// 不适用时为空对象
    #[serde(default = "empty_object")]
    pub session_graph: Value,
    /// AUT 调用本身失败（含超时）时置位；此时 output 为空、metrics 为空
    #[serde(default)]
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TraceRecord {
    /// 新记录：时间戳取当前 UTC，trace_id 留待 append 分配
    pub fn new(aut_id: impl Into<String>, version_id: impl Into<String>, input: Value) -> Self {
        Self {
            trace_id: String::new(),
            timestamp: Utc::now(),
            aut_id: aut_id.into(),
            version_id: version_id.into(),
            input,
            output: empty_object(),
            metrics: MetricResult::default(),
            latency_ms: None,
            tool_calls: Vec::new(),
            session_graph: empty_object(),
            failed: false,
            error: None,
        }
    }
}

/// 追加写追踪存储（JSONL）
pub struct TraceStore {
    log: JsonlLog<TraceRecord>,
}

impl TraceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            log: JsonlLog::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.log.path()
    }

    /// 追加一条记录，返回 trace_id；id 为空时在此分配
    pub fn append(&self, mut record: TraceRecord) -> Result<String, PipelineError> {
        if record.trace_id.is_empty() {
            record.trace_id = uuid::Uuid::new_v4().to_string();
        }
        let trace_id = record.trace_id.clone();
        self.log.append(&record)?;
        Ok(trace_id)
    }

    /// 全量读取（写入顺序，惰性）；文件缺失视为空，坏行跳过并告警
    pub fn load_all(&self) -> Result<JsonlIter<TraceRecord>, PipelineError> {
        self.log.read_all()
    }

    /// 某 AUT 某版本的追踪序列（load_all 的过滤）
    pub fn load_for_version(
        &self,
        aut_id: &str,
        version_id: &str,
    ) -> Result<impl Iterator<Item = TraceRecord>, PipelineError> {
        let aut_id = aut_id.to_string();
        let version_id = version_id.to_string();
        Ok(self
            .load_all()?
            .filter(move |r| r.aut_id == aut_id && r.version_id == version_id))
    }
}
