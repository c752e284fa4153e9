//! 最佳实践记忆：跨版本沉淀的经验库
//!
//! 不是用户聊天历史，而是"什么样算好"的短课程，按指标 / 领域松散归类，
//! 供规划引擎在 Prompt 中注入。与追踪存储同一套追加写契约。

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::store::{JsonlIter, JsonlLog};

/// 一条最佳实践（落盘一行 JSON：{id, timestamp, metric_or_domain, text}）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestPracticeEntry {
    #[serde(default)]
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// 所属指标或领域（如 "judge_score"、"latency"、"general"）
    pub metric_or_domain: String,
    pub text: String,
}

impl BestPracticeEntry {
    pub fn new(metric_or_domain: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            timestamp: Utc::now(),
            metric_or_domain: metric_or_domain.into(),
            text: text.into(),
        }
    }
}

/// 追加写最佳实践存储（JSONL）
pub struct BestPracticesMemory {
    log: JsonlLog<BestPracticeEntry>,
}

impl BestPracticesMemory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            log: JsonlLog::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.log.path()
    }

    /// 追加一条实践，返回 id；id 为空时在此分配
    pub fn append(&self, mut entry: BestPracticeEntry) -> Result<String, PipelineError> {
        if entry.id.is_empty() {
            entry.id = uuid::Uuid::new_v4().to_string();
        }
        let id = entry.id.clone();
        self.log.append(&entry)?;
        Ok(id)
    }

    /// 全量读取；过滤与排序由消费方（规划引擎）在进程内完成
    pub fn load_all(&self) -> Result<JsonlIter<BestPracticeEntry>, PipelineError> {
        self.log.read_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let memory = BestPracticesMemory::new(dir.path().join("bank.jsonl"));

        let id = memory
            .append(BestPracticeEntry::new(
                "judge_score",
                "Always include an assumptions section in itineraries.",
            ))
            .unwrap();
        memory
            .append(BestPracticeEntry::new("latency", "Cache tool results."))
            .unwrap();

        let entries: Vec<_> = memory.load_all().unwrap().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].metric_or_domain, "judge_score");
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let memory = BestPracticesMemory::new(dir.path().join("nope.jsonl"));
        assert_eq!(memory.load_all().unwrap().count(), 0);
    }
}
