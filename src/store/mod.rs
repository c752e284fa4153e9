//! 追加写存储（JSONL）
//!
//! 追踪存储与最佳实践记忆共用同一套日志抽象：一行一条自包含 JSON 记录，
//! 追加是唯一写路径，读取是惰性、可重启的行迭代。并发写只需在"追加边界"
//! 上互斥，已写内容永不回改。

pub mod memory;
pub mod traces;

pub use memory::{BestPracticeEntry, BestPracticesMemory};
pub use traces::{TraceRecord, TraceStore};

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Lines, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::PipelineError;

/// 追加写 JSONL 日志
///
/// 单条 append 在进程内经 Mutex 串行化，文件以 O_APPEND 打开并一次 write_all
/// 整行，保证两条记录的字节不会交错。
pub(crate) struct JsonlLog<T> {
    path: PathBuf,
    append_lock: Mutex<()>,
    _marker: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> JsonlLog<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 追加一条记录（一行）；父目录不存在时自动创建
    pub fn append(&self, record: &T) -> Result<(), PipelineError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self
            .append_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PipelineError::StoreAppend {
                path: self.path.clone(),
                source: e,
            })?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| PipelineError::StoreAppend {
                path: self.path.clone(),
                source: e,
            })?;
        file.write_all(line.as_bytes())
            .map_err(|e| PipelineError::StoreAppend {
                path: self.path.clone(),
                source: e,
            })?;
        Ok(())
    }

    /// 惰性读取全部记录（写入顺序）
    ///
    /// 文件缺失视为空存储；存在但打不开（权限）是致命错误。
    /// 坏行（如上次崩溃留下的截断行）跳过并告警，不中断读取。
    pub fn read_all(&self) -> Result<JsonlIter<T>, PipelineError> {
        let file = match File::open(&self.path) {
            Ok(f) => Some(f),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(PipelineError::StoreUnreadable {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };
        Ok(JsonlIter {
            lines: file.map(|f| BufReader::new(f).lines()),
            path: self.path.clone(),
            lineno: 0,
            _marker: PhantomData,
        })
    }
}

/// JsonlLog 的惰性迭代器；每次 read_all 都从头重新打开文件
pub struct JsonlIter<T> {
    lines: Option<Lines<BufReader<File>>>,
    path: PathBuf,
    lineno: usize,
    _marker: PhantomData<T>,
}

impl<T: DeserializeOwned> Iterator for JsonlIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let lines = self.lines.as_mut()?;
        loop {
            self.lineno += 1;
            let line = match lines.next()? {
                Ok(l) => l,
                Err(e) => {
                    warn!(path = %self.path.display(), line = self.lineno, error = %e, "store read error, stopping iteration");
                    return None;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(&line) {
                Ok(record) => return Some(record),
                Err(e) => {
                    warn!(path = %self.path.display(), line = self.lineno, error = %e, "skipping malformed record");
                }
            }
        }
    }
}
