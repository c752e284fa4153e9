//! 流水线错误类型
//!
//! 分层：协作方调用错误（AUT / 裁判 / 规划 Oracle）、存储错误、配置错误。
//! 单条用例的失败只记入追踪，不会中断整批评估；规划 Oracle 失败对该次调用是致命的。

use std::path::PathBuf;

use thiserror::Error;

/// 评估与改进流水线可能出现的错误
#[derive(Error, Debug)]
pub enum PipelineError {
    /// AUT 调用失败（网络、崩溃等）；由 EvalEngine 转为失败追踪，不向上传播
    #[error("AUT invocation failed: {0}")]
    AutInvocation(String),

    /// AUT 调用超时（秒）
    #[error("AUT invocation timed out after {0}s")]
    AutTimeout(u64),

    /// 规划 Oracle 调用失败：对本次 propose_changeset 致命，携带上下文供重试
    #[error("planning oracle failed for {aut_id}@{version_id}: {message}")]
    OracleCall {
        aut_id: String,
        version_id: String,
        message: String,
    },

    /// 存储文件存在但不可读（权限等）：致命配置错误；文件缺失不算错误
    #[error("store unreadable: {path}")]
    StoreUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 追加写入失败
    #[error("store append failed: {path}")]
    StoreAppend {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 记录序列化失败（写入前）
    #[error("record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// 配置错误（未知指标包、AUT 规格缺字段等）：在 Eval / Planner 启动时立即暴露
    #[error("configuration error: {0}")]
    Config(String),
}
