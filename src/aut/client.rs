//! AUT 客户端抽象
//!
//! run_once 对流水线而言是纯函数：同样的 (version_id, input) 应产生可评分的一次响应，
//! 不允许跨调用共享影响评分的隐藏状态。具体实现（ADK / REST / 本地进程）在本 crate 之外。

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PipelineError;

/// 一次工具调用的轻量表示（写入追踪前已归一化）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// AUT 单次调用的归一化响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutResponse {
    /// 结构化输出（schema 由被测 AUT 决定）
    pub output: Value,
    /// 自由文本回答（规则指标与裁判都读它）
    pub text: String,
    /// AUT 自报的耗时；追踪以 EvalEngine 实测为准
    #[serde(default)]
    pub latency_ms: Option<f64>,
    /// 会话图（不适用时为空对象）
    #[serde(default = "empty_object")]
    pub session_graph: Value,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl AutResponse {
    /// 仅有文本的最小响应
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            output: serde_json::json!({ "answer": text }),
            text,
            latency_ms: None,
            session_graph: empty_object(),
            tool_calls: Vec::new(),
        }
    }
}

/// AUT 客户端 trait：每个 (用例, 版本) 恰好调用一次
#[async_trait]
pub trait AutClient: Send + Sync {
    fn aut_id(&self) -> &str;

    /// 执行一次 AUT 调用；失败返回 AutInvocation 错误，由 EvalEngine 转为失败追踪
    async fn run_once(&self, version_id: &str, input: &Value)
        -> Result<AutResponse, PipelineError>;
}

/// Mock AUT：回显输入，指定 id 的用例可模拟失败或延迟（测试与本地跑通用）
#[derive(Debug, Default)]
pub struct MockAutClient {
    aut_id: String,
    /// 输入中 "id" 命中此集合时 run_once 返回错误
    fail_inputs: BTreeSet<String>,
    /// 每次调用前的人为延迟（测超时用）
    delay: Option<Duration>,
}

impl MockAutClient {
    pub fn new(aut_id: impl Into<String>) -> Self {
        Self {
            aut_id: aut_id.into(),
            fail_inputs: BTreeSet::new(),
            delay: None,
        }
    }

    pub fn fail_on(mut self, input_id: impl Into<String>) -> Self {
        self.fail_inputs.insert(input_id.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl AutClient for MockAutClient {
    fn aut_id(&self) -> &str {
        &self.aut_id
    }

    async fn run_once(
        &self,
        version_id: &str,
        input: &Value,
    ) -> Result<AutResponse, PipelineError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let input_id = input
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if self.fail_inputs.contains(input_id) {
            return Err(PipelineError::AutInvocation(format!(
                "mock failure for input {}",
                input_id
            )));
        }

        let text = format!(
            "[{}@{}] echo: {}",
            self.aut_id, version_id,
            serde_json::to_string(input).unwrap_or_default()
        );
        Ok(AutResponse {
            output: serde_json::json!({ "answer": text }),
            text,
            latency_ms: None,
            session_graph: empty_object(),
            tool_calls: vec![ToolCall {
                name: "echo".to_string(),
                input: input.clone(),
                output: None,
                error: None,
            }],
        })
    }
}
