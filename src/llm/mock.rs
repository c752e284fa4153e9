//! Mock LLM 客户端（用于测试与本地调试，无需 API）
//!
//! MockLlmClient 按脚本依次返回预设响应，脚本用尽后返回兜底响应；
//! FailingLlmClient 永远失败，用于验证裁判降级与规划 Oracle 的致命路径。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, Message};

/// Mock 客户端：固定响应或按脚本逐条返回
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<String>>,
    fallback: String,
}

impl MockLlmClient {
    /// 每次调用都返回同一条响应
    pub fn with_response(text: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: text.into(),
        }
    }

    /// 按脚本依次返回，用尽后返回最后一条
    pub fn with_script(responses: Vec<String>) -> Self {
        let fallback = responses.last().cloned().unwrap_or_default();
        Self {
            script: Mutex::new(responses.into()),
            fallback,
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
        let mut script = self.script.lock().map_err(|e| e.to_string())?;
        Ok(script.pop_front().unwrap_or_else(|| self.fallback.clone()))
    }
}

/// 永远失败的客户端：模拟网络 / 限流错误
#[derive(Debug)]
pub struct FailingLlmClient {
    pub message: String,
}

impl FailingLlmClient {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl LlmClient for FailingLlmClient {
    async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
        Err(self.message.clone())
    }
}
