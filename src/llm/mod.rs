//! LLM Oracle 抽象与实现
//!
//! 裁判指标与规划引擎共用同一个 LlmClient 接口；后端可选 OpenAI 兼容端点或 Mock。

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::{FailingLlmClient, MockLlmClient};
pub use openai::OpenAiClient;
pub use traits::{LlmClient, Message, Role};

/// 从可能带 Markdown 代码围栏的响应中提取 JSON 文本
///
/// Oracle 常把 JSON 包在 ```json ... ``` 里；没有围栏时原样返回（仅去首尾空白）。
pub fn extract_json(response: &str) -> &str {
    let trimmed = response.trim();

    if let Some(start) = trimmed.find("```") {
        let after_start = &trimmed[start + 3..];
        let json_start = if after_start.starts_with("json") {
            after_start.find('\n').map(|i| i + 1).unwrap_or(0)
        } else if after_start.starts_with('\n') {
            1
        } else {
            0
        };
        let content = &after_start[json_start..];
        if let Some(end) = content.find("```") {
            return content[..end].trim();
        }
    }

    trimmed
}
