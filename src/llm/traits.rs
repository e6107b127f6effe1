//! LLM 客户端抽象
//!
//! 具体供应商的请求/响应翻译在本 crate 之外实现；这里只定义 query 接口、
//! 助手回合结构与 ProviderError 分类（可重试 / 不可重试）。

use async_trait::async_trait;
use thiserror::Error;

use crate::dialog::{Message, ToolCall};
use crate::tools::ToolSpec;

/// LLM 传输层错误
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("Request timeout")]
    Timeout,

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Auth error: {0}")]
    Auth(String),

    /// 响应体解析失败（缺 choices、非法 JSON 等）
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// 等待期间收到取消信号
    #[error("Cancelled while waiting for provider")]
    Cancelled,
}

impl ProviderError {
    /// 超时 / 限流 / 传输错误值得重试；鉴权与格式错误不值得
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout
                | ProviderError::RateLimited { .. }
                | ProviderError::Transport(_)
        )
    }
}

/// 一次模型查询的产物：正文 + 零或多个工具调用（按发出顺序）
#[derive(Clone, Debug, Default)]
pub struct AssistantTurn {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantTurn {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
        }
    }

    /// 转为可追加进对话的 assistant 消息
    pub fn into_message(self) -> Message {
        Message::assistant_with_calls(self.content, self.tool_calls)
    }
}

/// LLM 客户端 trait：一次查询挂起到供应商返回、出错或超时
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn query(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<AssistantTurn, ProviderError>;
}
