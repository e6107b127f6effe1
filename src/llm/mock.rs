//! Mock LLM 客户端（用于测试与离线演示，无需 API）
//!
//! MockLlmClient：第一回合回显用户输入为 echo 调用，第二回合调用 finish，
//! 便于本地完整跑通「查询 → 工具 → 终态」循环。
//! ScriptedLlmClient：按脚本逐回合出牌，供测试精确控制引擎行为。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::dialog::{Message, Role, ToolCall};
use crate::llm::{AssistantTurn, LlmClient, ProviderError};
use crate::tools::ToolSpec;

/// Mock 客户端：echo 一次后 finish
#[derive(Debug, Default)]
pub struct MockLlmClient {
    turns: AtomicUsize,
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn query(
        &self,
        messages: &[Message],
        _tools: &[ToolSpec],
    ) -> Result<AssistantTurn, ProviderError> {
        let n = self.turns.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            let last_user = messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.as_str())
                .unwrap_or("(no input)");
            Ok(AssistantTurn::with_calls(
                "echoing the task back",
                vec![ToolCall::new(
                    "echo",
                    serde_json::json!({"text": format!("Echo from Mock: {last_user}")}),
                )],
            ))
        } else {
            Ok(AssistantTurn::with_calls(
                "task done",
                vec![ToolCall::new(
                    "finish",
                    serde_json::json!({"result": "mock run finished"}),
                )],
            ))
        }
    }
}

/// 脚本客户端：query 依次弹出脚本项；脚本耗尽后返回空回合（无工具调用）
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<AssistantTurn, ProviderError>>>,
}

impl ScriptedLlmClient {
    pub fn new(turns: Vec<Result<AssistantTurn, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(turns.into()),
        }
    }

    /// 全部成功回合的便捷构造
    pub fn from_turns(turns: Vec<AssistantTurn>) -> Self {
        Self::new(turns.into_iter().map(Ok).collect())
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn query(
        &self,
        _messages: &[Message],
        _tools: &[ToolSpec],
    ) -> Result<AssistantTurn, ProviderError> {
        let next = self.script.lock().expect("script lock poisoned").pop_front();
        match next {
            Some(item) => item,
            None => Ok(AssistantTurn::text("(script exhausted)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_echo_then_finish() {
        let mock = MockLlmClient::default();
        let msgs = vec![Message::user("hello")];
        let first = mock.query(&msgs, &[]).await.unwrap();
        assert_eq!(first.tool_calls[0].name, "echo");
        let second = mock.query(&msgs, &[]).await.unwrap();
        assert_eq!(second.tool_calls[0].name, "finish");
    }

    #[tokio::test]
    async fn test_scripted_client_plays_in_order() {
        let client = ScriptedLlmClient::from_turns(vec![
            AssistantTurn::text("one"),
            AssistantTurn::text("two"),
        ]);
        assert_eq!(client.query(&[], &[]).await.unwrap().content, "one");
        assert_eq!(client.query(&[], &[]).await.unwrap().content, "two");
        assert!(client
            .query(&[], &[])
            .await
            .unwrap()
            .content
            .contains("exhausted"));
    }
}
