//! 供应商调用重试：指数退避 + 取消感知
//!
//! 只重试可重试类错误（超时/限流/传输）；限流时尊重服务端给出的 retry_after。

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::dialog::Message;
use crate::llm::{AssistantTurn, LlmClient, ProviderError};
use crate::tools::ToolSpec;

/// 单次退避上限，防止指数溢出后长眠
const MAX_DELAY_MS: u64 = 30_000;

/// 重试策略
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// 首次尝试之外的最大重试次数
    pub max_retries: u32,
    /// 首次重试前的基础延迟
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
        }
    }
}

/// 第 attempt 次重试前的退避时长（attempt 从 0 起）
pub fn retry_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = attempt.min(30);
    let ms = policy
        .base_delay_ms
        .saturating_mul(2u64.saturating_pow(exponent))
        .min(MAX_DELAY_MS);
    Duration::from_millis(ms)
}

/// 带退避重试的模型查询；取消信号中断等待并返回 Cancelled
pub async fn query_with_retry(
    llm: &dyn LlmClient,
    messages: &[Message],
    tools: &[ToolSpec],
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<AssistantTurn, ProviderError> {
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        let result = tokio::select! {
            r = llm.query(messages, tools) => r,
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        };

        match result {
            Ok(turn) => return Ok(turn),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let mut delay = retry_delay(policy, attempt);
                if let ProviderError::RateLimited { retry_after_ms } = &e {
                    delay = delay.max(Duration::from_millis(*retry_after_ms));
                }
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "provider query failed, backing off"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    /// 前 fail_times 次返回可重试错误，之后成功
    struct FlakyClient {
        fail_times: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmClient for FlakyClient {
        async fn query(
            &self,
            _messages: &[Message],
            _tools: &[ToolSpec],
        ) -> Result<AssistantTurn, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(ProviderError::Transport("connection reset".to_string()))
            } else {
                Ok(AssistantTurn::text("ok"))
            }
        }
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let client = FlakyClient {
            fail_times: 2,
            calls: AtomicU32::new(0),
        };
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay_ms: 1,
        };
        let cancel = CancellationToken::new();
        let turn = query_with_retry(&client, &[], &[], &policy, &cancel)
            .await
            .unwrap();
        assert_eq!(turn.content, "ok");
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_retries() {
        let client = FlakyClient {
            fail_times: 10,
            calls: AtomicU32::new(0),
        };
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay_ms: 1,
        };
        let cancel = CancellationToken::new();
        let err = query_with_retry(&client, &[], &[], &policy, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_auth_error_not_retried() {
        struct AuthFail;
        #[async_trait]
        impl LlmClient for AuthFail {
            async fn query(
                &self,
                _messages: &[Message],
                _tools: &[ToolSpec],
            ) -> Result<AssistantTurn, ProviderError> {
                Err(ProviderError::Auth("bad key".to_string()))
            }
        }
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let err = query_with_retry(&AuthFail, &[], &[], &policy, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Auth(_)));
    }

    #[tokio::test]
    async fn test_cancel_aborts_backoff() {
        let client = FlakyClient {
            fail_times: 10,
            calls: AtomicU32::new(0),
        };
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay_ms: 60_000,
        };
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });
        let err = query_with_retry(&client, &[], &[], &policy, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay_ms: 1_000,
        };
        assert!(retry_delay(&policy, 0) < retry_delay(&policy, 3));
        assert_eq!(retry_delay(&policy, 20), Duration::from_millis(MAX_DELAY_MS));
    }
}
