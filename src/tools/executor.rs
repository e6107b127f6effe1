//! 工具执行器
//!
//! 派发契约：execute(ctx, call) 永不抛错。未知工具、参数不合法、超时、工具报错
//! 乃至 panic 都转为带错误标记的失败 ToolResult，模型总能收到一条终止本次调用的
//! 观察；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio::time::timeout;

use crate::dialog::ToolCall;
use crate::tools::{schema, ToolContext, ToolRegistry, ToolResult, ToolSpec};

/// 工具执行器：对每次调用施加超时与 panic 隔离
pub struct ToolExecutor {
    registry: Arc<RwLock<ToolRegistry>>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<RwLock<ToolRegistry>>, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn registry(&self) -> Arc<RwLock<ToolRegistry>> {
        Arc::clone(&self.registry)
    }

    pub async fn tool_specs(&self) -> Vec<ToolSpec> {
        self.registry.read().await.get_tool_specs()
    }

    pub async fn tool_names(&self) -> Vec<String> {
        self.registry.read().await.tool_names()
    }

    /// 执行一次工具调用；任何内部错误都折叠为失败 ToolResult
    pub async fn execute(&self, ctx: &ToolContext, call: &ToolCall) -> ToolResult {
        let start = Instant::now();

        let tool = self.registry.read().await.get(&call.name);
        let (result, outcome) = match tool {
            None => (
                ToolResult::failure(format!("unknown tool: {}", call.name)),
                "unknown_tool",
            ),
            Some(tool) => {
                if let Err(reason) = schema::validate_args(&tool.parameters_schema(), &call.arguments)
                {
                    (
                        ToolResult::failure(format!("invalid arguments: {reason}")),
                        "invalid_args",
                    )
                } else {
                    self.dispatch(tool, ctx, call).await
                }
            }
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "call_id": call.id,
            "ok": result.success,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.arguments),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }

    /// 在独立任务中运行工具：panic 只打死那个任务，超时后中止它
    async fn dispatch(
        &self,
        tool: Arc<dyn crate::tools::Tool>,
        ctx: &ToolContext,
        call: &ToolCall,
    ) -> (ToolResult, &'static str) {
        let ctx = ctx.clone();
        let args = call.arguments.clone();
        let handle = tokio::spawn(async move { tool.execute(&ctx, args).await });
        let abort = handle.abort_handle();

        match timeout(self.timeout, handle).await {
            Ok(Ok(Ok(result))) => {
                let outcome = if result.success { "ok" } else { "failed" };
                (result, outcome)
            }
            Ok(Ok(Err(reason))) => (ToolResult::failure(reason), "error"),
            Ok(Err(join_err)) if join_err.is_panic() => (
                ToolResult::failure(format!("tool panicked: {join_err}")),
                "panic",
            ),
            Ok(Err(join_err)) => (
                ToolResult::failure(format!("tool task aborted: {join_err}")),
                "aborted",
            ),
            Err(_) => {
                abort.abort();
                (
                    ToolResult::failure(format!(
                        "tool timed out after {}s",
                        self.timeout.as_secs()
                    )),
                    "timeout",
                )
            }
        }
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{LocalSession, Session};
    use crate::tools::{Tool, TOOL_ERROR_MARKER};

    use async_trait::async_trait;

    struct PanickyTool;

    #[async_trait]
    impl Tool for PanickyTool {
        fn name(&self) -> &str {
            "panicky"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        async fn execute(
            &self,
            _ctx: &ToolContext,
            _args: serde_json::Value,
        ) -> Result<ToolResult, String> {
            panic!("boom");
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps forever"
        }
        async fn execute(
            &self,
            _ctx: &ToolContext,
            _args: serde_json::Value,
        ) -> Result<ToolResult, String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ToolResult::ok("never reached"))
        }
    }

    async fn executor_with(registry: ToolRegistry) -> (ToolExecutor, ToolContext, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(LocalSession::new(dir.path()));
        session.open().await.unwrap();
        (
            ToolExecutor::new(Arc::new(RwLock::new(registry)), 1),
            ToolContext::new(session),
            dir,
        )
    }

    #[tokio::test]
    async fn test_unknown_tool_is_failure_result() {
        let (executor, ctx, _dir) = executor_with(ToolRegistry::new()).await;
        let call = ToolCall::new("nope", serde_json::json!({}));
        let result = executor.execute(&ctx, &call).await;
        assert!(!result.success);
        assert!(result.observation.starts_with(TOOL_ERROR_MARKER));
    }

    #[tokio::test]
    async fn test_panicking_tool_is_contained() {
        let mut registry = ToolRegistry::new();
        registry.register(PanickyTool).unwrap();
        let (executor, ctx, _dir) = executor_with(registry).await;
        let call = ToolCall::new("panicky", serde_json::json!({}));
        let result = executor.execute(&ctx, &call).await;
        assert!(!result.success);
        assert!(result.observation.contains("panicked"));
    }

    #[tokio::test]
    async fn test_slow_tool_times_out() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool).unwrap();
        let (executor, ctx, _dir) = executor_with(registry).await;
        let call = ToolCall::new("slow", serde_json::json!({}));
        let result = executor.execute(&ctx, &call).await;
        assert!(!result.success);
        assert!(result.observation.contains("timed out"));
    }

    #[tokio::test]
    async fn test_invalid_args_rejected_before_dispatch() {
        let mut registry = ToolRegistry::new();
        registry.register(crate::tools::EchoTool).unwrap();
        let (executor, ctx, _dir) = executor_with(registry).await;
        let call = ToolCall::new("echo", serde_json::json!({"text": 5}));
        let result = executor.execute(&ctx, &call).await;
        assert!(!result.success);
        assert!(result.observation.contains("invalid arguments"));
    }
}
