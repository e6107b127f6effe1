//! bash 工具：在沙箱 Session 内执行 shell 命令
//!
//! 命令跑在共享 Session 中（cwd、环境随会话延续），因此同一回合内的多个调用
//! 必须顺序执行。非零退出以 success=false 的结果表达；沙箱不可达只让本次调用
//! 失败，不终止引擎。

use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::tools::{schema_value, Tool, ToolContext, ToolResult};

#[derive(Debug, Deserialize, JsonSchema)]
struct BashParams {
    /// 要执行的 shell 命令
    command: String,
    /// 覆盖默认超时（秒）
    #[serde(default)]
    timeout_secs: Option<u64>,
}

/// 沙箱 shell 工具
#[derive(Debug, Default)]
pub struct BashTool;

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a shell command inside the sandboxed session. Working directory and \
         environment persist across calls within the same session."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        schema_value::<BashParams>()
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: serde_json::Value,
    ) -> Result<ToolResult, String> {
        let params: BashParams =
            serde_json::from_value(args).map_err(|e| format!("bad bash arguments: {e}"))?;

        let timeout = params.timeout_secs.map(Duration::from_secs);
        let output = ctx
            .session
            .exec_bash(&params.command, timeout)
            .await
            .map_err(|e| e.to_string())?;

        let mut observation = output.stdout.trim_end().to_string();
        if !output.stderr.trim().is_empty() {
            observation.push_str(&format!("\nstderr: {}", output.stderr.trim()));
        }
        if output.exit_code != 0 {
            observation.push_str(&format!("\nexit code: {}", output.exit_code));
        }

        let info = serde_json::json!({
            "exit_code": output.exit_code,
            "cwd": output.cwd,
        });
        Ok(ToolResult {
            observation,
            info,
            success: output.exit_code == 0,
        })
    }
}
