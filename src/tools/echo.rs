//! Echo 工具（冒烟测试用）

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::tools::{schema_value, Tool, ToolContext, ToolResult};

#[derive(Debug, Deserialize, JsonSchema)]
struct EchoParams {
    /// 要回显的文本
    text: String,
}

/// Echo 工具：回显文本
#[derive(Debug, Default)]
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text back verbatim (smoke test tool)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        schema_value::<EchoParams>()
    }

    async fn execute(
        &self,
        _ctx: &ToolContext,
        args: serde_json::Value,
    ) -> Result<ToolResult, String> {
        let params: EchoParams =
            serde_json::from_value(args).map_err(|e| format!("bad echo arguments: {e}"))?;
        Ok(ToolResult::ok(params.text))
    }
}
