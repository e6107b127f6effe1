//! finish 工具：模型宣告任务完成
//!
//! 引擎看到该调用即置 Terminal(completed)，同批次后续调用全部忽略。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::tools::{schema_value, Tool, ToolContext, ToolResult};

pub const FINISH_TOOL_NAME: &str = "finish";

#[derive(Debug, Deserialize, JsonSchema)]
struct FinishParams {
    /// 交给用户的最终结果
    result: String,
}

/// 任务完成工具
#[derive(Debug, Default)]
pub struct FinishTool;

#[async_trait]
impl Tool for FinishTool {
    fn name(&self) -> &str {
        FINISH_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Declare the task finished and hand the final result back to the user. \
         Call this exactly once, when no further tool calls are needed."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        schema_value::<FinishParams>()
    }

    async fn execute(
        &self,
        _ctx: &ToolContext,
        args: serde_json::Value,
    ) -> Result<ToolResult, String> {
        let params: FinishParams =
            serde_json::from_value(args).map_err(|e| format!("bad finish arguments: {e}"))?;
        Ok(ToolResult::ok(params.result))
    }
}
