//! 沙箱文件系统工具
//!
//! read_file / write_file 走 Session 的 download / upload，路径由 Session 层
//! 解析并强制约束在工作区根下（禁止 ../ 逃逸），不信任工具实参。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::tools::{schema_value, Tool, ToolContext, ToolResult};

/// 回给模型的文件内容上限，超出部分截断
const MAX_READ_CHARS: usize = 16_000;

#[derive(Debug, Deserialize, JsonSchema)]
struct ReadFileParams {
    /// 相对工作区根的文件路径
    path: String,
}

/// 读文件工具
#[derive(Debug, Default)]
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the sandbox workspace. The path is resolved against the \
         workspace root; escaping it is rejected."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        schema_value::<ReadFileParams>()
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: serde_json::Value,
    ) -> Result<ToolResult, String> {
        let params: ReadFileParams =
            serde_json::from_value(args).map_err(|e| format!("bad read_file arguments: {e}"))?;

        let bytes = ctx
            .session
            .download(&params.path)
            .await
            .map_err(|e| e.to_string())?;
        let text = String::from_utf8_lossy(&bytes);

        let observation = if text.chars().count() > MAX_READ_CHARS {
            let truncated: String = text.chars().take(MAX_READ_CHARS).collect();
            format!("{truncated}\n... [truncated]")
        } else {
            text.into_owned()
        };
        Ok(ToolResult::ok_with_info(
            observation,
            serde_json::json!({"path": params.path, "bytes": bytes.len()}),
        ))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct WriteFileParams {
    /// 相对工作区根的文件路径
    path: String,
    /// 完整文件内容
    content: String,
}

/// 写文件工具
#[derive(Debug, Default)]
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write a file into the sandbox workspace, replacing any existing content. \
         Parent directories are created as needed."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        schema_value::<WriteFileParams>()
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: serde_json::Value,
    ) -> Result<ToolResult, String> {
        let params: WriteFileParams =
            serde_json::from_value(args).map_err(|e| format!("bad write_file arguments: {e}"))?;

        let bytes = params.content.as_bytes();
        ctx.session
            .upload(&params.path, bytes)
            .await
            .map_err(|e| e.to_string())?;
        Ok(ToolResult::ok_with_info(
            format!("wrote {} bytes to {}", bytes.len(), params.path),
            serde_json::json!({"path": params.path, "bytes": bytes.len()}),
        ))
    }
}
