//! 工具箱：Tool trait、注册表、执行器与内置工具
//!
//! 内置工具（finish / echo / bash / read_file / write_file）都经由沙箱 Session
//! 触碰文件系统；协议桥代理的远程工具与本地工具共用同一 Registry 与调度契约。

pub mod bash;
pub mod echo;
pub mod executor;
pub mod filesystem;
pub mod finish;
pub mod registry;
pub mod schema;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::sandbox::Session;

pub use bash::BashTool;
pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use filesystem::{ReadFileTool, WriteFileTool};
pub use finish::{FinishTool, FINISH_TOOL_NAME};
pub use registry::ToolRegistry;
pub use schema::{schema_value, validate_args};

/// 失败观察的显式错误标记；模型看到它就知道该调用没有成功
pub const TOOL_ERROR_MARKER: &str = "[tool_error]";

/// 工具描述：名称唯一、描述供模型理解、参数为 JSON Schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// 工具执行结果：观察文本 + 结构化侧信道 + 成败判别
///
/// 失败是数据不是控制流：远程错误、超时、非零退出都以 success=false 表达。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    /// 回给模型的观察文本
    pub observation: String,
    /// 结构化元数据（exit_code、耗时等），不进入模型上下文
    #[serde(default)]
    pub info: serde_json::Value,
    pub success: bool,
}

impl ToolResult {
    pub fn ok(observation: impl Into<String>) -> Self {
        Self {
            observation: observation.into(),
            info: serde_json::Value::Null,
            success: true,
        }
    }

    pub fn ok_with_info(observation: impl Into<String>, info: serde_json::Value) -> Self {
        Self {
            observation: observation.into(),
            info,
            success: true,
        }
    }

    /// 失败结果；观察文本携带显式错误标记
    pub fn failure(reason: impl AsRef<str>) -> Self {
        Self {
            observation: format!("{} {}", TOOL_ERROR_MARKER, reason.as_ref()),
            info: serde_json::Value::Null,
            success: false,
        }
    }

    pub fn failure_with_info(reason: impl AsRef<str>, info: serde_json::Value) -> Self {
        Self {
            info,
            ..Self::failure(reason)
        }
    }
}

/// 工具执行上下文：共享沙箱会话与取消信号
#[derive(Clone)]
pub struct ToolContext {
    pub session: Arc<dyn Session>,
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self {
            session,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// 工具 trait：名称、描述、参数 Schema、异步执行
///
/// execute 返回 Err 表示工具代码本身出错（异常路径），由执行器统一转为失败
/// ToolResult；Ok 内的 success=false 表示工具正常运行但结果是失败（数据路径）。
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认空对象表示无参数
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: serde_json::Value,
    ) -> Result<ToolResult, String>;

    /// 生成注册表/提示词使用的 ToolSpec
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}
