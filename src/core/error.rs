//! Agent 错误类型
//!
//! 恢复顺序：工具级 / 作业级错误先就地转为失败观察或重试，只有到达终态才记录
//! 显式原因码；任何失败都不允许静默。

use thiserror::Error;

/// Agent 运行过程中可能出现的错误（供应商、上下文、工具、沙箱、作业等）
#[derive(Error, Debug)]
pub enum AgentError {
    /// LLM 传输/鉴权失败；带退避重试，重试耗尽后升级为终态
    #[error("Provider error: {0}")]
    Provider(#[from] crate::llm::ProviderError),

    /// 工具代码抛错；只作为失败观察回给模型，永不终止循环
    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    /// 最小保留内容也超出 token 预算；立即致命
    #[error("Context overflow: minimal dialog needs {needed} tokens, budget is {budget}")]
    ContextOverflow { needed: usize, budget: usize },

    /// 连续无工具调用回合超过上限
    #[error("Stalled after {0} consecutive turns without tool calls")]
    Stalled(usize),

    #[error("Max turns exceeded: {0}")]
    MaxTurnsExceeded(usize),

    /// 沙箱不可达；只对当前工具调用致命，作为失败观察上报
    #[error("Session error: {0}")]
    Session(#[from] crate::sandbox::SessionError),

    #[error("Job error: {0}")]
    Job(String),

    #[error("Duplicate tool: {0}")]
    DuplicateTool(String),

    #[error("Bridge error: {0}")]
    Bridge(#[from] crate::bridge::BridgeError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    #[error("Cancelled")]
    Cancelled,
}
