//! 回合过程事件：供前端流式展示思考、工具调用、观察与终态

use serde::Serialize;

/// 单回合过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 回合开始（当前第几回合）
    TurnStarted { turn: usize, max_turns: usize },
    /// 正在调用 LLM
    Thinking,
    /// assistant 正文（预览，避免过长）
    AssistantMessage { preview: String },
    /// 派发工具调用
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览）
    Observation {
        tool: String,
        preview: String,
        success: bool,
    },
    /// 本回合没有工具调用，注入催促消息
    Nudge { count: usize },
    /// 任务终态
    Terminal {
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// 错误
    Error { text: String },
}
