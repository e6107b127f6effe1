//! Agent 回合引擎
//!
//! Init → Turn(query) → Turn(dispatch) → Turn(update) → {continue | Terminal}。
//! 每回合：备上下文 → 查询模型（带退避重试）→ 顺序派发工具调用 → 回填结果 →
//! 记 StepRecord → 终止检查。无工具调用注入催促消息，超过上限判 stalled；
//! finish 调用立即完成并忽略同批后续调用；到 max_turns 强制失败。
//! 取消信号在两个挂起点（模型查询、回合边界）生效，取消记为 Terminal(cancelled)。

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::context::ContextManager;
use crate::dialog::{Dialog, Message, StepRecord, TaskStatus, Trajectory, TrajectoryWriter};
use crate::engine::AgentEvent;
use crate::llm::{query_with_retry, LlmClient, ProviderError, RetryPolicy};
use crate::sandbox::Session;
use crate::tools::{ToolContext, ToolExecutor, FINISH_TOOL_NAME};

/// 终态原因码
pub mod reason {
    pub const LLM_UNAVAILABLE: &str = "llm_unavailable";
    pub const STALLED: &str = "stalled";
    pub const MAX_TURNS_EXCEEDED: &str = "max_turns_exceeded";
    pub const CONTEXT_OVERFLOW: &str = "context_overflow";
}

/// assistant 正文预览最大字符数
const ASSISTANT_PREVIEW_CHARS: usize = 200;
/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 无工具调用时注入的催促消息
const NUDGE_PROMPT: &str = "Continue with the task. Call a tool to make progress, \
or call `finish` with the final result if the task is complete.";

/// 引擎配置
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// 单任务最大回合数，防止死循环
    pub max_turns: usize,
    /// 连续无工具调用的催促上限，超过判 stalled
    pub max_nudges: usize,
    /// 是否把 ToolSpec 附进提示词；工具本身始终注册且可调用
    pub enable_tools: bool,
    pub system_prompt: String,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            max_nudges: 3,
            enable_tools: true,
            system_prompt: "You are a task-execution agent. Use the available tools to \
                            complete the task, then call `finish` with the result."
                .to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// 回合引擎：独占自己的 Dialog 与 Trajectory，逐回合推进
pub struct TurnEngine {
    llm: Arc<dyn LlmClient>,
    executor: ToolExecutor,
    session: Arc<dyn Session>,
    context: ContextManager,
    config: EngineConfig,
    writer: Option<TrajectoryWriter>,
    event_tx: Option<mpsc::UnboundedSender<AgentEvent>>,
    cancel: CancellationToken,
}

impl TurnEngine {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: ToolExecutor,
        session: Arc<dyn Session>,
        context: ContextManager,
        config: EngineConfig,
    ) -> Self {
        Self {
            llm,
            executor,
            session,
            context,
            config,
            writer: None,
            event_tx: None,
            cancel: CancellationToken::new(),
        }
    }

    /// 显式注入轨迹写入器（每个 Agent 各自持有，无进程级共享路径）
    pub fn with_writer(mut self, writer: TrajectoryWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<AgentEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 执行一个任务直到终态；一切失败都落进轨迹的原因码，不向外抛
    pub async fn run(&mut self, task: &str) -> Trajectory {
        let task_id = uuid::Uuid::new_v4().to_string();
        let mut trajectory = Trajectory::new(&task_id);
        let mut dialog = Dialog::seeded(&self.config.system_prompt, task);
        let mut nudges: usize = 0;
        let tool_ctx = ToolContext::new(Arc::clone(&self.session)).with_cancel(self.cancel.clone());

        tracing::info!(task_id = %task_id, max_turns = self.config.max_turns, "task started");

        loop {
            let turn = dialog.begin_turn();
            self.emit(AgentEvent::TurnStarted {
                turn,
                max_turns: self.config.max_turns,
            });

            if self.cancel.is_cancelled() {
                trajectory.cancel();
                break;
            }

            let specs = if self.config.enable_tools {
                self.executor.tool_specs().await
            } else {
                Vec::new()
            };
            dialog.set_tool_specs(specs.clone());

            let prepared = match self.context.prepare_for_query(&dialog) {
                Ok(d) => d,
                Err(e) => {
                    self.emit(AgentEvent::Error { text: e.to_string() });
                    trajectory.fail(reason::CONTEXT_OVERFLOW);
                    break;
                }
            };

            self.emit(AgentEvent::Thinking);
            let assistant = match query_with_retry(
                self.llm.as_ref(),
                prepared.messages(),
                &specs,
                &self.config.retry,
                &self.cancel,
            )
            .await
            {
                Ok(reply) => reply,
                Err(ProviderError::Cancelled) => {
                    trajectory.cancel();
                    break;
                }
                Err(e) => {
                    tracing::error!(task_id = %task_id, error = %e, "provider unavailable after retries");
                    self.emit(AgentEvent::Error { text: e.to_string() });
                    trajectory.fail(reason::LLM_UNAVAILABLE);
                    break;
                }
            };

            let assistant_msg = assistant.clone().into_message();
            dialog.push(assistant_msg.clone());
            self.emit(AgentEvent::AssistantMessage {
                preview: preview(&assistant.content, ASSISTANT_PREVIEW_CHARS),
            });

            let mut tool_results: Vec<Message> = Vec::new();
            let mut finished = false;

            if assistant.tool_calls.is_empty() {
                nudges += 1;
                self.emit(AgentEvent::Nudge { count: nudges });
                if nudges <= self.config.max_nudges {
                    dialog.push(Message::user(NUDGE_PROMPT));
                }
            } else {
                nudges = 0;
                // 顺序执行：共享 Session 的副作用不可交换
                for call in &assistant.tool_calls {
                    self.emit(AgentEvent::ToolCall {
                        tool: call.name.clone(),
                        args: call.arguments.clone(),
                    });
                    let result = self.executor.execute(&tool_ctx, call).await;
                    self.emit(AgentEvent::Observation {
                        tool: call.name.clone(),
                        preview: preview(&result.observation, OBSERVATION_PREVIEW_CHARS),
                        success: result.success,
                    });

                    let msg = Message::tool_result(&call.id, &result.observation);
                    dialog.push(msg.clone());
                    tool_results.push(msg);

                    if call.name == FINISH_TOOL_NAME {
                        finished = true;
                        // finish 立即终结本回合，同批后续调用全部忽略
                        break;
                    }
                }
            }

            trajectory.push_step(StepRecord {
                turn,
                assistant: assistant_msg,
                tool_results,
                timestamp: Utc::now(),
            });
            self.persist(&trajectory);

            if finished {
                trajectory.complete();
                break;
            }
            if assistant.tool_calls.is_empty() && nudges > self.config.max_nudges {
                trajectory.fail(reason::STALLED);
                break;
            }
            if turn >= self.config.max_turns {
                trajectory.fail(reason::MAX_TURNS_EXCEEDED);
                break;
            }
        }

        self.persist(&trajectory);
        self.emit(AgentEvent::Terminal {
            status: status_str(trajectory.status).to_string(),
            reason: trajectory.reason.clone(),
        });
        tracing::info!(
            task_id = %task_id,
            status = status_str(trajectory.status),
            reason = trajectory.reason.as_deref().unwrap_or(""),
            steps = trajectory.steps.len(),
            "task finished"
        );
        trajectory
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    fn persist(&self, trajectory: &Trajectory) {
        if let Some(writer) = &self.writer {
            if let Err(e) = writer.write(trajectory) {
                tracing::warn!(task_id = %trajectory.task_id, error = %e, "trajectory write failed");
            }
        }
    }
}

fn status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Running => "running",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Cancelled => "cancelled",
    }
}

fn preview(text: &str, limit: usize) -> String {
    if text.chars().count() > limit {
        let cut: String = text.chars().take(limit).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}
