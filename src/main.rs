//! Wasp - Rust 智能体运行时
//!
//! 入口：初始化日志、装配注册表 / 沙箱 / 引擎，用 Mock LLM 离线跑一条任务，
//! 轨迹落盘到 runs/ 目录（外部查看器只读消费）。

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::RwLock;

use wasp::config::load_config;
use wasp::context::ContextManager;
use wasp::core::{SessionCleanup, ShutdownCoordinator, ShutdownManager};
use wasp::dialog::TrajectoryWriter;
use wasp::engine::TurnEngine;
use wasp::llm::MockLlmClient;
use wasp::sandbox::{LocalSession, Session};
use wasp::tools::{
    BashTool, EchoTool, FinishTool, ReadFileTool, ToolExecutor, ToolRegistry, WriteFileTool,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    wasp::observability::init();

    let config = load_config(None).unwrap_or_default();
    let task = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let task = if task.is_empty() {
        "echo something friendly, then finish".to_string()
    } else {
        task
    };

    let workspace = config
        .sandbox
        .workspace_root
        .clone()
        .unwrap_or_else(|| "workspace".into());
    let session: Arc<dyn Session> = Arc::new(LocalSession::new(&workspace));
    session.open().await.context("open sandbox session")?;

    let mut registry = ToolRegistry::new();
    registry.register(FinishTool)?;
    registry.register(EchoTool)?;
    registry.register(BashTool)?;
    registry.register(ReadFileTool)?;
    registry.register(WriteFileTool)?;
    let executor = ToolExecutor::new(
        Arc::new(RwLock::new(registry)),
        config.agent.tool_timeout_secs,
    );

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let mut coordinator = ShutdownCoordinator::new(Arc::clone(&shutdown));
    coordinator.register(SessionCleanup::new(Arc::clone(&session)));

    let writer = TrajectoryWriter::new("runs");
    let mut engine = TurnEngine::new(
        Arc::new(MockLlmClient::default()),
        executor,
        Arc::clone(&session),
        ContextManager::new(config.context.context_config()),
        config.agent.engine_config(),
    )
    .with_writer(writer)
    .with_cancel(shutdown.child_token());

    let trajectory = engine.run(&task).await;
    println!(
        "task {} -> {:?} ({} steps){}",
        trajectory.task_id,
        trajectory.status,
        trajectory.steps.len(),
        trajectory
            .reason
            .as_deref()
            .map(|r| format!(", reason: {r}"))
            .unwrap_or_default()
    );

    coordinator.run_cleanup().await;
    Ok(())
}
