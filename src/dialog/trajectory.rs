//! 执行轨迹：任务级只追加的回合记录与 JSON 持久化
//!
//! Trajectory 由唯一一个 Turn Engine 实例持有；状态只能向前迁移（终态粘滞）。
//! TrajectoryWriter 按运行目录写出有序 JSON 文档，供外部查看器只读消费。

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dialog::Message;

/// 任务状态；Running 之外均为终态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

/// 单回合记录：assistant 消息与其工具结果
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepRecord {
    pub turn: usize,
    pub assistant: Message,
    pub tool_results: Vec<Message>,
    pub timestamp: DateTime<Utc>,
}

/// 一次任务执行的完整记录
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trajectory {
    pub task_id: String,
    pub status: TaskStatus,
    /// 终态原因码（llm_unavailable / stalled / max_turns_exceeded / context_overflow / cancelled）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub steps: Vec<StepRecord>,
}

impl Trajectory {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Running,
            reason: None,
            steps: Vec::new(),
        }
    }

    pub fn push_step(&mut self, step: StepRecord) {
        self.steps.push(step);
    }

    /// 标记完成；已处于终态时不再改变（finish 被重复调用也只完成一次）
    pub fn complete(&mut self) {
        if self.status == TaskStatus::Running {
            self.status = TaskStatus::Completed;
        }
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.status == TaskStatus::Running {
            self.status = TaskStatus::Failed;
            self.reason = Some(reason.into());
        }
    }

    pub fn cancel(&mut self) {
        if self.status == TaskStatus::Running {
            self.status = TaskStatus::Cancelled;
            self.reason = Some("cancelled".to_string());
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// 轨迹写入器：每个 Agent 在构造时显式注入自己的实例，不存在进程级共享路径
#[derive(Clone, Debug)]
pub struct TrajectoryWriter {
    run_dir: PathBuf,
}

impl TrajectoryWriter {
    pub fn new(run_dir: impl AsRef<Path>) -> Self {
        Self {
            run_dir: run_dir.as_ref().to_path_buf(),
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// 将轨迹写为 `<task_id>.json`；目录不存在时自动创建
    pub fn write(&self, trajectory: &Trajectory) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.run_dir)?;
        let path = self.run_dir.join(format!("{}.json", trajectory.task_id));
        std::fs::write(&path, serde_json::to_string_pretty(trajectory)?)?;
        Ok(path)
    }

    /// 从 JSON 文件读回轨迹
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Trajectory> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}
