//! 沙箱会话：为工具提供隔离的 shell 与文件 I/O
//!
//! 生命周期 Closed → Open → Closed（终态，不可重开）；任何 execute/upload/download
//! 必须发生在 Open 期间。所有工具可见路径都在 Session 层解析到工作区根下，
//! 逃逸在这里拒绝，而不是信任工具实参。

pub mod container;
pub mod local;

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use container::{ContainerConfig, ContainerSession};
pub use local::LocalSession;

/// 命令超时上报的退出码（跟随 GNU timeout 约定）
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// 沙箱层错误；对引擎而言只影响当前工具调用
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session is not open")]
    NotOpen,

    #[error("Session already closed")]
    AlreadyClosed,

    #[error("Path escapes workspace root: {0}")]
    PathEscape(String),

    #[error("Sandbox I/O error: {0}")]
    Io(String),

    #[error("Container error: {0}")]
    Container(String),
}

/// 会话生命周期状态（对外视图）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Open,
}

/// 会话句柄：id + 工作区根 + 当前状态
#[derive(Clone, Debug)]
pub struct SessionHandle {
    pub id: String,
    pub workspace_root: PathBuf,
    pub state: SessionState,
}

/// 一次命令执行的产物
#[derive(Clone, Debug, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// 命令结束后的工作目录（会话自身跟踪）
    pub cwd: String,
}

/// 沙箱会话 trait：本地子进程或容器实现
#[async_trait]
pub trait Session: Send + Sync {
    async fn handle(&self) -> SessionHandle;

    /// Closed → Open；重开已关闭的会话是错误
    async fn open(&self) -> Result<(), SessionError>;

    async fn exec_bash(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecOutput, SessionError>;

    /// 写字节到工作区内的路径；父目录自动创建
    async fn upload(&self, path: &str, bytes: &[u8]) -> Result<(), SessionError>;

    /// 从工作区内的路径读字节
    async fn download(&self, path: &str) -> Result<Vec<u8>, SessionError>;

    /// Open → Closed（终态）；恰好关闭一次
    async fn close(&self) -> Result<(), SessionError>;
}

/// 内部生命周期：区分「尚未打开」与「已终结」，对外都显示 Closed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Created,
    Open,
    Closed,
}

impl Phase {
    pub(crate) fn as_state(self) -> SessionState {
        match self {
            Phase::Open => SessionState::Open,
            _ => SessionState::Closed,
        }
    }
}

/// 将调用方给出的路径解析到 root 下；`..` 越界与 root 外的绝对路径一律拒绝
pub fn resolve_in_root(root: &Path, candidate: &str) -> Result<PathBuf, SessionError> {
    let candidate_path = Path::new(candidate);
    let mut resolved = root.to_path_buf();
    let mut depth: usize = 0;

    for component in candidate_path.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(SessionError::PathEscape(candidate.to_string()));
                }
                resolved.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => {
                // 绝对路径仅当自身位于 root 下时放行
                if candidate_path.starts_with(root) {
                    return Ok(candidate_path.to_path_buf());
                }
                return Err(SessionError::PathEscape(candidate.to_string()));
            }
        }
    }
    Ok(resolved)
}
