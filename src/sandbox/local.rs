//! 本地沙箱会话：每条命令一个子进程
//!
//! 没有常驻 shell，工作目录由会话对象自己跟踪：命令包一层 printf 把结束时的
//! $PWD 打回 stdout，解析后更新 cwd，越出工作区根时钳回根目录。

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::sandbox::{
    resolve_in_root, ExecOutput, Phase, Session, SessionError, SessionHandle, TIMEOUT_EXIT_CODE,
};

/// cwd 回传标记；命令输出中以最后一次出现为准
const CWD_MARKER: &str = "__WASP_CWD__";

/// 默认单条命令超时
const DEFAULT_TIMEOUT_SECS: u64 = 60;

struct LocalState {
    phase: Phase,
    cwd: PathBuf,
}

/// 本地会话：workspace 根目录下逐命令执行
pub struct LocalSession {
    id: String,
    root: PathBuf,
    default_timeout: Duration,
    state: Mutex<LocalState>,
}

impl LocalSession {
    pub fn new(workspace_root: impl AsRef<Path>) -> Self {
        let root = workspace_root.as_ref().to_path_buf();
        Self {
            id: format!("local-{}", uuid::Uuid::new_v4()),
            state: Mutex::new(LocalState {
                phase: Phase::Created,
                cwd: root.clone(),
            }),
            root,
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// 从 stdout 中剥离 cwd 标记行，返回（净化后的 stdout, 新 cwd）
    fn split_cwd_marker(stdout: &str) -> (String, Option<String>) {
        match stdout.rfind(CWD_MARKER) {
            Some(pos) => {
                let clean = stdout[..pos].trim_end_matches('\n').to_string();
                let rest = &stdout[pos + CWD_MARKER.len()..];
                let cwd = rest.lines().next().unwrap_or("").trim().to_string();
                let cwd = if cwd.is_empty() { None } else { Some(cwd) };
                (clean, cwd)
            }
            None => (stdout.to_string(), None),
        }
    }
}

#[async_trait]
impl Session for LocalSession {
    async fn handle(&self) -> SessionHandle {
        let state = self.state.lock().await;
        SessionHandle {
            id: self.id.clone(),
            workspace_root: self.root.clone(),
            state: state.phase.as_state(),
        }
    }

    async fn open(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        match state.phase {
            Phase::Created => {
                tokio::fs::create_dir_all(&self.root)
                    .await
                    .map_err(|e| SessionError::Io(format!("create workspace root: {e}")))?;
                state.phase = Phase::Open;
                tracing::info!(session = %self.id, root = %self.root.display(), "session opened");
                Ok(())
            }
            Phase::Open => Ok(()),
            Phase::Closed => Err(SessionError::AlreadyClosed),
        }
    }

    async fn exec_bash(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecOutput, SessionError> {
        // 持锁执行：一个会话即一条执行通道，命令天然串行
        let mut state = self.state.lock().await;
        if state.phase != Phase::Open {
            return Err(SessionError::NotOpen);
        }

        let wrapped = format!(
            "{{ {command}\n}}; __wasp_status=$?; printf '\\n{CWD_MARKER}%s\\n' \"$PWD\"; exit $__wasp_status"
        );
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&wrapped)
            .current_dir(&state.cwd)
            .kill_on_drop(true);

        let timeout = timeout.unwrap_or(self.default_timeout);
        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(result) => result.map_err(|e| SessionError::Io(format!("spawn failed: {e}")))?,
            Err(_) => {
                tracing::warn!(session = %self.id, timeout_secs = timeout.as_secs(), "command timed out");
                return Ok(ExecOutput {
                    stdout: String::new(),
                    stderr: format!("command timed out after {}s", timeout.as_secs()),
                    exit_code: TIMEOUT_EXIT_CODE,
                    cwd: state.cwd.display().to_string(),
                });
            }
        };

        let raw_stdout = String::from_utf8_lossy(&output.stdout);
        let (stdout, new_cwd) = Self::split_cwd_marker(&raw_stdout);
        if let Some(cwd) = new_cwd {
            let candidate = PathBuf::from(cwd);
            // cd 出工作区时钳回根目录
            state.cwd = if candidate.starts_with(&self.root) {
                candidate
            } else {
                self.root.clone()
            };
        }

        Ok(ExecOutput {
            stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
            cwd: state.cwd.display().to_string(),
        })
    }

    async fn upload(&self, path: &str, bytes: &[u8]) -> Result<(), SessionError> {
        {
            let state = self.state.lock().await;
            if state.phase != Phase::Open {
                return Err(SessionError::NotOpen);
            }
        }
        let target = resolve_in_root(&self.root, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SessionError::Io(format!("create parent dirs: {e}")))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| SessionError::Io(format!("write {}: {e}", target.display())))
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, SessionError> {
        {
            let state = self.state.lock().await;
            if state.phase != Phase::Open {
                return Err(SessionError::NotOpen);
            }
        }
        let target = resolve_in_root(&self.root, path)?;
        tokio::fs::read(&target)
            .await
            .map_err(|e| SessionError::Io(format!("read {}: {e}", target.display())))
    }

    async fn close(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        match state.phase {
            Phase::Closed => Err(SessionError::AlreadyClosed),
            _ => {
                state.phase = Phase::Closed;
                tracing::info!(session = %self.id, "session closed");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_session() -> (LocalSession, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let session = LocalSession::new(dir.path());
        session.open().await.unwrap();
        (session, dir)
    }

    #[tokio::test]
    async fn test_exec_captures_stdout_and_exit_code() {
        let (session, _dir) = open_session().await;
        let out = session.exec_bash("echo hello", None).await.unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.exit_code, 0);

        let out = session.exec_bash("exit 7", None).await.unwrap();
        assert_eq!(out.exit_code, 7);
    }

    #[tokio::test]
    async fn test_cwd_persists_across_commands() {
        let (session, dir) = open_session().await;
        session.exec_bash("mkdir -p subdir", None).await.unwrap();
        let out = session.exec_bash("cd subdir", None).await.unwrap();
        assert!(out.cwd.ends_with("subdir"));

        let out = session.exec_bash("pwd", None).await.unwrap();
        assert!(out.stdout.trim().ends_with("subdir"));
        assert!(out.cwd.starts_with(&dir.path().display().to_string()));
    }

    #[tokio::test]
    async fn test_cd_outside_root_clamps_back() {
        let (session, dir) = open_session().await;
        let out = session.exec_bash("cd /", None).await.unwrap();
        assert_eq!(out.cwd, dir.path().display().to_string());
    }

    #[tokio::test]
    async fn test_timeout_reports_special_exit_code() {
        let (session, _dir) = open_session().await;
        let out = session
            .exec_bash("sleep 30", Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert_eq!(out.exit_code, TIMEOUT_EXIT_CODE);
        assert!(out.stderr.contains("timed out"));
    }

    #[tokio::test]
    async fn test_upload_download_roundtrip() {
        let (session, _dir) = open_session().await;
        session.upload("data/blob.bin", b"payload").await.unwrap();
        let bytes = session.download("data/blob.bin").await.unwrap();
        assert_eq!(bytes, b"payload");
    }

    #[tokio::test]
    async fn test_path_escape_rejected() {
        let (session, _dir) = open_session().await;
        let err = session.upload("../outside.txt", b"x").await.unwrap_err();
        assert!(matches!(err, SessionError::PathEscape(_)));
    }

    #[tokio::test]
    async fn test_lifecycle_no_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let session = LocalSession::new(dir.path());

        // 未打开时一切调用被拒
        assert!(matches!(
            session.exec_bash("echo hi", None).await.unwrap_err(),
            SessionError::NotOpen
        ));

        session.open().await.unwrap();
        session.open().await.unwrap(); // 幂等
        session.close().await.unwrap();

        assert!(matches!(
            session.open().await.unwrap_err(),
            SessionError::AlreadyClosed
        ));
        assert!(matches!(
            session.close().await.unwrap_err(),
            SessionError::AlreadyClosed
        ));
        assert!(matches!(
            session.exec_bash("echo hi", None).await.unwrap_err(),
            SessionError::NotOpen
        ));
    }

    #[test]
    fn test_split_cwd_marker() {
        let raw = format!("line one\nline two\n{CWD_MARKER}/work/dir\n");
        let (clean, cwd) = LocalSession::split_cwd_marker(&raw);
        assert_eq!(clean, "line one\nline two");
        assert_eq!(cwd.as_deref(), Some("/work/dir"));

        let (clean, cwd) = LocalSession::split_cwd_marker("no marker here");
        assert_eq!(clean, "no marker here");
        assert!(cwd.is_none());
    }
}
