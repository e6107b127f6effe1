//! 容器沙箱会话：docker 容器 + 容器内 tmux 常驻 shell
//!
//! 命令都发进同一个 tmux 会话执行，环境变量、cwd、后台进程跨调用延续。
//! 每条命令带唯一哨兵：输出重定向到容器内文件，轮询哨兵行出现为止；
//! 到达硬超时则向 pane 发 C-c 打断当前命令并上报超时退出码，绝不挂死引擎。
//! 资源限制与卷挂载是创建期参数；auto_remove 决定容器关闭时删除还是留给
//! 绑定同一逻辑环境 id 的后续会话复用。

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::sandbox::{
    resolve_in_root, ExecOutput, Phase, Session, SessionError, SessionHandle, TIMEOUT_EXIT_CODE,
};

/// 容器内 tmux 会话名
const TMUX_SESSION: &str = "wasp-main";

/// 容器沙箱创建参数
#[derive(Clone, Debug)]
pub struct ContainerConfig {
    pub image: String,
    /// 逻辑环境 id：同 id 的会话复用同一容器
    pub env_id: String,
    /// 容器内工作区根
    pub workspace_root: PathBuf,
    /// docker --memory 取值（如 "2g"）
    pub memory_limit: Option<String>,
    /// docker --cpus 取值
    pub cpus: Option<f64>,
    /// (宿主路径, 容器路径) 卷挂载
    pub mounts: Vec<(PathBuf, String)>,
    /// 关闭会话时是否删除容器
    pub auto_remove: bool,
    pub poll_interval: Duration,
    pub default_timeout: Duration,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: "ubuntu:24.04".to_string(),
            env_id: uuid::Uuid::new_v4().simple().to_string(),
            workspace_root: PathBuf::from("/workspace"),
            memory_limit: None,
            cpus: None,
            mounts: Vec::new(),
            auto_remove: true,
            poll_interval: Duration::from_millis(500),
            default_timeout: Duration::from_secs(300),
        }
    }
}

struct ContainerState {
    phase: Phase,
    container: Option<String>,
    cwd: PathBuf,
}

/// 容器会话
pub struct ContainerSession {
    id: String,
    config: ContainerConfig,
    state: Mutex<ContainerState>,
}

impl ContainerSession {
    pub fn new(config: ContainerConfig) -> Self {
        Self {
            id: format!("container-{}", uuid::Uuid::new_v4()),
            state: Mutex::new(ContainerState {
                phase: Phase::Created,
                container: None,
                cwd: config.workspace_root.clone(),
            }),
            config,
        }
    }

    fn container_name(env_id: &str) -> String {
        format!("wasp-env-{env_id}")
    }

    /// docker run 参数（创建期资源限制与挂载都在这里生效）
    fn build_run_args(config: &ContainerConfig, name: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--label".to_string(),
            format!("wasp.env={}", config.env_id),
        ];
        if let Some(mem) = &config.memory_limit {
            args.push("--memory".to_string());
            args.push(mem.clone());
        }
        if let Some(cpus) = config.cpus {
            args.push("--cpus".to_string());
            args.push(cpus.to_string());
        }
        for (host, dest) in &config.mounts {
            args.push("-v".to_string());
            args.push(format!("{}:{}", host.display(), dest));
        }
        args.push("-w".to_string());
        args.push(config.workspace_root.display().to_string());
        args.push(config.image.clone());
        args.push("sleep".to_string());
        args.push("infinity".to_string());
        args
    }

    /// 解析哨兵行 `<sentinel>:<exit_code>:<cwd>`
    fn parse_sentinel_line(line: &str, sentinel: &str) -> Option<(i32, String)> {
        let rest = line.strip_prefix(sentinel)?.strip_prefix(':')?;
        let (code, cwd) = rest.split_once(':')?;
        Some((code.trim().parse().ok()?, cwd.trim().to_string()))
    }

    async fn docker(args: &[String]) -> Result<(String, String, i32), SessionError> {
        let output = Command::new("docker")
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SessionError::Container(format!("docker not runnable: {e}")))?;
        Ok((
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
            output.status.code().unwrap_or(-1),
        ))
    }

    async fn docker_ok(args: &[String]) -> Result<String, SessionError> {
        let (stdout, stderr, code) = Self::docker(args).await?;
        if code != 0 {
            return Err(SessionError::Container(format!(
                "docker {} failed ({code}): {}",
                args.first().map(String::as_str).unwrap_or(""),
                stderr.trim()
            )));
        }
        Ok(stdout)
    }

    /// 容器内执行一段 sh 脚本
    async fn exec_in(container: &str, script: &str) -> Result<(String, i32), SessionError> {
        let args = vec![
            "exec".to_string(),
            container.to_string(),
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
        ];
        let (stdout, _stderr, code) = Self::docker(&args).await?;
        Ok((stdout, code))
    }

    /// 复用已有容器（同 env_id），否则新建；随后确保 tmux 会话就绪
    async fn ensure_container(&self) -> Result<String, SessionError> {
        let name = Self::container_name(&self.config.env_id);
        let inspect = vec![
            "inspect".to_string(),
            "-f".to_string(),
            "{{.State.Running}}".to_string(),
            name.clone(),
        ];
        match Self::docker(&inspect).await? {
            (stdout, _, 0) if stdout.trim() == "true" => {
                tracing::info!(container = %name, "reusing running container");
            }
            (_, _, 0) => {
                Self::docker_ok(&["start".to_string(), name.clone()]).await?;
                tracing::info!(container = %name, "restarted stopped container");
            }
            _ => {
                let run_args = Self::build_run_args(&self.config, &name);
                Self::docker_ok(&run_args).await?;
                tracing::info!(container = %name, image = %self.config.image, "created container");
            }
        }

        let ws = self.config.workspace_root.display();
        let setup = format!(
            "mkdir -p {ws} && (tmux has-session -t {TMUX_SESSION} 2>/dev/null || tmux new-session -d -s {TMUX_SESSION} -c {ws})"
        );
        let (_, code) = Self::exec_in(&name, &setup).await?;
        if code != 0 {
            return Err(SessionError::Container(
                "failed to start tmux session in container".to_string(),
            ));
        }
        Ok(name)
    }
}

#[async_trait]
impl Session for ContainerSession {
    async fn handle(&self) -> SessionHandle {
        let state = self.state.lock().await;
        SessionHandle {
            id: self.id.clone(),
            workspace_root: self.config.workspace_root.clone(),
            state: state.phase.as_state(),
        }
    }

    async fn open(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        match state.phase {
            Phase::Created => {
                let name = self.ensure_container().await?;
                state.container = Some(name);
                state.phase = Phase::Open;
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
        let mut state = self.state.lock().await;
        if state.phase != Phase::Open {
            return Err(SessionError::NotOpen);
        }
        let container = state
            .container
            .clone()
            .ok_or_else(|| SessionError::Container("container missing".to_string()))?;

        let stamp = uuid::Uuid::new_v4().simple().to_string();
        let sentinel = format!("__WASP_DONE_{stamp}__");
        let outfile = format!("/tmp/wasp-{stamp}.out");

        // 命令在 tmux 的 shell 内执行，cd/export 得以延续；输出进文件避免解析 pane
        let line = format!(
            "{{ {command} ; }} >{outfile} 2>&1; printf '{sentinel}:%s:%s\\n' \"$?\" \"$PWD\" >>{outfile}"
        );
        let send = vec![
            "exec".to_string(),
            container.clone(),
            "tmux".to_string(),
            "send-keys".to_string(),
            "-t".to_string(),
            TMUX_SESSION.to_string(),
            "-l".to_string(),
            line,
        ];
        Self::docker_ok(&send).await?;
        let enter = vec![
            "exec".to_string(),
            container.clone(),
            "tmux".to_string(),
            "send-keys".to_string(),
            "-t".to_string(),
            TMUX_SESSION.to_string(),
            "Enter".to_string(),
        ];
        Self::docker_ok(&enter).await?;

        // 轮询哨兵；到达硬超时就打断当前命令
        let timeout = timeout.unwrap_or(self.config.default_timeout);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            tokio::time::sleep(self.config.poll_interval).await;
            let probe = format!("grep -m1 '^{sentinel}:' {outfile} 2>/dev/null");
            let (stdout, code) = Self::exec_in(&container, &probe).await?;
            if code == 0 && !stdout.trim().is_empty() {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                let interrupt = vec![
                    "exec".to_string(),
                    container.clone(),
                    "tmux".to_string(),
                    "send-keys".to_string(),
                    "-t".to_string(),
                    TMUX_SESSION.to_string(),
                    "C-c".to_string(),
                ];
                let _ = Self::docker(&interrupt).await;
                tracing::warn!(session = %self.id, timeout_secs = timeout.as_secs(), "container command timed out");
                return Ok(ExecOutput {
                    stdout: String::new(),
                    stderr: format!("command timed out after {}s and was interrupted", timeout.as_secs()),
                    exit_code: TIMEOUT_EXIT_CODE,
                    cwd: state.cwd.display().to_string(),
                });
            }
        }

        let (raw, _) = Self::exec_in(&container, &format!("cat {outfile}; rm -f {outfile}")).await?;
        let mut stdout_lines: Vec<&str> = Vec::new();
        let mut parsed: Option<(i32, String)> = None;
        for line in raw.lines() {
            match Self::parse_sentinel_line(line, &sentinel) {
                Some(found) => parsed = Some(found),
                None => stdout_lines.push(line),
            }
        }
        let (exit_code, cwd) = parsed.unwrap_or((-1, state.cwd.display().to_string()));

        let candidate = PathBuf::from(&cwd);
        state.cwd = if candidate.starts_with(&self.config.workspace_root) {
            candidate
        } else {
            self.config.workspace_root.clone()
        };

        Ok(ExecOutput {
            // tmux 管道里 stderr 已并入 stdout
            stdout: stdout_lines.join("\n"),
            stderr: String::new(),
            exit_code,
            cwd: state.cwd.display().to_string(),
        })
    }

    async fn upload(&self, path: &str, bytes: &[u8]) -> Result<(), SessionError> {
        let container = {
            let state = self.state.lock().await;
            if state.phase != Phase::Open {
                return Err(SessionError::NotOpen);
            }
            state.container.clone().unwrap_or_default()
        };
        let target = resolve_in_root(&self.config.workspace_root, path)?;

        let staging = std::env::temp_dir().join(format!("wasp-up-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&staging, bytes)
            .await
            .map_err(|e| SessionError::Io(format!("stage upload: {e}")))?;

        if let Some(parent) = target.parent() {
            let (_, code) = Self::exec_in(&container, &format!("mkdir -p {}", parent.display())).await?;
            if code != 0 {
                return Err(SessionError::Container("mkdir for upload failed".to_string()));
            }
        }
        let cp = vec![
            "cp".to_string(),
            staging.display().to_string(),
            format!("{container}:{}", target.display()),
        ];
        let result = Self::docker_ok(&cp).await;
        let _ = tokio::fs::remove_file(&staging).await;
        result.map(|_| ())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, SessionError> {
        let container = {
            let state = self.state.lock().await;
            if state.phase != Phase::Open {
                return Err(SessionError::NotOpen);
            }
            state.container.clone().unwrap_or_default()
        };
        let source = resolve_in_root(&self.config.workspace_root, path)?;

        let staging = std::env::temp_dir().join(format!("wasp-down-{}", uuid::Uuid::new_v4().simple()));
        let cp = vec![
            "cp".to_string(),
            format!("{container}:{}", source.display()),
            staging.display().to_string(),
        ];
        Self::docker_ok(&cp).await?;
        let bytes = tokio::fs::read(&staging)
            .await
            .map_err(|e| SessionError::Io(format!("read staged download: {e}")))?;
        let _ = tokio::fs::remove_file(&staging).await;
        Ok(bytes)
    }

    async fn close(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        match state.phase {
            Phase::Closed => Err(SessionError::AlreadyClosed),
            _ => {
                if let Some(container) = state.container.take() {
                    let kill_tmux = format!("tmux kill-session -t {TMUX_SESSION} 2>/dev/null || true");
                    let _ = Self::exec_in(&container, &kill_tmux).await;
                    if self.config.auto_remove {
                        let _ = Self::docker(&[
                            "rm".to_string(),
                            "-f".to_string(),
                            container.clone(),
                        ])
                        .await;
                        tracing::info!(container = %container, "container removed");
                    } else {
                        tracing::info!(container = %container, "container left running for reuse");
                    }
                }
                state.phase = Phase::Closed;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_include_limits_and_mounts() {
        let config = ContainerConfig {
            image: "chem-runtime:1".to_string(),
            env_id: "abc".to_string(),
            memory_limit: Some("2g".to_string()),
            cpus: Some(1.5),
            mounts: vec![(PathBuf::from("/data/sets"), "/mnt/sets".to_string())],
            ..ContainerConfig::default()
        };
        let args = ContainerSession::build_run_args(&config, "wasp-env-abc");
        let joined = args.join(" ");
        assert!(joined.contains("--name wasp-env-abc"));
        assert!(joined.contains("--label wasp.env=abc"));
        assert!(joined.contains("--memory 2g"));
        assert!(joined.contains("--cpus 1.5"));
        assert!(joined.contains("-v /data/sets:/mnt/sets"));
        assert!(joined.ends_with("chem-runtime:1 sleep infinity"));
    }

    #[test]
    fn test_parse_sentinel_line() {
        let sentinel = "__WASP_DONE_x__";
        assert_eq!(
            ContainerSession::parse_sentinel_line("__WASP_DONE_x__:0:/workspace", sentinel),
            Some((0, "/workspace".to_string()))
        );
        assert_eq!(
            ContainerSession::parse_sentinel_line("__WASP_DONE_x__:124:/workspace/sub", sentinel),
            Some((124, "/workspace/sub".to_string()))
        );
        assert!(ContainerSession::parse_sentinel_line("ordinary output", sentinel).is_none());
        assert!(ContainerSession::parse_sentinel_line("__WASP_DONE_y__:0:/w", sentinel).is_none());
    }

    #[tokio::test]
    async fn test_calls_rejected_before_open() {
        let session = ContainerSession::new(ContainerConfig::default());
        assert!(matches!(
            session.exec_bash("echo hi", None).await.unwrap_err(),
            SessionError::NotOpen
        ));
        assert!(matches!(
            session.download("x").await.unwrap_err(),
            SessionError::NotOpen
        ));
        // 未打开也可以关闭（无资源可释放），但只能关一次
        session.close().await.unwrap();
        assert!(matches!(
            session.close().await.unwrap_err(),
            SessionError::AlreadyClosed
        ));
    }
}
