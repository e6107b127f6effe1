//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WASP__*` 覆盖（双下划线表示嵌套，
//! 如 `WASP__CONTEXT__MAX_TOKENS=64000`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::bridge::ServerConfig;
use crate::context::{ContextConfig, TruncationStrategy};
use crate::engine::EngineConfig;
use crate::jobs::JobManagerConfig;
use crate::llm::RetryPolicy;
use crate::sandbox::ContainerConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub context: ContextSection,
    pub sandbox: SandboxSection,
    pub bridge: BridgeSection,
    pub jobs: JobsSection,
}

/// [agent] 段：回合上限、催促上限、工具超时与 LLM 重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_turns: usize,
    pub max_nudges: usize,
    /// 只控制 ToolSpec 是否附进提示词；工具始终注册且可调用
    pub enable_tools: bool,
    pub system_prompt: Option<String>,
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub llm_max_retries: u32,
    pub llm_base_delay_ms: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_turns: 20,
            max_nudges: 3,
            enable_tools: true,
            system_prompt: None,
            tool_timeout_secs: 30,
            llm_max_retries: 3,
            llm_base_delay_ms: 1_000,
        }
    }
}

impl AgentSection {
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig {
            max_turns: self.max_turns,
            max_nudges: self.max_nudges,
            enable_tools: self.enable_tools,
            retry: RetryPolicy {
                max_retries: self.llm_max_retries,
                base_delay_ms: self.llm_base_delay_ms,
            },
            ..EngineConfig::default()
        };
        if let Some(prompt) = &self.system_prompt {
            config.system_prompt = prompt.clone();
        }
        config
    }
}

/// [context] 段：token 预算与截断策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    pub max_tokens: usize,
    pub safety_margin: usize,
    pub strategy: TruncationStrategy,
    pub keep_system: bool,
    pub recent_turns: usize,
}

impl Default for ContextSection {
    fn default() -> Self {
        let d = ContextConfig::default();
        Self {
            max_tokens: d.max_tokens,
            safety_margin: d.safety_margin,
            strategy: d.strategy,
            keep_system: d.keep_system,
            recent_turns: d.recent_turns,
        }
    }
}

impl ContextSection {
    pub fn context_config(&self) -> ContextConfig {
        ContextConfig {
            max_tokens: self.max_tokens,
            safety_margin: self.safety_margin,
            strategy: self.strategy,
            keep_system: self.keep_system,
            recent_turns: self.recent_turns,
        }
    }
}

/// 沙箱后端选择
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SandboxBackend {
    #[default]
    Local,
    Container,
}

/// [sandbox] 段：工作区根、容器镜像与资源限制
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    pub backend: SandboxBackend,
    /// 本地后端的工作区根；未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
    pub image: String,
    /// 逻辑环境 id；同 id 的会话复用同一容器
    pub env_id: Option<String>,
    pub memory_limit: Option<String>,
    pub cpus: Option<f64>,
    pub auto_remove: bool,
    pub poll_interval_ms: u64,
    pub default_timeout_secs: u64,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            backend: SandboxBackend::Local,
            workspace_root: None,
            image: "ubuntu:24.04".to_string(),
            env_id: None,
            memory_limit: None,
            cpus: None,
            auto_remove: true,
            poll_interval_ms: 500,
            default_timeout_secs: 300,
        }
    }
}

impl SandboxSection {
    /// 容器后端的创建参数；env_id 未配置时沿用随机 id（不复用容器）
    pub fn container_config(&self) -> ContainerConfig {
        let mut config = ContainerConfig {
            image: self.image.clone(),
            memory_limit: self.memory_limit.clone(),
            cpus: self.cpus,
            auto_remove: self.auto_remove,
            poll_interval: std::time::Duration::from_millis(self.poll_interval_ms),
            default_timeout: std::time::Duration::from_secs(self.default_timeout_secs),
            ..ContainerConfig::default()
        };
        if let Some(env_id) = &self.env_id {
            config.env_id = env_id.clone();
        }
        config
    }
}

/// [bridge] 段：远程工具服务器列表
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BridgeSection {
    pub servers: Vec<ServerConfig>,
}

/// [jobs] 段：轮询间隔与重试上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsSection {
    pub poll_interval_secs: u64,
    pub max_retries: u32,
    pub status_timeout_secs: u64,
}

impl Default for JobsSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            max_retries: 2,
            status_timeout_secs: 10,
        }
    }
}

impl JobsSection {
    pub fn manager_config(&self) -> JobManagerConfig {
        JobManagerConfig {
            poll_interval: std::time::Duration::from_secs(self.poll_interval_secs),
            max_retries: self.max_retries,
            status_timeout: std::time::Duration::from_secs(self.status_timeout_secs),
        }
    }
}

/// 从 config 目录加载配置，环境变量 WASP__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 WASP__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("WASP")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置（配置热更新：调用方决定是否用新配置重建组件）
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}
