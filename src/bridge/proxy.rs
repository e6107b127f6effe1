//! 协议桥：多服务器管理与远程工具代理
//!
//! 每个服务器：连接 → initialize → tools/list → 以 `{server}_{tool}` 命名包装成
//! Registry 条目 → 调用经存活连接转发。远端与传输错误一律折叠为失败 ToolResult，
//! 不会越过 Registry 边界。add/remove/reload 幂等；reload 在一次注册表写锁内
//! 整组换新，不存在新旧工具同名共存的窗口。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};

use crate::bridge::client::{ProtocolClient, TransportConfig};
use crate::bridge::protocol::RemoteToolDescriptor;
use crate::bridge::BridgeError;
use crate::tools::{Tool, ToolContext, ToolRegistry, ToolResult};

fn default_request_timeout_secs() -> u64 {
    30
}

/// 单个远程服务器的配置
#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    #[serde(flatten)]
    pub transport: TransportConfig,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

struct ServerEntry {
    client: Arc<ProtocolClient>,
    config: ServerConfig,
}

/// 协议桥：持有服务器连接，向共享注册表注入/换出代理工具
pub struct ProtocolBridge {
    registry: Arc<RwLock<ToolRegistry>>,
    servers: Mutex<HashMap<String, ServerEntry>>,
}

impl ProtocolBridge {
    pub fn new(registry: Arc<RwLock<ToolRegistry>>) -> Self {
        Self {
            registry,
            servers: Mutex::new(HashMap::new()),
        }
    }

    /// 接入服务器并注册其全部工具；已接入的同名服务器直接返回（幂等）
    pub async fn add_server(&self, config: ServerConfig) -> Result<usize, BridgeError> {
        let mut servers = self.servers.lock().await;
        if servers.contains_key(&config.name) {
            return Ok(0);
        }

        let (client, proxies) = Self::connect_and_wrap(&config).await?;
        let count = proxies.len();
        {
            let mut registry = self.registry.write().await;
            for tool in proxies {
                registry
                    .register_arc(tool)
                    .map_err(|e| BridgeError::Protocol(e.to_string()))?;
            }
        }
        tracing::info!(server = %config.name, tools = count, "protocol server added");
        servers.insert(config.name.clone(), ServerEntry { client, config });
        Ok(count)
    }

    /// 摘除服务器与其代理工具；不存在时静默成功（幂等）
    pub async fn remove_server(&self, name: &str) -> Result<(), BridgeError> {
        let mut servers = self.servers.lock().await;
        if let Some(entry) = servers.remove(name) {
            entry.client.close();
            let prefix = format!("{name}_");
            let mut registry = self.registry.write().await;
            for tool_name in registry.tool_names() {
                if tool_name.starts_with(&prefix) {
                    registry.unregister(&tool_name);
                }
            }
            tracing::info!(server = %name, "protocol server removed");
        }
        Ok(())
    }

    /// 重连服务器并原子换掉其工具组
    pub async fn reload_server(&self, name: &str) -> Result<usize, BridgeError> {
        let mut servers = self.servers.lock().await;
        let entry = servers
            .get(name)
            .ok_or_else(|| BridgeError::ServerNotFound(name.to_string()))?;
        let config = entry.config.clone();

        // 新工具组先建好，再在一次写锁内换入
        let (client, proxies) = Self::connect_and_wrap(&config).await?;
        let count = {
            let mut registry = self.registry.write().await;
            registry
                .replace_prefixed(name, proxies)
                .map_err(|e| BridgeError::Protocol(e.to_string()))?
        };

        if let Some(old) = servers.insert(name.to_string(), ServerEntry { client, config }) {
            old.client.close();
        }
        tracing::info!(server = %name, tools = count, "protocol server reloaded");
        Ok(count)
    }

    pub async fn server_names(&self) -> Vec<String> {
        self.servers.lock().await.keys().cloned().collect()
    }

    async fn connect_and_wrap(
        config: &ServerConfig,
    ) -> Result<(Arc<ProtocolClient>, Vec<Arc<dyn Tool>>), BridgeError> {
        let client = Arc::new(
            ProtocolClient::connect(
                &config.name,
                config.transport.clone(),
                Duration::from_secs(config.request_timeout_secs),
            )
            .await?,
        );
        client.initialize().await?;
        let descriptors = client.list_tools().await?;
        let proxies = descriptors
            .into_iter()
            .map(|descriptor| {
                Arc::new(RemoteTool::new(&config.name, descriptor, Arc::clone(&client)))
                    as Arc<dyn Tool>
            })
            .collect();
        Ok((client, proxies))
    }
}

/// 远程工具代理：Registry 里的普通工具，调用转发到存活连接
struct RemoteTool {
    qualified_name: String,
    remote_name: String,
    description: String,
    parameters: serde_json::Value,
    client: Arc<ProtocolClient>,
}

impl RemoteTool {
    fn new(server: &str, descriptor: RemoteToolDescriptor, client: Arc<ProtocolClient>) -> Self {
        Self {
            qualified_name: format!("{server}_{}", descriptor.name),
            remote_name: descriptor.name,
            description: descriptor.description,
            parameters: descriptor.parameters,
            client,
        }
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.qualified_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.parameters.clone()
    }

    async fn execute(
        &self,
        _ctx: &ToolContext,
        args: serde_json::Value,
    ) -> Result<ToolResult, String> {
        match self.client.call_tool(&self.remote_name, args).await {
            Ok(result) if result.is_error => Ok(ToolResult::failure_with_info(
                result.content,
                result.info,
            )),
            Ok(result) => Ok(ToolResult::ok_with_info(result.content, result.info)),
            Err(e) => Ok(ToolResult::failure(format!("remote call failed: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 管道 stub：应答 initialize / tools/list，之后收包不再应答
    fn stub_pipe(name: &str, tool: &str) -> ServerConfig {
        let script = format!(
            "read line; printf '{{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{{}}}}\\n'; \
             read line; printf '{{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{{\"tools\":[{{\"name\":\"{tool}\",\"description\":\"d\",\"parameters\":{{\"type\":\"object\"}}}}]}}}}\\n'; \
             cat >/dev/null"
        );
        ServerConfig {
            name: name.to_string(),
            transport: TransportConfig::Pipe {
                command: "sh".to_string(),
                args: vec!["-c".to_string(), script],
            },
            request_timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_add_server_registers_qualified_tools() {
        let registry = Arc::new(RwLock::new(ToolRegistry::new()));
        let bridge = ProtocolBridge::new(Arc::clone(&registry));

        let added = bridge.add_server(stub_pipe("chem", "submit")).await.unwrap();
        assert_eq!(added, 1);
        assert!(registry.read().await.contains("chem_submit"));

        // 幂等：重复接入不再注册
        let added = bridge.add_server(stub_pipe("chem", "submit")).await.unwrap();
        assert_eq!(added, 0);
    }

    #[tokio::test]
    async fn test_remove_server_is_idempotent() {
        let registry = Arc::new(RwLock::new(ToolRegistry::new()));
        let bridge = ProtocolBridge::new(Arc::clone(&registry));

        bridge.add_server(stub_pipe("chem", "submit")).await.unwrap();
        bridge.remove_server("chem").await.unwrap();
        assert!(!registry.read().await.contains("chem_submit"));
        // 再删一次也成功
        bridge.remove_server("chem").await.unwrap();
    }

    #[tokio::test]
    async fn test_reload_swaps_tool_set_atomically() {
        let registry = Arc::new(RwLock::new(ToolRegistry::new()));
        let bridge = ProtocolBridge::new(Arc::clone(&registry));

        bridge.add_server(stub_pipe("chem", "submit")).await.unwrap();
        // 重载重新连接（新进程、重新枚举），换组后名字不重不漏
        let count = bridge.reload_server("chem").await.unwrap();
        assert_eq!(count, 1);
        let registry = registry.read().await;
        assert!(registry.contains("chem_submit"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_reload_unknown_server_fails() {
        let registry = Arc::new(RwLock::new(ToolRegistry::new()));
        let bridge = ProtocolBridge::new(registry);
        let err = bridge.reload_server("ghost").await.unwrap_err();
        assert!(matches!(err, BridgeError::ServerNotFound(_)));
    }
}
