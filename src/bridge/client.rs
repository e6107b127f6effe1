//! 协议客户端：单个远程服务器的连接与请求复用
//!
//! 管道/事件流传输由客户端自带的泵任务收包，按 id 路由到挂起的 oneshot；
//! HTTP 传输一次 POST 即一对请求/响应。对外只暴露异步调用方法，内部任务
//! 不外泄事件循环。所有请求受超时约束。

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::AbortHandle;

use crate::bridge::protocol::{
    drain_sse_events, RemoteCallResult, RemoteToolDescriptor, RpcRequest, RpcResponse,
    METHOD_CALL_TOOL, METHOD_INITIALIZE, METHOD_LIST_TOOLS,
};
use crate::bridge::BridgeError;

/// 传输配置：进程管道 / HTTP / 事件流
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// 子进程 stdio，行分隔 JSON-RPC
    Pipe {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// 每次调用一个 POST
    Http { url: String },
    /// POST 发请求，同一 URL 的 SSE 流收响应
    EventStream { url: String },
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>>;

enum Wire {
    Http {
        http: reqwest::Client,
        url: String,
    },
    Pipe {
        stdin: Mutex<ChildStdin>,
        pending: Pending,
        // 持有子进程使其存活；kill_on_drop 兜底回收
        _child: Child,
    },
    EventStream {
        http: reqwest::Client,
        url: String,
        pending: Pending,
    },
}

/// 单服务器协议客户端
pub struct ProtocolClient {
    server: String,
    wire: Wire,
    next_id: AtomicU64,
    timeout: Duration,
    pumps: Vec<AbortHandle>,
}

impl std::fmt::Debug for ProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("server", &self.server)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ProtocolClient {
    pub async fn connect(
        server: &str,
        transport: TransportConfig,
        timeout: Duration,
    ) -> Result<Self, BridgeError> {
        let mut pumps = Vec::new();
        let wire = match transport {
            TransportConfig::Http { url } => Wire::Http {
                http: reqwest::Client::new(),
                url,
            },
            TransportConfig::Pipe { command, args } => {
                let mut child = Command::new(&command)
                    .args(&args)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::null())
                    .kill_on_drop(true)
                    .spawn()
                    .map_err(|e| BridgeError::Spawn(format!("{command}: {e}")))?;
                let stdin = child
                    .stdin
                    .take()
                    .ok_or_else(|| BridgeError::Spawn("child stdin unavailable".to_string()))?;
                let stdout = child
                    .stdout
                    .take()
                    .ok_or_else(|| BridgeError::Spawn("child stdout unavailable".to_string()))?;

                let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
                let pump_pending = Arc::clone(&pending);
                let pump_server = server.to_string();
                let pump = tokio::spawn(async move {
                    let mut lines = BufReader::new(stdout).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        route_response(&pump_server, &pump_pending, &line).await;
                    }
                    tracing::debug!(server = %pump_server, "pipe pump ended");
                });
                pumps.push(pump.abort_handle());

                Wire::Pipe {
                    stdin: Mutex::new(stdin),
                    pending,
                    _child: child,
                }
            }
            TransportConfig::EventStream { url } => {
                let http = reqwest::Client::new();
                let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
                let pump_pending = Arc::clone(&pending);
                let pump_http = http.clone();
                let pump_url = url.clone();
                let pump_server = server.to_string();
                let pump = tokio::spawn(async move {
                    let response = pump_http
                        .get(&pump_url)
                        .header("accept", "text/event-stream")
                        .send()
                        .await;
                    let Ok(response) = response else {
                        tracing::warn!(server = %pump_server, "event stream connect failed");
                        return;
                    };
                    let mut stream = response.bytes_stream();
                    let mut buffer = String::new();
                    while let Some(chunk) = stream.next().await {
                        let Ok(chunk) = chunk else { break };
                        buffer.push_str(&String::from_utf8_lossy(&chunk));
                        for event in drain_sse_events(&mut buffer) {
                            route_response(&pump_server, &pump_pending, &event).await;
                        }
                    }
                    tracing::debug!(server = %pump_server, "event stream pump ended");
                });
                pumps.push(pump.abort_handle());

                Wire::EventStream { http, url, pending }
            }
        };

        Ok(Self {
            server: server.to_string(),
            wire,
            next_id: AtomicU64::new(1),
            timeout,
            pumps,
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// 发送一次请求并等待配对响应
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = RpcRequest::new(id, method, params);

        match &self.wire {
            Wire::Http { http, url } => {
                let send = async {
                    http.post(url)
                        .json(&request)
                        .send()
                        .await?
                        .error_for_status()?
                        .json::<RpcResponse>()
                        .await
                };
                let response = tokio::time::timeout(self.timeout, send)
                    .await
                    .map_err(|_| BridgeError::Timeout(method.to_string()))?
                    .map_err(|e: reqwest::Error| BridgeError::Transport(e.to_string()))?;
                response.into_result()
            }
            Wire::Pipe { stdin, pending, .. } => {
                let rx = register_pending(pending, id).await;
                let line = serde_json::to_string(&request)
                    .map_err(|e| BridgeError::Protocol(e.to_string()))?;
                {
                    let mut writer = stdin.lock().await;
                    let write = async {
                        writer.write_all(line.as_bytes()).await?;
                        writer.write_all(b"\n").await?;
                        writer.flush().await
                    };
                    if let Err(e) = write.await {
                        pending.lock().await.remove(&id);
                        return Err(BridgeError::Transport(format!("pipe write: {e}")));
                    }
                }
                self.await_response(pending, id, rx, method).await
            }
            Wire::EventStream { http, url, pending } => {
                let rx = register_pending(pending, id).await;
                let posted = http.post(url).json(&request).send().await;
                if let Err(e) = posted.and_then(|r| r.error_for_status()) {
                    pending.lock().await.remove(&id);
                    return Err(BridgeError::Transport(e.to_string()));
                }
                self.await_response(pending, id, rx, method).await
            }
        }
    }

    async fn await_response(
        &self,
        pending: &Pending,
        id: u64,
        rx: oneshot::Receiver<RpcResponse>,
        method: &str,
    ) -> Result<Value, BridgeError> {
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response.into_result(),
            Ok(Err(_)) => Err(BridgeError::Transport("connection closed".to_string())),
            Err(_) => {
                pending.lock().await.remove(&id);
                Err(BridgeError::Timeout(method.to_string()))
            }
        }
    }

    /// 握手；返回服务器自述信息
    pub async fn initialize(&self) -> Result<Value, BridgeError> {
        self.call(
            METHOD_INITIALIZE,
            serde_json::json!({
                "client_info": { "name": "wasp", "version": env!("CARGO_PKG_VERSION") }
            }),
        )
        .await
    }

    /// 枚举远程工具
    pub async fn list_tools(&self) -> Result<Vec<RemoteToolDescriptor>, BridgeError> {
        let result = self.call(METHOD_LIST_TOOLS, Value::Null).await?;
        let tools = result
            .get("tools")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(tools)
            .map_err(|e| BridgeError::Protocol(format!("bad tools/list payload: {e}")))
    }

    /// 调一次远程工具
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<RemoteCallResult, BridgeError> {
        let result = self
            .call(
                METHOD_CALL_TOOL,
                serde_json::json!({ "name": name, "arguments": arguments }),
            )
            .await?;
        Ok(RemoteCallResult::from_value(result))
    }

    /// 停掉泵任务；子进程随句柄回收
    pub fn close(&self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

impl Drop for ProtocolClient {
    fn drop(&mut self) {
        self.close();
    }
}

async fn register_pending(pending: &Pending, id: u64) -> oneshot::Receiver<RpcResponse> {
    let (tx, rx) = oneshot::channel();
    pending.lock().await.insert(id, tx);
    rx
}

/// 收包按 id 路由；无人等待的响应丢弃并告警
async fn route_response(server: &str, pending: &Pending, payload: &str) {
    let payload = payload.trim();
    if payload.is_empty() {
        return;
    }
    match serde_json::from_str::<RpcResponse>(payload) {
        Ok(response) => {
            let waiter = pending.lock().await.remove(&response.id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(response);
                }
                None => {
                    tracing::warn!(server = %server, id = response.id, "response with no waiter");
                }
            }
        }
        Err(e) => {
            tracing::warn!(server = %server, error = %e, "unparseable frame from server");
        }
    }
}
