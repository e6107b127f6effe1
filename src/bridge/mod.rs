//! 协议工具桥：传输无关的远程工具客户端复用层
//!
//! 外部托管的工具经三种传输之一（进程管道 / HTTP / 事件流）接入，包装为本地
//! Registry 条目；连接长驻共享，请求/响应按 id 配对，跨 Agent 并发安全。

pub mod client;
pub mod protocol;
pub mod proxy;

use thiserror::Error;

pub use client::{ProtocolClient, TransportConfig};
pub use protocol::{RemoteCallResult, RemoteToolDescriptor, RpcError, RpcRequest, RpcResponse};
pub use proxy::{ProtocolBridge, ServerConfig};

/// 桥接层错误；到达 Registry 边界前都会折叠为失败 ToolResult
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    /// 远端明确返回的错误对象
    #[error("Remote error: {0}")]
    Remote(#[from] RpcError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server not found: {0}")]
    ServerNotFound(String),

    #[error("Failed to spawn server process: {0}")]
    Spawn(String),
}
