//! Wasp - Rust 智能体运行时
//!
//! 把一条自然语言任务变成有界的模型查询与工具调用序列，全程受 token 预算
//! 与沙箱约束。模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、优雅关闭、多 Agent 协调与会话池
//! - **dialog**: 消息 / 对话 / 轨迹存储与 JSON 持久化
//! - **context**: 上下文窗口管理（token 估算与截断策略）
//! - **llm**: LLM 客户端抽象、退避重试与 Mock 实现
//! - **tools**: 工具箱（finish、bash、read_file、write_file、echo）与执行器
//! - **bridge**: 协议工具桥（管道 / HTTP / 事件流远程工具）
//! - **sandbox**: 沙箱会话（本地子进程 / 容器 + tmux）
//! - **engine**: 回合引擎（任务执行状态机与过程事件）
//! - **jobs**: 长时作业生命周期（提交 / 轮询 / 诊断 / 重试）
//! - **observability**: tracing 初始化

pub mod bridge;
pub mod config;
pub mod context;
pub mod core;
pub mod dialog;
pub mod engine;
pub mod jobs;
pub mod llm;
pub mod observability;
pub mod sandbox;
pub mod tools;
