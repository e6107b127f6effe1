//! 核心层：错误类型、优雅关闭与多 Agent 协调

pub mod coordinator;
pub mod error;
pub mod shutdown;

pub use coordinator::{AgentCoordinator, LaneGuard, SessionPool};
pub use error::AgentError;
pub use shutdown::{
    run_with_graceful_shutdown, SessionCleanup, ShutdownCleanup, ShutdownCoordinator,
    ShutdownManager, ShutdownReason,
};
