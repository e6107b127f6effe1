//! 弹性作业生命周期：面向长时外部计算工具的提交/轮询/诊断/重试状态机

mod diagnose;
mod manager;
mod types;

pub use diagnose::{classify, fix_for};
pub use manager::{JobLifecycleManager, JobManagerConfig};
pub use types::{FixStrategy, Job, JobBackend, JobErrorCode, JobStatus, RemoteStatus};
