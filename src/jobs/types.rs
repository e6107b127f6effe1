//! 作业数据模型与远端后端抽象
//!
//! 面向「提交后拿到作业 id、结果要轮询」的长时外部计算工具；
//! Submitted → Polling → {Succeeded | Failed → Diagnosing → Resubmitted → …| GaveUp}。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 作业状态；GaveUp / Succeeded 为终态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    Polling,
    Succeeded,
    Failed,
    Diagnosing,
    Resubmitted,
    GaveUp,
}

/// 诊断文本映射出的错误码（封闭集合）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorCode {
    ScfDiverged,
    OutOfMemory,
    WalltimeExceeded,
    DiskQuota,
    BadInput,
    /// 未匹配任何模式；没有修复建议，循环就此停止
    UnknownError,
}

/// 结构化修复策略：参数增量，重提交时合并进原参数
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FixStrategy {
    pub summary: String,
    pub param_deltas: serde_json::Map<String, Value>,
}

/// 一次作业的完整生命周期记录
#[derive(Clone, Debug, Serialize)]
pub struct Job {
    pub id: String,
    /// 远端作业 id，提交成功后填入（重提交会更新）
    pub remote_id: Option<String>,
    pub status: JobStatus,
    pub retries: u32,
    pub error_code: Option<JobErrorCode>,
    /// 最后一次失败的完整诊断文本
    pub diagnostics: Option<String>,
}

impl Job {
    pub fn new() -> Self {
        Self {
            id: format!("job-{}", uuid::Uuid::new_v4()),
            remote_id: None,
            status: JobStatus::Submitted,
            retries: 0,
            error_code: None,
            diagnostics: None,
        }
    }
}

impl Default for Job {
    fn default() -> Self {
        Self::new()
    }
}

/// 远端作业的一次状态查询结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteStatus {
    Running,
    Succeeded,
    Failed,
}

/// 长时计算后端：提交 / 查状态 / 取诊断 / 撤销
///
/// 一次 status 调用就是一次远端往返，不做任何内部等待。
#[async_trait]
pub trait JobBackend: Send + Sync {
    async fn submit(&self, params: &Value) -> Result<String, String>;

    async fn status(&self, remote_id: &str) -> Result<RemoteStatus, String>;

    async fn diagnostics(&self, remote_id: &str) -> Result<String, String>;

    async fn cancel(&self, remote_id: &str) -> Result<(), String>;
}
