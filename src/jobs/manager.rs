//! 作业生命周期管理器：提交 / 轮询 / 诊断 / 重提交
//!
//! 固定间隔轮询避免打爆远端 API；单次状态查询不超过一次往返（外加超时兜底）。
//! 终态失败取诊断文本走纯映射得到错误码与参数增量；没有修复建议或重试到顶
//! 就返回 GaveUp 并携带完整诊断，绝不瞎猜。

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::jobs::{classify, fix_for, Job, JobBackend, JobStatus, RemoteStatus};

/// 连续状态查询失败的容忍次数，超过按放弃处理
const MAX_POLL_ERRORS: u32 = 5;

/// 作业管理配置
#[derive(Clone, Debug)]
pub struct JobManagerConfig {
    /// 轮询间隔；生产环境应为数十秒量级
    pub poll_interval: Duration,
    /// 诊断后重提交的次数上限
    pub max_retries: u32,
    /// 单次状态查询的往返超时
    pub status_timeout: Duration,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            max_retries: 2,
            status_timeout: Duration::from_secs(10),
        }
    }
}

/// 作业生命周期管理器
pub struct JobLifecycleManager {
    backend: Arc<dyn JobBackend>,
    config: JobManagerConfig,
    cancel: CancellationToken,
}

impl JobLifecycleManager {
    pub fn new(backend: Arc<dyn JobBackend>, config: JobManagerConfig) -> Self {
        Self {
            backend,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 驱动一个作业到终态；返回的 Job 里带有完整的重试与诊断记录
    pub async fn run(&self, params: Value) -> Job {
        let mut job = Job::new();
        let mut params = params;

        loop {
            // 提交（或重提交）
            let remote_id = match self.backend.submit(&params).await {
                Ok(id) => id,
                Err(e) => {
                    tracing::error!(job = %job.id, error = %e, "job submission failed");
                    job.status = JobStatus::GaveUp;
                    job.diagnostics = Some(format!("submission failed: {e}"));
                    return job;
                }
            };
            tracing::info!(job = %job.id, remote_id = %remote_id, retries = job.retries, "job submitted");
            job.remote_id = Some(remote_id.clone());
            job.status = JobStatus::Polling;

            // 轮询直到远端进入终态
            let remote_status = match self.poll_until_terminal(&mut job, &remote_id).await {
                Some(status) => status,
                None => return job, // 取消或轮询彻底失败，job 内已填好状态
            };

            match remote_status {
                RemoteStatus::Succeeded => {
                    job.status = JobStatus::Succeeded;
                    tracing::info!(job = %job.id, retries = job.retries, "job succeeded");
                    return job;
                }
                RemoteStatus::Failed => {
                    job.status = JobStatus::Diagnosing;
                    let diagnostics = self
                        .backend
                        .diagnostics(&remote_id)
                        .await
                        .unwrap_or_else(|e| format!("diagnostics unavailable: {e}"));
                    let code = classify(&diagnostics);
                    job.error_code = Some(code);
                    job.diagnostics = Some(diagnostics);
                    tracing::warn!(job = %job.id, error_code = ?code, "job failed, diagnosed");

                    let Some(fix) = fix_for(code) else {
                        job.status = JobStatus::GaveUp;
                        return job;
                    };
                    if job.retries >= self.config.max_retries {
                        job.status = JobStatus::GaveUp;
                        return job;
                    }

                    // 合并参数增量后重提交
                    if let Value::Object(map) = &mut params {
                        for (key, value) in &fix.param_deltas {
                            map.insert(key.clone(), value.clone());
                        }
                    }
                    job.retries += 1;
                    job.status = JobStatus::Resubmitted;
                    tracing::info!(job = %job.id, fix = %fix.summary, retry = job.retries, "resubmitting with fix");
                }
                RemoteStatus::Running => unreachable!("poll_until_terminal only returns terminal states"),
            }
        }
    }

    /// 轮询到 Succeeded / Failed；取消或连续查询失败返回 None
    async fn poll_until_terminal(&self, job: &mut Job, remote_id: &str) -> Option<RemoteStatus> {
        let mut consecutive_errors: u32 = 0;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = self.cancel.cancelled() => {
                    tracing::info!(job = %job.id, "job polling cancelled");
                    let _ = self.backend.cancel(remote_id).await;
                    job.status = JobStatus::GaveUp;
                    job.diagnostics = Some("cancelled while polling".to_string());
                    return None;
                }
            }

            let checked =
                tokio::time::timeout(self.config.status_timeout, self.backend.status(remote_id))
                    .await;
            match checked {
                Ok(Ok(RemoteStatus::Running)) => {
                    consecutive_errors = 0;
                }
                Ok(Ok(status)) => return Some(status),
                Ok(Err(e)) => {
                    consecutive_errors += 1;
                    tracing::warn!(job = %job.id, error = %e, attempt = consecutive_errors, "status check failed");
                }
                Err(_) => {
                    consecutive_errors += 1;
                    tracing::warn!(job = %job.id, attempt = consecutive_errors, "status check timed out");
                }
            }
            if consecutive_errors >= MAX_POLL_ERRORS {
                job.status = JobStatus::GaveUp;
                job.diagnostics = Some("status endpoint unreachable".to_string());
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    /// 脚本后端：状态序列逐次弹出，诊断文本固定
    struct ScriptedBackend {
        statuses: Mutex<VecDeque<RemoteStatus>>,
        diagnostics: String,
        submissions: Mutex<Vec<Value>>,
    }

    impl ScriptedBackend {
        fn new(statuses: Vec<RemoteStatus>, diagnostics: &str) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
                diagnostics: diagnostics.to_string(),
                submissions: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl JobBackend for ScriptedBackend {
        async fn submit(&self, params: &Value) -> Result<String, String> {
            let mut subs = self.submissions.lock().unwrap();
            subs.push(params.clone());
            Ok(format!("remote-{}", subs.len()))
        }

        async fn status(&self, _remote_id: &str) -> Result<RemoteStatus, String> {
            Ok(self
                .statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(RemoteStatus::Succeeded))
        }

        async fn diagnostics(&self, _remote_id: &str) -> Result<String, String> {
            Ok(self.diagnostics.clone())
        }

        async fn cancel(&self, _remote_id: &str) -> Result<(), String> {
            Ok(())
        }
    }

    fn fast_config() -> JobManagerConfig {
        JobManagerConfig {
            poll_interval: Duration::from_millis(1),
            max_retries: 2,
            status_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_scf_divergence_one_retry_then_success() {
        // Running, Running, Failed(scf_diverged), Running, Succeeded
        let backend = Arc::new(ScriptedBackend::new(
            vec![
                RemoteStatus::Running,
                RemoteStatus::Running,
                RemoteStatus::Failed,
                RemoteStatus::Running,
                RemoteStatus::Succeeded,
            ],
            "ERROR: SCF failed to converge after 96 cycles",
        ));
        let manager = JobLifecycleManager::new(Arc::clone(&backend) as Arc<dyn JobBackend>, fast_config());

        let job = manager.run(serde_json::json!({"molecule": "H2O"})).await;

        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.retries, 1);
        assert_eq!(job.error_code, Some(crate::jobs::JobErrorCode::ScfDiverged));

        // 恰好一次诊断+重提交：两次 submit，第二次带上修复增量
        let subs = backend.submissions.lock().unwrap();
        assert_eq!(subs.len(), 2);
        assert!(subs[0].get("scf_damping").is_none());
        assert!(subs[1].get("scf_damping").is_some());
        assert_eq!(subs[1]["molecule"], "H2O");
    }

    #[tokio::test]
    async fn test_unknown_error_stops_without_retry() {
        let backend = Arc::new(ScriptedBackend::new(
            vec![RemoteStatus::Failed],
            "segfault deep inside vendor blob",
        ));
        let manager = JobLifecycleManager::new(Arc::clone(&backend) as Arc<dyn JobBackend>, fast_config());

        let job = manager.run(serde_json::json!({})).await;

        assert_eq!(job.status, JobStatus::GaveUp);
        assert_eq!(job.retries, 0);
        assert_eq!(job.error_code, Some(crate::jobs::JobErrorCode::UnknownError));
        assert!(job.diagnostics.unwrap().contains("segfault"));
        assert_eq!(backend.submissions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_cap_yields_gave_up_with_diagnostics() {
        // 每次提交都以 OOM 失败
        let backend = Arc::new(ScriptedBackend::new(
            vec![RemoteStatus::Failed, RemoteStatus::Failed, RemoteStatus::Failed, RemoteStatus::Failed],
            "slurmstepd: OOM-killed",
        ));
        let manager = JobLifecycleManager::new(Arc::clone(&backend) as Arc<dyn JobBackend>, fast_config());

        let job = manager.run(serde_json::json!({})).await;

        assert_eq!(job.status, JobStatus::GaveUp);
        assert_eq!(job.retries, 2); // 不超过 max_retries
        assert!(job.diagnostics.unwrap().contains("OOM"));
        assert_eq!(backend.submissions.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_cancellation_during_polling() {
        let backend = Arc::new(ScriptedBackend::new(
            vec![RemoteStatus::Running; 10_000],
            "",
        ));
        let cancel = CancellationToken::new();
        let manager = JobLifecycleManager::new(
            Arc::clone(&backend) as Arc<dyn JobBackend>,
            JobManagerConfig {
                poll_interval: Duration::from_millis(5),
                ..fast_config()
            },
        )
        .with_cancel(cancel.clone());

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });

        let job = manager.run(serde_json::json!({})).await;
        assert_eq!(job.status, JobStatus::GaveUp);
        assert!(job.diagnostics.unwrap().contains("cancelled"));
    }
}
