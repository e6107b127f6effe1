//! 多 Agent 协调器与会话池
//!
//! 多个回合引擎并发运行，各自独占 Dialog/Trajectory，可共享一个注册表与会话池。
//! 一条逻辑沙箱会话就是一条执行通道：需要隔离的并发 Agent 必须绑定不同 lane，
//! 同一 lane 同时只发给一个 Agent。协调器级取消向所有子引擎扇出。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinSet;

use crate::core::{ShutdownManager, ShutdownReason};
use crate::dialog::Trajectory;
use crate::engine::TurnEngine;
use crate::sandbox::Session;

/// 会话池：lane 名 → 沙箱会话 + 独占锁
#[derive(Default)]
pub struct SessionPool {
    lanes: std::sync::Mutex<HashMap<String, LaneEntry>>,
}

#[derive(Clone)]
struct LaneEntry {
    session: Arc<dyn Session>,
    // lane 独占锁：guard 存活期间该会话只属于一个 Agent
    exclusive: Arc<AsyncMutex<()>>,
}

/// lane 租约：持有期间独占该会话
pub struct LaneGuard {
    session: Arc<dyn Session>,
    _permit: OwnedMutexGuard<()>,
}

impl LaneGuard {
    pub fn session(&self) -> Arc<dyn Session> {
        Arc::clone(&self.session)
    }
}

impl SessionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// 绑定 lane 到一个会话；重复绑定覆盖旧条目
    pub fn bind(&self, lane: impl Into<String>, session: Arc<dyn Session>) {
        let mut lanes = self.lanes.lock().expect("session pool lock poisoned");
        lanes.insert(
            lane.into(),
            LaneEntry {
                session,
                exclusive: Arc::new(AsyncMutex::new(())),
            },
        );
    }

    /// 取得 lane 的独占租约；lane 不存在返回 None，被占用则等待
    pub async fn acquire(&self, lane: &str) -> Option<LaneGuard> {
        let entry = {
            let lanes = self.lanes.lock().expect("session pool lock poisoned");
            lanes.get(lane).cloned()
        }?;
        let permit = entry.exclusive.lock_owned().await;
        Some(LaneGuard {
            session: entry.session,
            _permit: permit,
        })
    }

    pub fn lane_names(&self) -> Vec<String> {
        self.lanes
            .lock()
            .expect("session pool lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

/// 多 Agent 协调器
pub struct AgentCoordinator {
    shutdown: Arc<ShutdownManager>,
}

impl AgentCoordinator {
    pub fn new(shutdown: Arc<ShutdownManager>) -> Self {
        Self { shutdown }
    }

    /// 给新引擎派生取消 token（随协调器关闭一起取消）
    pub fn child_token(&self) -> tokio_util::sync::CancellationToken {
        self.shutdown.child_token()
    }

    /// 取消所有子引擎
    pub fn cancel_all(&self, reason: &str) {
        self.shutdown
            .shutdown(ShutdownReason::FatalError(reason.to_string()));
    }

    /// 并发运行一批 (引擎, 任务)；返回与输入同序的轨迹
    pub async fn run_all(&self, agents: Vec<(TurnEngine, String)>) -> Vec<Trajectory> {
        let mut set = JoinSet::new();
        let total = agents.len();
        for (index, (mut engine, task)) in agents.into_iter().enumerate() {
            set.spawn(async move {
                let trajectory = engine.run(&task).await;
                (index, trajectory)
            });
        }

        let mut slots: Vec<Option<Trajectory>> = (0..total).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, trajectory)) => slots[index] = Some(trajectory),
                Err(e) => tracing::warn!(error = %e, "agent task join failed"),
            }
        }
        slots.into_iter().flatten().collect()
    }
}
