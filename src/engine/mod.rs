//! 回合引擎：任务执行状态机与过程事件

mod events;
mod turn;

pub use events::AgentEvent;
pub use turn::{reason, EngineConfig, TurnEngine};
