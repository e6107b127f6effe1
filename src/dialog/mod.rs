//! 对话与轨迹存储：消息数据模型、只追加对话、回合记录持久化

mod message;
mod store;
mod trajectory;

pub use store::Dialog;
pub use message::{Message, Role, ToolCall};
pub use trajectory::{StepRecord, TaskStatus, Trajectory, TrajectoryWriter};
