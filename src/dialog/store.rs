//! 对话：只追加的消息序列 + 当前对模型可见的工具列表
//!
//! 每条消息在追加时打上所属回合号，滑动窗口淘汰按回合为原子单位；
//! 截断产生新 Dialog，原对话不被修改。

use crate::dialog::Message;
use crate::tools::ToolSpec;

/// 对话：消息只追加，回合号单调递增
#[derive(Clone, Debug, Default)]
pub struct Dialog {
    messages: Vec<Message>,
    /// 与 messages 平行：每条消息追加时的回合号（种子消息为 0）
    turn_marks: Vec<usize>,
    current_turn: usize,
    tool_specs: Vec<ToolSpec>,
}

impl Dialog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 用 system + user 种子消息构造（回合 0）
    pub fn seeded(system_prompt: &str, task: &str) -> Self {
        let mut dialog = Self::new();
        dialog.push(Message::system(system_prompt));
        dialog.push(Message::user(task));
        dialog
    }

    /// 进入下一回合；其后追加的消息都属于该回合
    pub fn begin_turn(&mut self) -> usize {
        self.current_turn += 1;
        self.current_turn
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
        self.turn_marks.push(self.current_turn);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn current_turn(&self) -> usize {
        self.current_turn
    }

    pub fn set_tool_specs(&mut self, specs: Vec<ToolSpec>) {
        self.tool_specs = specs;
    }

    pub fn tool_specs(&self) -> &[ToolSpec] {
        &self.tool_specs
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// (回合号, 消息) 视图，供截断策略使用
    pub(crate) fn entries(&self) -> impl Iterator<Item = (usize, &Message)> {
        self.turn_marks.iter().copied().zip(self.messages.iter())
    }

    /// 从 (回合号, 消息) 序列重建（截断策略内部使用；保持回合标记与工具列表）
    pub(crate) fn from_entries(
        entries: Vec<(usize, Message)>,
        current_turn: usize,
        tool_specs: Vec<ToolSpec>,
    ) -> Self {
        let (turn_marks, messages): (Vec<usize>, Vec<Message>) = entries.into_iter().unzip();
        Self {
            messages,
            turn_marks,
            current_turn,
            tool_specs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_dialog() {
        let d = Dialog::seeded("you are an agent", "list the files");
        assert_eq!(d.len(), 2);
        assert_eq!(d.current_turn(), 0);
    }

    #[test]
    fn test_turn_marks_follow_begin_turn() {
        let mut d = Dialog::seeded("sys", "task");
        d.begin_turn();
        d.push(Message::assistant("first"));
        d.begin_turn();
        d.push(Message::assistant("second"));
        let marks: Vec<usize> = d.entries().map(|(t, _)| t).collect();
        assert_eq!(marks, vec![0, 0, 1, 2]);
    }
}
