//! 上下文窗口管理
//!
//! 决定发给模型的消息子集：确定性 token 估算、按策略截断（NONE / LATEST_HALF /
//! SLIDING_WINDOW / SUMMARY 保留位）、prepare_for_query 入口。截断永不拆散
//! tool_call 与 tool_result 配对；连最小保留内容（system + 最新回合）都放不下时
//! 抛出 ContextOverflow 而不是发送超限请求。

use serde::Deserialize;

use crate::core::AgentError;
use crate::dialog::{Dialog, Message, Role};

/// 每条消息的固定开销（角色、分隔符等的近似 token 数）
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Token 估算器（字符计数近似）
///
/// 英文约 4 字符/token，非 ASCII（如中文）约 1.5 字符/token；确定性，无外部分词器。
pub struct TokenEstimator;

impl TokenEstimator {
    pub fn estimate(text: &str) -> usize {
        let mut ascii_chars = 0usize;
        let mut non_ascii_chars = 0usize;
        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }
        let tokens = ascii_chars / 4 + (non_ascii_chars as f64 / 1.5).ceil() as usize;
        tokens.max(1)
    }

    /// 单条消息的估算：正文 + 工具调用参数 + 固定开销
    pub fn estimate_message(msg: &Message) -> usize {
        let mut tokens = Self::estimate(&msg.content) + MESSAGE_OVERHEAD_TOKENS;
        for call in &msg.tool_calls {
            tokens += Self::estimate(&call.name);
            tokens += Self::estimate(&call.arguments.to_string());
        }
        tokens
    }
}

/// 截断策略
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationStrategy {
    /// 恒等，不截断
    None,
    /// 保留 system（可配置）+ 最近 ⌈n/2⌉ 条非 system 消息
    #[default]
    LatestHalf,
    /// 按回合为原子单位淘汰最旧回合，保留最近 N 个回合
    SlidingWindow,
    /// 保留位：未实现，调用即报错
    Summary,
}

/// 上下文窗口配置
#[derive(Clone, Debug)]
pub struct ContextConfig {
    /// 发给模型的 token 上限
    pub max_tokens: usize,
    /// 触发截断的安全余量
    pub safety_margin: usize,
    pub strategy: TruncationStrategy,
    /// LATEST_HALF / SLIDING_WINDOW 是否无条件保留 system 消息
    pub keep_system: bool,
    /// SLIDING_WINDOW 保留的最近回合数
    pub recent_turns: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: 32_000,
            safety_margin: 1_024,
            strategy: TruncationStrategy::LatestHalf,
            keep_system: true,
            recent_turns: 4,
        }
    }
}

/// 上下文窗口管理器
#[derive(Clone, Debug, Default)]
pub struct ContextManager {
    config: ContextConfig,
}

impl ContextManager {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// 对话整体估算（仅消息；工具列表随注册表固定，不参与淘汰决策）
    pub fn estimate_tokens(&self, dialog: &Dialog) -> usize {
        dialog
            .messages()
            .iter()
            .map(TokenEstimator::estimate_message)
            .sum()
    }

    /// 估算超过 max_tokens - safety_margin 时需要截断
    pub fn should_truncate(&self, dialog: &Dialog) -> bool {
        self.estimate_tokens(dialog) > self.config.max_tokens.saturating_sub(self.config.safety_margin)
    }

    /// 按配置策略截断；SUMMARY 为保留位，调用即失败而不是静默跳过
    pub fn truncate(&self, dialog: &Dialog) -> Result<Dialog, AgentError> {
        match self.config.strategy {
            TruncationStrategy::None => Ok(dialog.clone()),
            TruncationStrategy::LatestHalf => Ok(self.truncate_latest_half(dialog)),
            TruncationStrategy::SlidingWindow => Ok(self.truncate_sliding_window(dialog)),
            TruncationStrategy::Summary => Err(AgentError::Config(
                "summary truncation strategy is reserved and not implemented".to_string(),
            )),
        }
    }

    /// 查询前入口：需要时截断，否则恒等；截断后仍放不下则退到最小保留内容，
    /// 连最小内容都超限时抛 ContextOverflow
    pub fn prepare_for_query(&self, dialog: &Dialog) -> Result<Dialog, AgentError> {
        if !self.should_truncate(dialog) {
            return Ok(dialog.clone());
        }
        let truncated = self.truncate(dialog)?;
        if self.estimate_tokens(&truncated) <= self.config.max_tokens {
            return Ok(truncated);
        }
        let minimal = self.minimal_dialog(dialog);
        let needed = self.estimate_tokens(&minimal);
        if needed > self.config.max_tokens {
            return Err(AgentError::ContextOverflow {
                needed,
                budget: self.config.max_tokens,
            });
        }
        Ok(minimal)
    }

    /// LATEST_HALF：system（可配置）+ 最近 ⌈n/2⌉ 条非 system 消息。
    /// 窗口头部的孤儿 tool_result 直接丢弃；工具调用与结果永不拆开。
    fn truncate_latest_half(&self, dialog: &Dialog) -> Dialog {
        let mut system: Vec<(usize, Message)> = Vec::new();
        let mut rest: Vec<(usize, Message)> = Vec::new();
        for (turn, msg) in dialog.entries() {
            if self.config.keep_system && msg.role == Role::System {
                system.push((turn, msg.clone()));
            } else {
                rest.push((turn, msg.clone()));
            }
        }

        let keep = rest.len().div_ceil(2);
        let mut start = rest.len() - keep;
        // 被截断的 assistant 调用留下的孤儿结果不进入窗口
        while start < rest.len() && rest[start].1.role == Role::Tool {
            start += 1;
        }
        let mut kept: Vec<(usize, Message)> = rest.split_off(start);
        // 末尾若是带调用的 assistant 消息，说明其结果落在窗口外，整条丢弃
        while kept.last().is_some_and(|(_, m)| m.has_tool_calls()) {
            kept.pop();
        }

        let mut entries = system;
        entries.extend(kept);
        Dialog::from_entries(entries, dialog.current_turn(), dialog.tool_specs().to_vec())
    }

    /// SLIDING_WINDOW：整回合淘汰，最旧优先；至少保留 recent_turns 个回合
    fn truncate_sliding_window(&self, dialog: &Dialog) -> Dialog {
        let mut entries: Vec<(usize, Message)> = dialog
            .entries()
            .map(|(t, m)| (t, m.clone()))
            .collect();

        loop {
            let mut turns: Vec<usize> = entries
                .iter()
                .filter(|(_, m)| !(self.config.keep_system && m.role == Role::System))
                .map(|(t, _)| *t)
                .collect();
            turns.sort_unstable();
            turns.dedup();

            let over_budget = {
                let total: usize = entries
                    .iter()
                    .map(|(_, m)| TokenEstimator::estimate_message(m))
                    .sum();
                total > self.config.max_tokens.saturating_sub(self.config.safety_margin)
            };
            if !over_budget || turns.len() <= self.config.recent_turns {
                break;
            }
            let oldest = turns[0];
            entries.retain(|(t, m)| {
                (self.config.keep_system && m.role == Role::System) || *t != oldest
            });
        }

        Dialog::from_entries(entries, dialog.current_turn(), dialog.tool_specs().to_vec())
    }

    /// 最小保留内容：system 消息 + 最新回合的全部消息
    fn minimal_dialog(&self, dialog: &Dialog) -> Dialog {
        let latest_turn = dialog.entries().map(|(t, _)| t).max().unwrap_or(0);
        let entries: Vec<(usize, Message)> = dialog
            .entries()
            .filter(|(t, m)| m.role == Role::System || *t == latest_turn)
            .map(|(t, m)| (t, m.clone()))
            .collect();
        Dialog::from_entries(entries, dialog.current_turn(), dialog.tool_specs().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::ToolCall;

    fn manager(max_tokens: usize, strategy: TruncationStrategy) -> ContextManager {
        ContextManager::new(ContextConfig {
            max_tokens,
            safety_margin: 0,
            strategy,
            keep_system: true,
            recent_turns: 2,
        })
    }

    /// system + 40 条普通消息的对话
    fn wide_dialog() -> Dialog {
        let mut d = Dialog::new();
        d.push(Message::system("you are an agent"));
        for i in 0..40 {
            d.begin_turn();
            d.push(Message::user(format!("message number {i} with some padding text")));
        }
        d
    }

    #[test]
    fn test_estimator_counts_ascii_and_wide_chars() {
        assert!(TokenEstimator::estimate("hello world, this is text") > 0);
        let ascii = TokenEstimator::estimate("aaaaaaaaaaaaaaaa");
        let wide = TokenEstimator::estimate("四个汉字四个汉字四个汉字四个字");
        assert!(wide > ascii);
    }

    #[test]
    fn test_latest_half_keeps_system_plus_recent_twenty() {
        let d = wide_dialog();
        let mgr = manager(10, TruncationStrategy::LatestHalf);
        assert!(mgr.should_truncate(&d));
        let t = mgr.truncate(&d).unwrap();
        assert_eq!(t.len(), 21);
        assert_eq!(t.messages()[0].role, Role::System);
        assert!(t.messages()[1].content.contains("message number 20"));
        assert!(t.messages()[20].content.contains("message number 39"));
    }

    #[test]
    fn test_truncate_never_grows_estimate() {
        let d = wide_dialog();
        for strategy in [
            TruncationStrategy::None,
            TruncationStrategy::LatestHalf,
            TruncationStrategy::SlidingWindow,
        ] {
            let mgr = manager(50, strategy);
            let t = mgr.truncate(&d).unwrap();
            assert!(mgr.estimate_tokens(&t) <= mgr.estimate_tokens(&d));
        }
    }

    #[test]
    fn test_latest_half_drops_orphaned_tool_results() {
        let mut d = Dialog::new();
        d.push(Message::system("sys"));
        // 回合 1：调用 + 两条结果；回合 2、3：普通消息，使切点落在结果上
        d.begin_turn();
        let call_a = ToolCall::new("bash", serde_json::json!({"command": "ls"}));
        let call_b = ToolCall::new("bash", serde_json::json!({"command": "pwd"}));
        let id_a = call_a.id.clone();
        let id_b = call_b.id.clone();
        d.push(Message::assistant_with_calls("running", vec![call_a, call_b]));
        d.push(Message::tool_result(id_a, "file listing"));
        d.push(Message::tool_result(id_b, "/workspace"));
        d.begin_turn();
        d.push(Message::assistant("plain"));
        d.begin_turn();
        d.push(Message::assistant("plain again"));

        let mgr = manager(10, TruncationStrategy::LatestHalf);
        let t = mgr.truncate(&d).unwrap();
        // 任何保留的 tool 消息前面必须有携带对应调用的 assistant 消息
        for (idx, msg) in t.messages().iter().enumerate() {
            if msg.role == Role::Tool {
                let call_id = msg.tool_call_id.as_deref().unwrap();
                let paired = t.messages()[..idx].iter().any(|m| {
                    m.tool_calls.iter().any(|c| c.id == call_id)
                });
                assert!(paired, "orphaned tool result survived truncation");
            }
        }
    }

    #[test]
    fn test_sliding_window_evicts_whole_turns() {
        let mut d = Dialog::new();
        d.push(Message::system("sys"));
        for i in 0..6 {
            d.begin_turn();
            let call = ToolCall::new("echo", serde_json::json!({"text": format!("turn {i}")}));
            let id = call.id.clone();
            d.push(Message::assistant_with_calls(format!("turn {i} padding padding"), vec![call]));
            d.push(Message::tool_result(id, format!("result {i} padding padding")));
        }
        let mgr = manager(60, TruncationStrategy::SlidingWindow);
        let t = mgr.truncate(&d).unwrap();
        // 保留下来的非 system 消息成对出现（调用 + 结果），没有半个回合
        let non_system: Vec<&Message> =
            t.messages().iter().filter(|m| m.role != Role::System).collect();
        assert!(!non_system.is_empty());
        assert_eq!(non_system.len() % 2, 0);
        for pair in non_system.chunks(2) {
            assert!(pair[0].has_tool_calls());
            assert_eq!(pair[1].role, Role::Tool);
        }
    }

    #[test]
    fn test_summary_strategy_fails_loudly() {
        let d = wide_dialog();
        let mgr = manager(10, TruncationStrategy::Summary);
        let err = mgr.truncate(&d).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_prepare_identity_when_within_budget() {
        let d = wide_dialog();
        let mgr = manager(1_000_000, TruncationStrategy::LatestHalf);
        let prepared = mgr.prepare_for_query(&d).unwrap();
        assert_eq!(prepared.len(), d.len());
    }

    #[test]
    fn test_prepare_overflows_when_minimal_content_too_large() {
        let mut d = Dialog::new();
        d.push(Message::system("s".repeat(4000)));
        d.begin_turn();
        d.push(Message::user("u".repeat(4000)));
        let mgr = manager(100, TruncationStrategy::LatestHalf);
        let err = mgr.prepare_for_query(&d).unwrap_err();
        assert!(matches!(err, AgentError::ContextOverflow { .. }));
    }

    #[test]
    fn test_prepare_falls_back_to_minimal_dialog() {
        // 截断一半仍超限，但 system + 最新回合放得下
        let mut d = Dialog::new();
        d.push(Message::system("sys"));
        for i in 0..30 {
            d.begin_turn();
            d.push(Message::user(format!("padded message {i} {}", "x".repeat(400))));
        }
        let mgr = manager(150, TruncationStrategy::LatestHalf);
        let prepared = mgr.prepare_for_query(&d).unwrap();
        assert!(mgr.estimate_tokens(&prepared) <= 150);
        assert_eq!(prepared.messages()[0].role, Role::System);
        assert!(prepared.messages().last().unwrap().content.contains("message 29"));
    }
}
