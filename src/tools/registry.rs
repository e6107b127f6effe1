//! 工具注册表
//!
//! 按注册顺序保存 Arc<dyn Tool>，get_tool_specs 输出顺序稳定，保证提示词确定性；
//! 名称冲突报 DuplicateTool；replace_prefixed 在一次 &mut 调用内整组换掉某服务器
//! 的代理工具，配合外层锁实现原子重载。

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::AgentError;
use crate::tools::{Tool, ToolSpec};

/// 工具注册表：注册顺序即列出顺序
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), AgentError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), AgentError> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(AgentError::DuplicateTool(name));
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// 注销指定工具；存在则返回 true
    pub fn unregister(&mut self, name: &str) -> bool {
        match self.index.remove(name) {
            Some(pos) => {
                self.tools.remove(pos);
                self.rebuild_index();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| Arc::clone(&self.tools[i]))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    /// 注册顺序稳定的 ToolSpec 列表（进入模型提示词）
    pub fn get_tool_specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    /// 原子换组：先移除所有 `{prefix}_` 开头的工具，再依次注册新组。
    /// 在同一次 &mut 借用内完成，持锁调用时不存在新旧共存的窗口。
    pub fn replace_prefixed(
        &mut self,
        prefix: &str,
        tools: Vec<Arc<dyn Tool>>,
    ) -> Result<usize, AgentError> {
        let qualified = format!("{prefix}_");
        self.tools.retain(|t| !t.name().starts_with(&qualified));
        self.rebuild_index();
        let count = tools.len();
        for tool in tools {
            self.register_arc(tool)?;
        }
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .tools
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name().to_string(), i))
            .collect();
    }
}
