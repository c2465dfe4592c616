//! 工作项上下文
//!
//! 封装"我正在处理哪个测验"以及它走到了流水线的哪一步。

use std::fmt::Display;

use tracing::debug;

/// 单个工作项的状态
///
/// `Queued → Dispatched → Fetching → Extracting → Classifying → Mapping → Indexing → Persisted`，
/// 任何非终态都可以进入 `Failed`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Queued,
    Dispatched,
    Fetching,
    Extracting,
    Classifying,
    Mapping,
    Indexing,
    Persisted,
    Failed,
}

impl ItemState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemState::Persisted | ItemState::Failed)
    }

    /// 流水线上的合法迁移
    pub fn can_advance_to(self, next: ItemState) -> bool {
        use ItemState::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Queued, Dispatched)
            | (Dispatched, Fetching)
            | (Fetching, Extracting)
            | (Extracting, Classifying)
            | (Classifying, Mapping)
            | (Mapping, Indexing)
            | (Indexing, Persisted) => true,
            _ => false,
        }
    }
}

/// 工作项：一个测验页面及其所属分类
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub url: String,
    pub category: String,
    pub title: String,
}

/// 工作项处理上下文
#[derive(Debug, Clone)]
pub struct ItemCtx {
    /// 派发序号（仅用于日志显示）
    pub item_index: usize,
    pub item: WorkItem,
    state: ItemState,
}

impl ItemCtx {
    pub fn new(item_index: usize, item: WorkItem) -> Self {
        Self {
            item_index,
            item,
            state: ItemState::Queued,
        }
    }

    pub fn state(&self) -> ItemState {
        self.state
    }

    pub fn url(&self) -> &str {
        &self.item.url
    }

    /// 推进状态；非法迁移只记录日志，不改变状态
    pub fn advance(&mut self, next: ItemState) {
        if self.state.can_advance_to(next) {
            debug!("{} {:?} -> {:?}", self, self.state, next);
            self.state = next;
        } else {
            debug!("{} 忽略非法状态迁移 {:?} -> {:?}", self, self.state, next);
        }
    }
}

impl Display for ItemCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[条目 {}]", self.item_index)
    }
}
