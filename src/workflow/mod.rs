pub mod item_ctx;
pub mod item_flow;

pub use item_ctx::{ItemCtx, ItemState, WorkItem};
pub use item_flow::{FlowOptions, ItemFlow, ItemOutcome};
