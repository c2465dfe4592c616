//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量抓取和流程调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `app` - 应用入口
//! - 管理应用生命周期（初始化、运行、清理）
//! - 持有映射器、编号分配器、进度和输出
//! - 提供运维钩子（重置编号、重新加载映射、切换档位、未映射值报告）
//!
//! ### `scrape_orchestrator` - 抓取编排器
//! - 枚举分类与测验，生成工作项
//! - 按当前档位的并发上限和限速器派发（JoinSet）
//! - 区分条目级失败与运行级错误，输出统计
//!
//! ### `backoff` - 自适应降速
//! - 连续失败达到阈值时切换到更保守的档位
//!
//! ## 层次关系
//!
//! ```text
//! app (生命周期、钩子)
//!     ↓
//! scrape_orchestrator (处理 Vec<WorkItem>)
//!     ↓
//! workflow::ItemFlow (处理单个测验)
//!     ↓
//! services (能力层：quiz_source / classifier / mapper / sink / media)
//!     ↓
//! infrastructure (基础设施：RateLimiter / IndexAllocator / ProgressStore / JsExecutor)
//! ```

pub mod app;
pub mod backoff;
pub mod scrape_orchestrator;

// 重新导出主要类型
pub use app::App;
pub use backoff::AdaptiveBackoff;
pub use scrape_orchestrator::{OrchestratorOptions, RunStats, ScrapeOrchestrator};
