//! # Quiz Scrape
//!
//! 并发抓取在线测验题目，识别题型、映射分类、分配稳定编号后写出为 CSV
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有共享状态，只暴露能力
//! - `RateLimiter` - 全局限速（令牌桶 + 随机间隔）
//! - `IndexAllocator` - 持久化的题目编号
//! - `ProgressStore` - 已完成测验记录
//! - `JsExecutor` - 页面脚本执行
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `QuizSource` / `ChromeQuizSource` - 页面渲染与题目提取
//! - `QuestionClassifier` - 题型识别
//! - `CategoryMapper` - 分类映射
//! - `ResultSink` / `CsvSink` - 结果写出
//! - `MediaDownloader` - 图片 / 音频下载
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个测验"的完整处理流程
//! - `ItemCtx` - 上下文封装（条目序号 + 状态）
//! - `ItemFlow` - 流程编排（fetch → extract → classify → map → index → persist）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/app` - 应用入口，管理资源与运维钩子
//! - `orchestrator/scrape_orchestrator` - 并发派发与统计
//! - `orchestrator/backoff` - 自适应降速
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::{Config, OutputMode};
pub use error::{AppError, AppResult};
pub use models::{QuestionType, SpeedProfile};
pub use orchestrator::{App, RunStats};
