//! 应用入口 - 编排层
//!
//! ## 职责
//!
//! 1. **应用初始化**：加载档位与映射、打开编号 / 进度 / 输出、准备浏览器
//! 2. **运行**：Ctrl-C 取消、覆盖模式的备份与清空、委托 `ScrapeOrchestrator`
//! 3. **运维钩子**：重置编号、重新加载映射、未映射值报告、切换档位

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::browser;
use crate::config::{Config, OutputMode};
use crate::error::AppResult;
use crate::infrastructure::{IndexAllocator, ProgressStore, RateLimiter};
use crate::models::{load_profile_catalog, MappingAxis, ProfileCatalog, QuestionType, SpeedProfile};
use crate::orchestrator::backoff::AdaptiveBackoff;
use crate::orchestrator::scrape_orchestrator::{OrchestratorOptions, RunStats, ScrapeOrchestrator};
use crate::services::category_mapper::UnmappedValues;
use crate::services::{
    CategoryMapper, ChromeQuizSource, CsvSink, FetchOptions, MappingMode, MediaDownloader,
    QuestionClassifier, QuizSource, ResultSink,
};
use crate::utils::fs::write_atomic;
use crate::utils::logging::{log_startup, print_final_stats};
use crate::workflow::{FlowOptions, ItemFlow};

/// 应用主结构
pub struct App<S: QuizSource = ChromeQuizSource> {
    config: Config,
    mapper: Arc<CategoryMapper>,
    allocator: Arc<IndexAllocator>,
    progress: Arc<ProgressStore>,
    sink: Arc<CsvSink>,
    orchestrator: ScrapeOrchestrator<S>,
}

impl App<ChromeQuizSource> {
    /// 初始化应用：连接或启动浏览器
    pub async fn initialize(config: Config) -> Result<Self> {
        log_startup(&config);
        let (catalog, profile) = load_profiles(&config).await?;

        let browser = match config.browser_debug_port {
            Some(port) => browser::connect_to_browser(port).await?,
            None => browser::launch_headless_browser(config.chrome_executable.as_deref()).await?,
        };
        let source = ChromeQuizSource::new(browser, &config.base_url, FetchOptions::from(&profile));

        Self::assemble(config, catalog, profile, source).await
    }
}

impl<S: QuizSource> App<S> {
    /// 使用给定的测验来源初始化
    pub async fn with_source(config: Config, source: S) -> Result<Self> {
        let (catalog, profile) = load_profiles(&config).await?;
        Self::assemble(config, catalog, profile, source).await
    }

    async fn assemble(
        config: Config,
        catalog: ProfileCatalog,
        profile: SpeedProfile,
        source: S,
    ) -> Result<Self> {
        info!("⚙️ 速度档位: {}", profile);

        let mode = if config.strict_mapping {
            MappingMode::Strict
        } else {
            MappingMode::Lenient
        };
        let mapper = Arc::new(CategoryMapper::load(&config.mappings_file, mode).await?);

        let allocator = Arc::new(IndexAllocator::load(&config.index_file)?);
        let progress = Arc::new(ProgressStore::load(&config.progress_file)?);
        if config.dry_run {
            if config.reset_indices || config.reset_progress {
                warn!("⚠️ 试运行模式下忽略 RESET_INDICES / RESET_PROGRESS");
            }
        } else {
            if config.reset_indices {
                allocator.reset()?;
            }
            if config.reset_progress {
                progress.clear()?;
            }
        }

        let sink = Arc::new(CsvSink::open(&config.output_dir)?);
        let media = Arc::new(MediaDownloader::new(
            &config.images_dir,
            &config.audio_dir,
            profile.timeouts.page_load(),
        )?);

        let source = Arc::new(source);
        let flow = Arc::new(ItemFlow::new(
            Arc::clone(&source),
            Arc::clone(&mapper),
            Arc::new(QuestionClassifier::new()),
            Arc::clone(&allocator),
            Arc::clone(&sink) as Arc<dyn ResultSink>,
            Arc::clone(&progress),
            Some(media),
            FlowOptions {
                dry_run: config.dry_run,
                index_by_category: config.index_by_category,
            },
        ));

        let limiter = Arc::new(RateLimiter::new(&profile)?);
        let backoff = Arc::new(AdaptiveBackoff::new(catalog, profile, config.error_threshold));
        let orchestrator = ScrapeOrchestrator::new(
            source,
            flow,
            limiter,
            backoff,
            Arc::clone(&progress),
            OrchestratorOptions {
                category_filter: config.categories.clone(),
                max_questions: config.max_questions,
            },
        );

        Ok(Self {
            config,
            mapper,
            allocator,
            progress,
            sink,
            orchestrator,
        })
    }

    /// 运行应用主逻辑，Ctrl-C 时停止派发并等待在途条目
    pub async fn run(&self) -> Result<RunStats> {
        let cancel = CancellationToken::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("🛑 收到中断信号，停止派发新的测验...");
                    cancel.cancel();
                }
            })
        };

        let result = self.run_with_cancel(&cancel).await;
        watcher.abort();
        result
    }

    /// 使用外部取消令牌运行
    pub async fn run_with_cancel(&self, cancel: &CancellationToken) -> Result<RunStats> {
        self.prepare_output()?;

        let result = self.orchestrator.run(cancel).await;

        // 无论成败都输出未映射值，方便补全映射文件
        if let Err(e) = self.unmapped_report() {
            warn!("⚠️ 写入未映射值报告失败: {}", e);
        }

        let stats = result?;
        print_final_stats(&stats, &self.config.output_log_file);
        Ok(stats)
    }

    /// 覆盖模式：先备份，再清空输出和进度
    fn prepare_output(&self) -> AppResult<()> {
        if self.config.output_mode != OutputMode::Overwrite {
            return Ok(());
        }
        if self.config.dry_run {
            info!("🧪 试运行：跳过覆盖模式的清空步骤");
            return Ok(());
        }

        if self.config.backup_before_write {
            self.sink.backup()?;
        }
        for question_type in QuestionType::ALL {
            self.sink.overwrite(&[], question_type)?;
        }
        self.progress.clear()?;
        info!("🧹 覆盖模式：已清空输出与抓取进度");
        Ok(())
    }

    // ========== 运维钩子 ==========

    pub fn reset_indices(&self) -> AppResult<()> {
        self.allocator.reset()
    }

    pub async fn reload_mappings(&self) -> AppResult<()> {
        self.mapper.reload_mappings().await
    }

    pub fn switch_profile(&self, name: &str) -> AppResult<()> {
        self.orchestrator.switch_profile(name)
    }

    pub fn current_profile(&self) -> SpeedProfile {
        self.orchestrator.backoff().current()
    }

    /// 记录未映射值；配置了报告路径时同时写成 JSON
    pub fn unmapped_report(&self) -> AppResult<UnmappedValues> {
        let values = self.mapper.get_unmapped_values();
        let total: usize = values.values().map(|v| v.len()).sum();
        if total == 0 {
            info!("✓ 没有未映射的分类值");
        } else {
            warn!("⚠️ 共有 {} 个未映射的分类值:", total);
            for (axis, set) in values.iter().filter(|(_, set)| !set.is_empty()) {
                warn!(
                    "  [{}] {}",
                    axis.section_name(),
                    set.iter().cloned().collect::<Vec<_>>().join(", ")
                );
            }
        }

        if let Some(path) = &self.config.unmapped_report {
            write_unmapped_report(path, &values)?;
        }
        Ok(values)
    }

    pub fn index_allocator(&self) -> &Arc<IndexAllocator> {
        &self.allocator
    }

    pub fn sink(&self) -> &Arc<CsvSink> {
        &self.sink
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

async fn load_profiles(config: &Config) -> AppResult<(ProfileCatalog, SpeedProfile)> {
    let catalog = load_profile_catalog(config.profiles_file.as_deref()).await?;
    let profile = catalog.get(&config.speed_profile)?;
    Ok((catalog, profile))
}

fn write_unmapped_report(path: &Path, values: &UnmappedValues) -> AppResult<()> {
    let report: BTreeMap<&str, Vec<&String>> = MappingAxis::ALL
        .into_iter()
        .map(|axis| {
            let list = values.get(&axis).map(|s| s.iter().collect()).unwrap_or_default();
            (axis.as_str(), list)
        })
        .collect();
    let json = serde_json::to_vec_pretty(&report)?;
    write_atomic(path, &json)?;
    info!("📄 未映射值报告已写入: {}", path.display());
    Ok(())
}
