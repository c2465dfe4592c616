//! 抓取编排器 - 编排层
//!
//! ## 职责
//!
//! 1. **收集工作项**：分类 → 测验链接，去重并跳过已完成的测验
//! 2. **派发**：`JoinSet` 持有在途条目，派发前重新读取当前档位的并发上限并等待限速器
//! 3. **失败处理**：普通失败计入降速窗口，运行级错误取消派发、等待在途条目结束后上抛
//! 4. **统计**：汇总 `RunStats`

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::{ProgressStore, RateLimiter};
use crate::models::QuestionType;
use crate::orchestrator::backoff::AdaptiveBackoff;
use crate::services::{QuizCategory, QuizSource};
use crate::workflow::{ItemCtx, ItemFlow, ItemOutcome, ItemState, WorkItem};

const LISTING_ATTEMPTS: u32 = 3;

/// 运行统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    pub items_total: usize,
    pub items_succeeded: usize,
    pub items_failed: usize,
    pub items_skipped_done: usize,
    pub questions_found: usize,
    pub questions_persisted: usize,
    pub questions_duplicate: usize,
    pub questions_suspicious: usize,
    pub media_failures: usize,
    pub per_type: BTreeMap<QuestionType, usize>,
    pub downgrades: u32,
    pub final_profile: String,
    pub cancelled: bool,
}

impl RunStats {
    fn absorb(&mut self, outcome: &ItemOutcome) {
        self.items_succeeded += 1;
        self.questions_found += outcome.questions_found;
        self.questions_persisted += outcome.persisted_total();
        self.questions_duplicate += outcome.duplicates;
        self.questions_suspicious += outcome.suspicious;
        self.media_failures += outcome.media_failures;
        for (question_type, count) in &outcome.persisted {
            *self.per_type.entry(*question_type).or_default() += count;
        }
    }
}

/// 编排参数
#[derive(Debug, Clone, Default)]
pub struct OrchestratorOptions {
    /// 只保留 URL 中包含任一片段的分类（不区分大小写），为空时不过滤
    pub category_filter: Vec<String>,
    /// 写入这么多道题后停止派发
    pub max_questions: Option<usize>,
}

type ItemResult = (ItemCtx, AppResult<ItemOutcome>);

/// 抓取编排器
pub struct ScrapeOrchestrator<S: QuizSource> {
    source: Arc<S>,
    flow: Arc<ItemFlow<S>>,
    limiter: Arc<RateLimiter>,
    backoff: Arc<AdaptiveBackoff>,
    progress: Arc<ProgressStore>,
    options: OrchestratorOptions,
}

impl<S: QuizSource> ScrapeOrchestrator<S> {
    pub fn new(
        source: Arc<S>,
        flow: Arc<ItemFlow<S>>,
        limiter: Arc<RateLimiter>,
        backoff: Arc<AdaptiveBackoff>,
        progress: Arc<ProgressStore>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            source,
            flow,
            limiter,
            backoff,
            progress,
            options,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn backoff(&self) -> &Arc<AdaptiveBackoff> {
        &self.backoff
    }

    /// 手动切换档位并立即应用到限速器
    pub fn switch_profile(&self, name: &str) -> AppResult<()> {
        let profile = self.backoff.switch_profile(name)?;
        self.limiter.reconfigure(&profile)
    }

    /// 收集工作项并全部处理
    pub async fn run(&self, cancel: &CancellationToken) -> AppResult<RunStats> {
        let (items, skipped) = match self.collect_work_items(cancel).await {
            Ok(collected) => collected,
            Err(e) if e.is_cancelled() => {
                warn!("⚠️ 枚举测验时运行被取消");
                return Ok(RunStats {
                    final_profile: self.backoff.current().name,
                    cancelled: true,
                    ..Default::default()
                });
            }
            Err(e) => return Err(e),
        };
        let mut stats = self.run_items(items, cancel).await?;
        stats.items_skipped_done = skipped;
        Ok(stats)
    }

    /// 枚举分类和测验，返回待处理条目与已完成而跳过的数量
    pub async fn collect_work_items(
        &self,
        cancel: &CancellationToken,
    ) -> AppResult<(Vec<WorkItem>, usize)> {
        info!("\n📁 正在枚举测验分类...");
        let categories = self.list_categories_with_retry(cancel).await?;
        let categories = self.filter_categories(categories);
        info!("✓ 待处理分类 {} 个", categories.len());

        let mut seen = HashSet::new();
        let mut items = Vec::new();
        let mut skipped = 0;

        for category in &categories {
            if cancel.is_cancelled() {
                break;
            }
            self.limiter.acquire(cancel).await?;
            let quizzes = match self.source.list_quizzes(&category.url).await {
                Ok(quizzes) => quizzes,
                Err(e) => {
                    warn!("⚠️ 分类 {} 的测验列表获取失败，跳过: {}", category.name, e);
                    continue;
                }
            };

            for quiz in quizzes {
                if !seen.insert(quiz.url.clone()) {
                    continue;
                }
                if self.progress.is_done(&quiz.url) {
                    skipped += 1;
                    continue;
                }
                items.push(WorkItem {
                    url: quiz.url,
                    category: category.name.clone(),
                    title: quiz.title,
                });
            }
        }

        info!("✓ 找到 {} 个待处理测验（已完成跳过 {} 个）", items.len(), skipped);
        Ok((items, skipped))
    }

    async fn list_categories_with_retry(
        &self,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<QuizCategory>> {
        let mut attempt = 1;
        loop {
            self.limiter.acquire(cancel).await?;
            match self.source.list_categories().await {
                Ok(categories) => return Ok(categories),
                Err(e) if attempt < LISTING_ATTEMPTS => {
                    warn!(
                        "⚠️ 获取分类失败（第 {}/{} 次）: {}",
                        attempt, LISTING_ATTEMPTS, e
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(AppError::Cancelled),
                        _ = tokio::time::sleep(Duration::from_secs(2 * attempt as u64)) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn filter_categories(&self, categories: Vec<QuizCategory>) -> Vec<QuizCategory> {
        if self.options.category_filter.is_empty() {
            return categories;
        }
        let fragments: Vec<String> = self
            .options
            .category_filter
            .iter()
            .map(|f| f.trim().to_lowercase())
            .filter(|f| !f.is_empty())
            .collect();
        categories
            .into_iter()
            .filter(|c| {
                let url = c.url.to_lowercase();
                fragments.iter().any(|f| url.contains(f.as_str()))
            })
            .collect()
    }

    /// 派发并等待全部条目
    ///
    /// 外部取消：停止派发，等待在途条目结束后正常返回。
    /// 运行级错误：同样停止派发并等待在途条目，然后返回该错误。
    pub async fn run_items(
        &self,
        items: Vec<WorkItem>,
        cancel: &CancellationToken,
    ) -> AppResult<RunStats> {
        let run_token = cancel.child_token();
        let mut stats = RunStats {
            items_total: items.len(),
            ..Default::default()
        };
        let mut queue: VecDeque<ItemCtx> = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| ItemCtx::new(i + 1, item))
            .collect();
        let mut in_flight: JoinSet<ItemResult> = JoinSet::new();
        let mut fatal: Option<AppError> = None;

        let initial = self.backoff.current();
        log_dispatch_start(stats.items_total, &initial.to_string());

        loop {
            let bound = self.backoff.current().concurrency;
            let quota_reached = self
                .options
                .max_questions
                .is_some_and(|max| stats.questions_persisted >= max);
            let may_dispatch = !run_token.is_cancelled()
                && !quota_reached
                && !queue.is_empty()
                && in_flight.len() < bound;

            if may_dispatch {
                tokio::select! {
                    biased;
                    Some(joined) = in_flight.join_next() => {
                        self.handle_completion(joined, &mut stats, &mut fatal, &run_token);
                    }
                    acquired = self.limiter.acquire(&run_token) => match acquired {
                        Ok(()) => {
                            if let Some(ctx) = queue.pop_front() {
                                self.dispatch(&mut in_flight, ctx);
                            }
                        }
                        Err(e) if e.is_cancelled() => {}
                        Err(e) => return Err(e),
                    },
                }
            } else if let Some(joined) = in_flight.join_next().await {
                self.handle_completion(joined, &mut stats, &mut fatal, &run_token);
            } else {
                if quota_reached && !queue.is_empty() {
                    info!("🛑 已达到题目数量上限，剩余 {} 个测验未派发", queue.len());
                }
                break;
            }
        }

        stats.downgrades = self.backoff.downgrades();
        stats.final_profile = self.backoff.current().name;
        stats.cancelled = cancel.is_cancelled();

        if let Some(e) = fatal {
            error!(
                "❌ 运行终止: 成功 {} / 失败 {} / 未派发 {}",
                stats.items_succeeded,
                stats.items_failed,
                queue.len()
            );
            return Err(e);
        }
        if stats.cancelled {
            warn!("⚠️ 运行已取消，未派发 {} 个测验", queue.len());
        }
        Ok(stats)
    }

    fn dispatch(&self, in_flight: &mut JoinSet<ItemResult>, mut ctx: ItemCtx) {
        ctx.advance(ItemState::Dispatched);
        let flow = Arc::clone(&self.flow);
        let profile = self.backoff.current();
        debug!("{} 派发: {} ({})", ctx, ctx.item.title, ctx.url());

        in_flight.spawn(async move {
            let result = flow.run(&mut ctx, &profile).await;
            if result.is_err() {
                ctx.advance(ItemState::Failed);
            }
            (ctx, result)
        });
    }

    fn handle_completion(
        &self,
        joined: Result<ItemResult, JoinError>,
        stats: &mut RunStats,
        fatal: &mut Option<AppError>,
        run_token: &CancellationToken,
    ) {
        let (ctx, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                error!("条目任务执行失败: {}", e);
                stats.items_failed += 1;
                self.report_failure(fatal, run_token);
                return;
            }
        };

        match result {
            Ok(outcome) => {
                stats.absorb(&outcome);
                self.backoff.record_success();
            }
            Err(e) if e.is_fatal() => {
                error!("{} ❌ 运行级错误，停止派发: {}", ctx, e);
                stats.items_failed += 1;
                if fatal.is_none() {
                    *fatal = Some(e);
                }
                run_token.cancel();
            }
            Err(e) if e.is_cancelled() => {
                debug!("{} 已取消", ctx);
            }
            Err(e) => {
                warn!("{} ❌ 处理失败（下次运行会重试）: {}", ctx, e);
                stats.items_failed += 1;
                self.report_failure(fatal, run_token);
            }
        }
    }

    fn report_failure(&self, fatal: &mut Option<AppError>, run_token: &CancellationToken) {
        let Some(profile) = self.backoff.record_failure() else {
            return;
        };
        if let Err(e) = self.limiter.reconfigure(&profile) {
            error!("❌ 应用新档位失败: {}", e);
            if fatal.is_none() {
                *fatal = Some(e);
            }
            run_token.cancel();
            return;
        }
        info!("🐢 已切换到 {}", profile);
    }
}

fn log_dispatch_start(total: usize, profile: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始抓取 {} 个测验", total);
    info!("⚙️ 速度档位: {}", profile);
    info!("{}", "=".repeat(60));
}
