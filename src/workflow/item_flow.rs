//! 工作项处理流程 - 流程层
//!
//! 核心职责：定义"一个测验"的完整处理流程
//!
//! 流程顺序：
//! 1. 打开页面 → 提取题目（必要时提交测验读取结果页）
//! 2. 识别题型 → 映射分类
//! 3. 跳过已存在的题目 → 分配编号 → 下载媒体
//! 4. 写出结果 → 标记测验完成

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::{BucketKey, IndexAllocator, ProgressStore};
use crate::models::{QuestionRecord, QuestionRow, QuestionType, ResolvedQuestion, SpeedProfile};
use crate::services::{
    CategoryMapper, FetchOptions, MediaDownloader, QuestionClassifier, QuizSource, ResultSink,
};
use crate::utils::logging::truncate_text;
use crate::workflow::item_ctx::{ItemCtx, ItemState};

/// 流程开关
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowOptions {
    /// 试运行：不写输出、不占用编号、不标记进度
    pub dry_run: bool,
    /// 编号按 题型/领域/难度 分桶
    pub index_by_category: bool,
}

/// 单个工作项的处理结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemOutcome {
    pub questions_found: usize,
    pub persisted: BTreeMap<QuestionType, usize>,
    pub duplicates: usize,
    pub suspicious: usize,
    pub media_failures: usize,
}

impl ItemOutcome {
    pub fn persisted_total(&self) -> usize {
        self.persisted.values().sum()
    }
}

/// 工作项处理流程
///
/// - 不持有页面，页面由 `QuizSource` 打开和释放
/// - 只依赖业务能力（services）与基础设施（编号、进度）
pub struct ItemFlow<S: QuizSource> {
    source: Arc<S>,
    mapper: Arc<CategoryMapper>,
    classifier: Arc<QuestionClassifier>,
    allocator: Arc<IndexAllocator>,
    sink: Arc<dyn ResultSink>,
    progress: Arc<ProgressStore>,
    media: Option<Arc<MediaDownloader>>,
    options: FlowOptions,
}

impl<S: QuizSource> ItemFlow<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<S>,
        mapper: Arc<CategoryMapper>,
        classifier: Arc<QuestionClassifier>,
        allocator: Arc<IndexAllocator>,
        sink: Arc<dyn ResultSink>,
        progress: Arc<ProgressStore>,
        media: Option<Arc<MediaDownloader>>,
        options: FlowOptions,
    ) -> Self {
        Self {
            source,
            mapper,
            classifier,
            allocator,
            sink,
            progress,
            media,
            options,
        }
    }

    pub fn options(&self) -> FlowOptions {
        self.options
    }

    /// 执行完整流程
    ///
    /// 返回的错误中，`is_fatal()` 为真的终止整个运行，其余只算本条目失败。
    pub async fn run(&self, ctx: &mut ItemCtx, profile: &SpeedProfile) -> AppResult<ItemOutcome> {
        let mut outcome = ItemOutcome::default();

        // ========== 抓取与提取 ==========
        let records = self.fetch_records(ctx, profile).await?;
        outcome.questions_found = records.len();
        info!("{} ✓ 提取到 {} 道题目", ctx, records.len());

        // ========== 题型识别 ==========
        ctx.advance(ItemState::Classifying);
        let classified: Vec<(QuestionRecord, QuestionType, bool)> = records
            .into_iter()
            .map(|record| {
                let result = self
                    .classifier
                    .classify_detailed(&record.raw_text, &record.options);
                (record, result.question_type, result.suspicious)
            })
            .collect();
        outcome.suspicious = classified.iter().filter(|(_, _, s)| *s).count();

        // ========== 分类映射 ==========
        ctx.advance(ItemState::Mapping);
        let mut resolved = Vec::with_capacity(classified.len());
        for (record, question_type, suspicious) in classified {
            let domain = self.mapper.map_domain(&record.raw_domain)?;
            let topic = self.mapper.map_topic(&record.raw_topic)?;
            let difficulty = self.mapper.map_difficulty(&record.raw_difficulty)?;
            resolved.push(ResolvedQuestion {
                record,
                question_type,
                domain,
                topic,
                difficulty,
                suspicious,
            });
        }

        // ========== 去重与编号 ==========
        ctx.advance(ItemState::Indexing);
        let mut seen_in_item = HashSet::new();
        let mut keyed = Vec::with_capacity(resolved.len());
        for question in resolved {
            let content_id = question.content_id();
            if self.sink.contains(question.question_type, &content_id)
                || !seen_in_item.insert(content_id)
            {
                debug!(
                    "{} 跳过已存在的题目: {}",
                    ctx,
                    truncate_text(&question.record.raw_text, 40)
                );
                outcome.duplicates += 1;
                continue;
            }

            let bucket = if self.options.index_by_category {
                BucketKey::scoped(question.question_type, &question.domain, &question.difficulty)
            } else {
                BucketKey::for_type(question.question_type)
            };
            let n = if self.options.dry_run {
                self.allocator.peek(&bucket)
            } else {
                let allocator = Arc::clone(&self.allocator);
                let key = bucket.clone();
                run_blocking(move || allocator.next(&key)).await?
            };
            keyed.push((question, bucket.format_id(n)));
        }

        // ========== 媒体下载 ==========
        let media_paths = self.download_media(ctx, &keyed, profile).await;
        outcome.media_failures = media_paths.iter().filter(|p| matches!(p, Some(None))).count();

        let mut grouped: BTreeMap<QuestionType, Vec<QuestionRow>> = BTreeMap::new();
        for ((question, key), media_path) in keyed.iter().zip(media_paths) {
            let row = QuestionRow::from_resolved(question, key.clone(), media_path.flatten());
            grouped.entry(question.question_type).or_default().push(row);
        }

        // ========== 写出结果 ==========
        if self.options.dry_run {
            for (question_type, rows) in &grouped {
                for row in rows {
                    info!(
                        "{} [试运行] {} {} | {} / {} / {} | {}",
                        ctx,
                        question_type,
                        row.key,
                        row.domain,
                        row.topic,
                        row.difficulty,
                        truncate_text(&row.question, 50)
                    );
                }
                outcome.persisted.insert(*question_type, rows.len());
            }
            ctx.advance(ItemState::Persisted);
            return Ok(outcome);
        }

        for (question_type, rows) in grouped {
            let total = rows.len();
            let sink = Arc::clone(&self.sink);
            let appended = run_blocking(move || sink.append(&rows, question_type)).await?;
            outcome.duplicates += total - appended;
            outcome.persisted.insert(question_type, appended);
        }
        let progress = Arc::clone(&self.progress);
        let url = ctx.url().to_string();
        run_blocking(move || progress.mark_done(&url)).await?;
        ctx.advance(ItemState::Persisted);

        info!(
            "{} ✅ 写入 {} 道题目（重复 {} 道）",
            ctx,
            outcome.persisted_total(),
            outcome.duplicates
        );
        Ok(outcome)
    }

    /// 打开页面并提取题目，无论成败都释放页面
    async fn fetch_records(
        &self,
        ctx: &mut ItemCtx,
        profile: &SpeedProfile,
    ) -> AppResult<Vec<QuestionRecord>> {
        let url = ctx.url().to_string();
        let options = FetchOptions::from(profile);
        let quiz_page_timeout = profile.timeouts.quiz_page();
        let quiz_wait_timeout = profile.timeouts.quiz_wait();

        ctx.advance(ItemState::Fetching);
        debug!("{} 🌐 打开测验: {}", ctx, url);
        let page = tokio::time::timeout(quiz_page_timeout, self.source.fetch(&url, &options))
            .await
            .map_err(|_| AppError::timeout("测验页面", url.as_str(), quiz_page_timeout))??;

        ctx.advance(ItemState::Extracting);
        let extracted = async {
            let mut records =
                tokio::time::timeout(quiz_wait_timeout, self.source.extract_questions(&page))
                    .await
                    .map_err(|_| AppError::timeout("题目提取", url.as_str(), quiz_wait_timeout))??;

            if records.iter().any(QuestionRecord::needs_results) {
                let selections = vec![0; records.len()];
                let submitted = tokio::time::timeout(
                    quiz_wait_timeout,
                    self.source.submit_and_extract_results(&page, &selections),
                )
                .await;
                match submitted {
                    Ok(Ok(results)) => {
                        if results.len() != records.len() {
                            debug!(
                                "结果页题目数 {} 与测验页 {} 不一致，按顺序合并",
                                results.len(),
                                records.len()
                            );
                        }
                        for (record, result) in records.iter_mut().zip(&results) {
                            record.merge_result(result);
                        }
                    }
                    Ok(Err(e)) => warn!("⚠️ 读取结果页失败，继续使用已有信息: {}", e),
                    Err(_) => warn!("⚠️ 读取结果页超时，继续使用已有信息: {}", url),
                }
            }
            Ok::<_, AppError>(records)
        }
        .await;

        self.source.release(page).await;
        extracted
    }

    /// 按档位决定并行或顺序下载
    ///
    /// 每个元素：None 表示该题不需要媒体，Some(None) 表示下载失败，Some(Some(name)) 为文件名。
    async fn download_media(
        &self,
        ctx: &ItemCtx,
        keyed: &[(ResolvedQuestion, String)],
        profile: &SpeedProfile,
    ) -> Vec<Option<Option<String>>> {
        let jobs = keyed.iter().map(|(question, key)| async move {
            let kind = question.question_type.media_kind()?;
            let url = question.record.media_ref.as_deref()?;
            if self.options.dry_run {
                return Some(None);
            }
            let Some(media) = &self.media else {
                return Some(None);
            };
            match media.download(url, key, kind).await {
                Ok(name) => Some(Some(name)),
                Err(e) => {
                    warn!("{} ⚠️ 媒体下载失败 {}: {}", ctx, key, e);
                    Some(None)
                }
            }
        });

        if profile.parallel_media_downloads {
            join_all(jobs).await
        } else {
            let mut results = Vec::with_capacity(keyed.len());
            for job in jobs {
                results.push(job.await);
            }
            results
        }
    }
}

/// 落盘操作（fsync + rename、CSV 追加）放到阻塞线程池执行
async fn run_blocking<T, F>(f: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Other(format!("后台写入任务异常: {}", e)))?
}
