//! 基于 chromiumoxide 的测验来源 - 业务能力层
//!
//! 页面结构相关的部分全部集中在下面几段脚本里，换站点时只需替换脚本。

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Browser;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, BrowserError};
use crate::infrastructure::JsExecutor;
use crate::models::{QuestionRecord, QuizResult};
use crate::services::quiz_source::{FetchOptions, QuizCategory, QuizLink, QuizSource};

/// 分类页链接：`/quizzes/<分类>/`
const LIST_CATEGORIES_JS: &str = r#"
(() => {
    const seen = new Set();
    return Array.from(document.querySelectorAll('a[href*="/quizzes/"]'))
        .map(a => ({ name: (a.innerText || '').trim(), url: a.href.split('#')[0] }))
        .filter(c => c.name && !seen.has(c.url) && seen.add(c.url));
})()
"#;

/// 测验链接：`/quiz/<测验>`
const LIST_QUIZZES_JS: &str = r#"
(() => {
    const seen = new Set();
    return Array.from(document.querySelectorAll('a[href*="/quiz/"]'))
        .map(a => ({ title: (a.innerText || '').trim(), url: a.href.split('#')[0] }))
        .filter(q => !seen.has(q.url) && seen.add(q.url));
})()
"#;

/// 点击"开始测验"按钮（若存在）
const START_QUIZ_JS: &str = r#"
(() => {
    const btn = document.querySelector('input[type="submit"][value*="Start"], input[value*="Take Quiz"]')
        || Array.from(document.querySelectorAll('button')).find(b => /start/i.test(b.innerText));
    if (btn) { btn.click(); return true; }
    return false;
})()
"#;

const QUIZ_READY_JS: &str = r#"
!!document.querySelector('form[action*="score"], form[method="post"], form[method="POST"], .questionBlock')
"#;

/// 题目 + 选项 + 页面上的分类信息（面包屑 / 元信息）
const EXTRACT_QUESTIONS_JS: &str = r#"
(() => {
    const text = el => (el ? (el.innerText || el.textContent || '').trim() : '');
    const crumbs = Array.from(document.querySelectorAll('.breadcrumb a, nav[aria-label*="breadcrumb"] a'))
        .map(text).filter(t => t && !/^(home|quizzes)$/i.test(t));
    const meta = text(document.querySelector('.quiz-meta, .quiz-info, .quiz-details')) || document.body.innerText;
    const diff = (meta.match(/Difficulty:\s*([A-Za-z ]+?)(?:\n|\.|,|$)/i) || [])[1] || '';

    const groups = new Map();
    document.querySelectorAll('input[type="radio"]').forEach(r => {
        if (!groups.has(r.name)) groups.set(r.name, []);
        groups.get(r.name).push(r);
    });

    const questions = [];
    groups.forEach(radios => {
        const block = radios[0].closest('.questionBlock, fieldset, tr, li, div');
        const q = block && block.querySelector('.q, .question, b');
        const options = radios.map(r => {
            const label = r.closest('label') || r.parentNode;
            return (text(label) || r.value || '').replace(/^[a-d]\)\s*/i, '');
        }).filter(Boolean);
        const media = block && block.querySelector('audio source, audio, img');
        if (q && options.length >= 2) {
            questions.push({
                rawText: text(q),
                options,
                mediaRef: media ? (media.src || null) : null,
                rawDomain: crumbs[0] || '',
                rawTopic: crumbs[crumbs.length - 1] || '',
                rawDifficulty: diff.trim(),
            });
        }
    });
    return questions;
})()
"#;

const RESULTS_READY_JS: &str = r#"
!!document.querySelector('.questionReview, .questionTable, .result-item, .question-result')
"#;

/// 结果页：每道题的正确答案、提示和解析
const EXTRACT_RESULTS_JS: &str = r#"
(() => {
    const text = el => (el ? (el.innerText || el.textContent || '').trim() : '');
    const pick = (s, re) => { const m = s.match(re); return m ? m[1].trim() : null; };
    const blocks = Array.from(document.querySelectorAll('.questionReview, .questionTable, .result-item, .question-result'));
    return blocks.map(b => {
        const all = text(b);
        const correct = pick(all, /(?:Correct|Right)?\s*Answer:\s*(.+?)(?:\n|$)/i) || text(b.querySelector('.correct, .right-answer'));
        const hint = text(b.querySelector('.hint')) || pick(all, /Hint:\s*([\s\S]+?)(?:\n\n|$)/i);
        const desc = text(b.querySelector('.explanation, .trivia-fact, .additional-info'))
            || pick(all, /(?:Explanation|Interesting Information|Fun Fact):\s*([\s\S]+?)(?:\n\n|$)/i);
        return { correctAnswer: correct || null, hint: hint || null, description: desc || null };
    });
})()
"#;

fn submit_js(selections: &[usize]) -> String {
    let selections = serde_json::to_string(selections).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"
(() => {{
    const selections = {selections};
    const names = [];
    document.querySelectorAll('input[type="radio"]').forEach(r => {{
        if (!names.includes(r.name)) names.push(r.name);
    }});
    names.forEach((name, i) => {{
        const radios = document.querySelectorAll(`input[type="radio"][name="${{name}}"]`);
        const idx = Math.min(selections[i] || 0, radios.length - 1);
        if (radios[idx]) radios[idx].click();
    }});
    const btn = document.querySelector('input[type="submit"][value*="Score"], input[type="submit"][value*="Submit"], button[type="submit"], input[type="submit"]');
    if (!btn) return false;
    btn.click();
    return true;
}})()
"#
    )
}

/// 打开的测验页面
pub struct QuizPage {
    url: String,
    options: FetchOptions,
    executor: JsExecutor,
}

/// 默认的页面渲染 / 提取实现
pub struct ChromeQuizSource {
    browser: Browser,
    base_url: String,
    listing_options: FetchOptions,
}

impl ChromeQuizSource {
    pub fn new(browser: Browser, base_url: impl Into<String>, listing_options: FetchOptions) -> Self {
        Self {
            browser,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            listing_options,
        }
    }

    /// 新建页面并导航，失败时关闭页面
    async fn open(&self, url: &str, options: &FetchOptions) -> AppResult<JsExecutor> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| AppError::navigation_failed(url, e))?;

        let navigated = tokio::time::timeout(options.page_load_timeout, page.goto(url))
            .await
            .map(|r| r.map(|_| ()));
        match navigated {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                let _ = page.close().await;
                return Err(AppError::navigation_failed(url, e));
            }
            Err(_) => {
                let _ = page.close().await;
                return Err(AppError::timeout("页面加载", url, options.page_load_timeout));
            }
        }

        if options.wait_for_network_idle {
            let idle =
                tokio::time::timeout(options.network_idle_timeout, page.wait_for_navigation()).await;
            if idle.is_err() {
                debug!("等待网络空闲超时，继续处理: {}", url);
            }
        }

        Ok(JsExecutor::new(page))
    }

    async fn close(executor: JsExecutor) {
        if let Err(e) = executor.into_page().close().await {
            debug!("关闭页面失败: {}", e);
        }
    }

    async fn list_links<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        script: &str,
    ) -> AppResult<Vec<T>> {
        let executor = self.open(url, &self.listing_options).await?;
        let links = executor.eval_as::<Vec<T>>(script).await;
        Self::close(executor).await;
        links
    }
}

#[async_trait]
impl QuizSource for ChromeQuizSource {
    type Page = QuizPage;

    async fn list_categories(&self) -> AppResult<Vec<QuizCategory>> {
        let url = format!("{}/quizzes/", self.base_url);
        let categories: Vec<QuizCategory> = self.list_links(&url, LIST_CATEGORIES_JS).await?;
        info!("✓ 找到 {} 个分类", categories.len());
        Ok(categories)
    }

    async fn list_quizzes(&self, category_url: &str) -> AppResult<Vec<QuizLink>> {
        let quizzes: Vec<QuizLink> = self.list_links(category_url, LIST_QUIZZES_JS).await?;
        debug!("分类 {} 下找到 {} 个测验", category_url, quizzes.len());
        Ok(quizzes)
    }

    async fn fetch(&self, url: &str, options: &FetchOptions) -> AppResult<QuizPage> {
        let executor = self.open(url, options).await?;

        match executor.eval_as::<bool>(START_QUIZ_JS).await {
            Ok(true) => debug!("已点击开始测验按钮: {}", url),
            Ok(false) => {}
            Err(e) => warn!("点击开始测验按钮失败: {}", e),
        }

        if let Err(e) = executor
            .wait_until("测验页面", QUIZ_READY_JS, options.quiz_wait_timeout)
            .await
        {
            Self::close(executor).await;
            return Err(e);
        }

        Ok(QuizPage {
            url: url.to_string(),
            options: *options,
            executor,
        })
    }

    async fn extract_questions(&self, page: &QuizPage) -> AppResult<Vec<QuestionRecord>> {
        let records: Vec<QuestionRecord> = page.executor.eval_as(EXTRACT_QUESTIONS_JS).await?;
        if records.is_empty() {
            return Err(AppError::Browser(BrowserError::ExtractionFailed {
                url: page.url.clone(),
                reason: "页面上没有找到题目".to_string(),
            }));
        }
        Ok(records)
    }

    async fn submit_and_extract_results(
        &self,
        page: &QuizPage,
        selections: &[usize],
    ) -> AppResult<Vec<QuizResult>> {
        let submitted: bool = page.executor.eval_as(submit_js(selections)).await?;
        if !submitted {
            return Err(AppError::Browser(BrowserError::ExtractionFailed {
                url: page.url.clone(),
                reason: "没有找到提交按钮".to_string(),
            }));
        }

        // 提交后页面跳转，旧的执行上下文会失效
        tokio::time::sleep(Duration::from_millis(500)).await;
        page.executor
            .wait_until("结果页面", RESULTS_READY_JS, page.options.quiz_wait_timeout)
            .await?;

        page.executor.eval_as(EXTRACT_RESULTS_JS).await
    }

    async fn release(&self, page: QuizPage) {
        Self::close(page.executor).await;
    }
}
