//! 测验来源接口 - 业务能力层
//!
//! 编排层只通过这个接口与页面渲染 / 提取打交道，默认实现见 `ChromeQuizSource`。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::models::{QuestionRecord, QuizResult, SpeedProfile};

/// 站点上的一个分类
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizCategory {
    pub name: String,
    pub url: String,
}

/// 分类下的一个测验
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizLink {
    pub title: String,
    pub url: String,
}

/// 单次抓取的等待参数，取自当前速度档位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub page_load_timeout: Duration,
    pub network_idle_timeout: Duration,
    pub quiz_wait_timeout: Duration,
    pub wait_for_network_idle: bool,
}

impl From<&SpeedProfile> for FetchOptions {
    fn from(profile: &SpeedProfile) -> Self {
        Self {
            page_load_timeout: profile.timeouts.page_load(),
            network_idle_timeout: profile.timeouts.network_idle(),
            quiz_wait_timeout: profile.timeouts.quiz_wait(),
            wait_for_network_idle: profile.wait_for_network_idle,
        }
    }
}

/// 页面渲染与题目提取
#[async_trait]
pub trait QuizSource: Send + Sync + 'static {
    /// 打开的测验页面句柄
    type Page: Send + Sync;

    async fn list_categories(&self) -> AppResult<Vec<QuizCategory>>;

    async fn list_quizzes(&self, category_url: &str) -> AppResult<Vec<QuizLink>>;

    /// 打开测验页面；超时或网络失败返回导航错误
    async fn fetch(&self, url: &str, options: &FetchOptions) -> AppResult<Self::Page>;

    async fn extract_questions(&self, page: &Self::Page) -> AppResult<Vec<QuestionRecord>>;

    /// 按 `selections`（每题所选选项的下标）提交测验，读取结果页上每道题的答案与解析
    async fn submit_and_extract_results(
        &self,
        page: &Self::Page,
        selections: &[usize],
    ) -> AppResult<Vec<QuizResult>>;

    /// 释放页面
    async fn release(&self, page: Self::Page);
}
