//! JS 执行器 - 基础设施层
//!
//! 每个测验页面独占一个执行器，对上只暴露"在页面里执行脚本"的能力。

use std::time::Duration;

use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::error::{AppError, AppResult, BrowserError};

/// JS 执行器
///
/// - 持有一个 Page
/// - 不认识题目结构，只负责执行脚本和反序列化结果
pub struct JsExecutor {
    page: Page,
}

impl JsExecutor {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// 交出 Page（用于关闭）
    pub fn into_page(self) -> Page {
        self.page
    }

    /// 执行 JS 代码并返回 JSON 结果
    pub async fn eval(&self, js_code: impl Into<String>) -> AppResult<JsonValue> {
        let result = self.page.evaluate(js_code.into()).await?;
        result.into_value().map_err(|e| {
            AppError::Browser(BrowserError::ScriptExecutionFailed {
                source: Box::new(e),
            })
        })
    }

    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> AppResult<T> {
        let json_value = self.eval(js_code).await?;
        serde_json::from_value(json_value).map_err(|e| {
            AppError::Browser(BrowserError::ScriptExecutionFailed {
                source: Box::new(e),
            })
        })
    }

    /// 轮询脚本直到返回 true 或超时
    pub async fn wait_until(
        &self,
        stage: &'static str,
        condition_js: &str,
        timeout: Duration,
    ) -> AppResult<()> {
        let url = self.page.url().await.ok().flatten().unwrap_or_default();
        let poll = async {
            loop {
                if let Ok(true) = self.eval_as::<bool>(condition_js).await {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| AppError::timeout(stage, url, timeout))
    }
}
