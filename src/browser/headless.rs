use std::path::Path;

use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::error::{AppError, AppResult, BrowserError};

/// 启动无头浏览器
///
/// `executable` 为空时由 chromiumoxide 自动查找本机的 Chrome / Chromium。
pub async fn launch_headless_browser(executable: Option<&Path>) -> AppResult<Browser> {
    info!("🚀 启动无头浏览器...");

    let mut builder = BrowserConfig::builder().new_headless_mode().args(vec![
        "--disable-gpu",
        "--no-sandbox",
        "--disable-dev-shm-usage",
        "--mute-audio",
    ]);
    if let Some(path) = executable {
        debug!("使用浏览器可执行文件: {}", path.display());
        builder = builder.chrome_executable(path);
    }

    let config = builder.build().map_err(|e| {
        error!("配置无头浏览器失败: {}", e);
        AppError::Browser(BrowserError::LaunchFailed { source: e.into() })
    })?;

    let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
        error!("启动无头浏览器失败: {}", e);
        AppError::Browser(BrowserError::LaunchFailed {
            source: Box::new(e),
        })
    })?;
    debug!("无头浏览器启动成功");

    // 在后台处理浏览器事件
    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    sleep(tokio::time::Duration::from_millis(300)).await;
    info!("✅ 无头浏览器已就绪");

    Ok(browser)
}
