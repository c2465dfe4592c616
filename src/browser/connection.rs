use chromiumoxide::Browser;
use futures::StreamExt;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::error::{AppError, AppResult};

/// 连接到已开启远程调试端口的浏览器
pub async fn connect_to_browser(port: u16) -> AppResult<Browser> {
    let browser_url = format!("http://localhost:{}", port);
    info!("正在连接到浏览器: {}", browser_url);

    let (browser, mut handler) = Browser::connect(&browser_url).await.map_err(|e| {
        error!("连接浏览器失败: {}", e);
        AppError::browser_connection_failed(port, e)
    })?;
    debug!("浏览器连接成功");

    // 在后台处理浏览器事件
    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    // 等待浏览器状态同步
    sleep(tokio::time::Duration::from_millis(300)).await;

    let pages = browser.pages().await?;
    debug!("浏览器中已有 {} 个页面", pages.len());

    Ok(browser)
}
