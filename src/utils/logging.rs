/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::orchestrator::RunStats;

/// 初始化 tracing
///
/// `RUST_LOG` 优先；否则 `verbose` 为真时默认 debug，为假时默认 info。
/// 给出 `log_file` 时同一份日志（无颜色）追加到该文件。重复调用不会报错。
pub fn init(verbose: bool, log_file: Option<&Path>) -> AppResult<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("quiz_scrape={},warn", default_level)));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init();
    Ok(())
}

/// 初始化日志文件（写入表头）
pub fn init_log_file(log_file_path: &str) -> AppResult<()> {
    let log_header = format!(
        "{}\n测验抓取日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)
        .map_err(|e| AppError::file_write_failed(log_file_path, e))
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 并发测验抓取模式");
    info!("🌐 站点: {}", config.base_url);
    info!("⚙️ 初始速度档位: {}", config.speed_profile);
    info!(
        "🗂️ 映射模式: {}",
        if config.strict_mapping { "严格" } else { "宽松" }
    );
    if config.dry_run {
        info!("🧪 试运行：不写输出、不占用编号、不记录进度");
    }
    info!("{}", "=".repeat(60));
}

/// 打印最终统计信息，并把摘要追加到日志文件
pub fn print_final_stats(stats: &RunStats, log_file_path: &str) {
    let lines = final_stats_lines(stats);
    info!("\n{}", "=".repeat(60));
    for line in &lines {
        info!("{}", line);
    }
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);

    let summary = format!("\n{}\n{}\n", lines.join("\n"), "=".repeat(60));
    let appended = OpenOptions::new()
        .append(true)
        .open(log_file_path)
        .and_then(|mut f| f.write_all(summary.as_bytes()));
    if let Err(e) = appended {
        tracing::warn!("⚠️ 统计写入日志文件失败: {}", e);
    }
}

fn final_stats_lines(stats: &RunStats) -> Vec<String> {
    let mut lines = vec![
        "📊 全部处理完成统计".to_string(),
        format!(
            "完成时间: {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        ),
        format!("✅ 成功: {}/{}", stats.items_succeeded, stats.items_total),
        format!("❌ 失败: {}", stats.items_failed),
        format!("⏭️ 已完成跳过: {}", stats.items_skipped_done),
        format!(
            "📝 题目: 提取 {} / 写入 {} / 重复 {} / 可疑 {}",
            stats.questions_found,
            stats.questions_persisted,
            stats.questions_duplicate,
            stats.questions_suspicious
        ),
    ];
    for (question_type, count) in &stats.per_type {
        lines.push(format!("   {}: {}", question_type, count));
    }
    if stats.media_failures > 0 {
        lines.push(format!("⚠️ 媒体下载失败: {}", stats.media_failures));
    }
    lines.push(format!(
        "🐢 降速次数: {}，最终档位: {}",
        stats.downgrades, stats.final_profile
    ));
    if stats.cancelled {
        lines.push("🛑 运行被中断".to_string());
    }
    lines
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuestionType;

    #[test]
    fn test_truncate_text_counts_chars() {
        assert_eq!(truncate_text("短文本", 10), "短文本");
        assert_eq!(truncate_text("这是一个很长的题目文本", 4), "这是一个...");
    }

    #[test]
    fn test_final_stats_written_to_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.txt");
        let path_str = path.to_str().unwrap();
        init_log_file(path_str).unwrap();

        let mut stats = RunStats {
            items_total: 3,
            items_succeeded: 2,
            items_failed: 1,
            final_profile: "normal".to_string(),
            ..Default::default()
        };
        stats.per_type.insert(QuestionType::TrueFalse, 4);
        print_final_stats(&stats, path_str);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with(&"=".repeat(60)));
        assert!(content.contains("✅ 成功: 2/3"));
        assert!(content.contains("最终档位: normal"));
    }
}
