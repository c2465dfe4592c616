//! 抓取进度 - 基础设施层
//!
//! 记录已经完整处理的测验 URL，重启后跳过。

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AppError, AppResult, FileError};
use crate::utils::fs::write_atomic;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProgressDocument {
    #[serde(default)]
    completed: BTreeSet<String>,
}

/// 已完成工作项集合
pub struct ProgressStore {
    path: PathBuf,
    state: Mutex<ProgressDocument>,
}

impl ProgressStore {
    /// 加载进度文件；文件存在但无法解析时返回错误
    pub fn load(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        let document = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;
            serde_json::from_str(&content).map_err(|e| FileError::JsonParseFailed {
                path: path.display().to_string(),
                source: Box::new(e),
            })?
        } else {
            ProgressDocument::default()
        };
        info!(
            "已加载抓取进度: {} 个测验已完成 ({})",
            document.completed.len(),
            path.display()
        );

        Ok(Self {
            path,
            state: Mutex::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_done(&self, url: &str) -> bool {
        self.lock().completed.contains(url)
    }

    /// 标记完成并立即落盘
    pub fn mark_done(&self, url: &str) -> AppResult<()> {
        let mut state = self.lock();
        if state.completed.insert(url.to_string()) {
            self.flush(&state)?;
            debug!("测验已标记完成: {}", url);
        }
        Ok(())
    }

    pub fn completed_count(&self) -> usize {
        self.lock().completed.len()
    }

    /// 清空进度（操作员显式调用）
    pub fn clear(&self) -> AppResult<()> {
        let mut state = self.lock();
        state.completed.clear();
        self.flush(&state)?;
        info!("抓取进度已清空: {}", self.path.display());
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProgressDocument> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush(&self, document: &ProgressDocument) -> AppResult<()> {
        let bytes = serde_json::to_vec_pretty(document)?;
        write_atomic(&self.path, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_done_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scrape_progress.json");

        let store = ProgressStore::load(&path).unwrap();
        assert!(!store.is_done("https://quiz/1"));
        store.mark_done("https://quiz/1").unwrap();
        store.mark_done("https://quiz/1").unwrap();

        let store = ProgressStore::load(&path).unwrap();
        assert!(store.is_done("https://quiz/1"));
        assert_eq!(store.completed_count(), 1);

        store.clear().unwrap();
        assert!(!ProgressStore::load(&path).unwrap().is_done("https://quiz/1"));
    }

    #[test]
    fn test_corrupt_progress_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scrape_progress.json");
        std::fs::write(&path, "[1,2").unwrap();
        assert!(ProgressStore::load(&path).is_err());
    }
}
