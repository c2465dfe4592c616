//! 结果输出 - 业务能力层
//!
//! `ResultSink` 是编排层唯一的写出口；默认实现 `CsvSink` 每种题型一个 CSV 文件。

use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::models::question::content_id;
use crate::models::{QuestionRow, QuestionType};
use crate::utils::csv::{parse_rows, write_row};
use crate::utils::fs::write_atomic;

/// 结果写出接口
pub trait ResultSink: Send + Sync {
    /// 追加行，跳过内容已存在（或在本批中重复）的行，返回实际写入的行数
    fn append(&self, rows: &[QuestionRow], question_type: QuestionType) -> AppResult<usize>;

    /// 备份现有输出，返回备份文件路径
    fn backup(&self) -> AppResult<Vec<PathBuf>>;

    /// 用给定行整体替换该题型的输出
    fn overwrite(&self, rows: &[QuestionRow], question_type: QuestionType) -> AppResult<()>;

    fn contains(&self, question_type: QuestionType, content_id: &str) -> bool;
}

/// CSV 输出
pub struct CsvSink {
    output_dir: PathBuf,
    seen: Mutex<HashMap<QuestionType, HashSet<String>>>,
}

impl CsvSink {
    /// 打开输出目录，并从已有文件中加载去重标识
    pub fn open(output_dir: impl Into<PathBuf>) -> AppResult<Self> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)
            .map_err(|e| AppError::file_write_failed(output_dir.display().to_string(), e))?;

        let mut seen = HashMap::new();
        for question_type in QuestionType::ALL {
            let path = output_dir.join(question_type.csv_file_name());
            let ids = load_content_ids(&path, question_type)?;
            if !ids.is_empty() {
                info!("已有 {} 题 {} 道: {}", question_type, ids.len(), path.display());
            }
            seen.insert(question_type, ids);
        }

        Ok(Self {
            output_dir,
            seen: Mutex::new(seen),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn file_path(&self, question_type: QuestionType) -> PathBuf {
        self.output_dir.join(question_type.csv_file_name())
    }

    /// 读取某题型已写出的全部数据行（不含表头）
    pub fn read_rows(&self, question_type: QuestionType) -> AppResult<Vec<Vec<String>>> {
        let path = self.file_path(question_type);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&path)
            .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;
        Ok(parse_rows(&text).into_iter().skip(1).collect())
    }
}

impl ResultSink for CsvSink {
    fn append(&self, rows: &[QuestionRow], question_type: QuestionType) -> AppResult<usize> {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let ids = seen.entry(question_type).or_default();

        let mut batch_ids = HashSet::new();
        let fresh: Vec<(&QuestionRow, String)> = rows
            .iter()
            .filter(|row| row.question_type == question_type)
            .map(|row| (row, row.content_id()))
            .filter(|(_, id)| !ids.contains(id) && batch_ids.insert(id.clone()))
            .collect();

        let skipped = rows.len() - fresh.len();
        if skipped > 0 {
            debug!("跳过 {} 道重复的 {} 题", skipped, question_type);
        }
        if fresh.is_empty() {
            return Ok(0);
        }

        let path = self.file_path(question_type);
        let write = || -> std::io::Result<()> {
            let needs_header = fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            let mut buf = Vec::new();
            if needs_header {
                write_row(&mut buf, question_type.columns())?;
            }
            for (row, _) in &fresh {
                write_row(&mut buf, &row.fields())?;
            }
            file.write_all(&buf)?;
            file.sync_data()
        };
        write().map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;

        let appended = fresh.len();
        ids.extend(fresh.into_iter().map(|(_, id)| id));
        Ok(appended)
    }

    fn backup(&self) -> AppResult<Vec<PathBuf>> {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let mut backups = Vec::new();

        for question_type in QuestionType::ALL {
            let path = self.file_path(question_type);
            if !path.exists() {
                continue;
            }
            let backup = self
                .output_dir
                .join(format!("{}_backup_{}.csv", question_type.as_str(), timestamp));
            fs::copy(&path, &backup)
                .map_err(|e| AppError::file_write_failed(backup.display().to_string(), e))?;
            info!("📦 已备份 {} -> {}", path.display(), backup.display());
            backups.push(backup);
        }

        Ok(backups)
    }

    fn overwrite(&self, rows: &[QuestionRow], question_type: QuestionType) -> AppResult<()> {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);

        let mut ids = HashSet::new();
        let mut buf = Vec::new();
        let path = self.file_path(question_type);
        let to_io = |e| AppError::file_write_failed(path.display().to_string(), e);

        write_row(&mut buf, question_type.columns()).map_err(to_io)?;
        for row in rows.iter().filter(|r| r.question_type == question_type) {
            if ids.insert(row.content_id()) {
                write_row(&mut buf, &row.fields()).map_err(to_io)?;
            }
        }
        write_atomic(&path, &buf)?;

        info!("已覆盖写入 {} 道 {} 题: {}", ids.len(), question_type, path.display());
        seen.insert(question_type, ids);
        Ok(())
    }

    fn contains(&self, question_type: QuestionType, content_id: &str) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&question_type)
            .is_some_and(|ids| ids.contains(content_id))
    }
}

/// 从已有 CSV 的 Question 与 Option 列计算去重标识
fn load_content_ids(path: &Path, question_type: QuestionType) -> AppResult<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let text = fs::read_to_string(path)
        .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;
    let mut rows = parse_rows(&text).into_iter();
    let Some(header) = rows.next() else {
        return Ok(HashSet::new());
    };

    let column = |name: &str| header.iter().position(|h| h.trim() == name);
    let Some(question_col) = column("Question") else {
        warn!("{} 缺少 Question 列，无法去重", path.display());
        return Ok(HashSet::new());
    };
    let option_cols: Vec<usize> = (1..=question_type.max_options())
        .filter_map(|i| column(&format!("Option{}", i)))
        .collect();

    Ok(rows
        .map(|row| {
            let cell = |i: usize| row.get(i).cloned().unwrap_or_default();
            let options: Vec<String> = option_cols.iter().map(|&i| cell(i)).collect();
            content_id(&cell(question_col), &options)
        })
        .collect())
}
