//! 持久化题目编号分配器 - 基础设施层
//!
//! 索引文件是一个扁平的 JSON 对象：`{"multiple_choice": 12, "true_false": 3, ...}`，
//! 值为该桶最后一次发出的编号。每次发号都先落盘再返回。

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::error::{AppResult, IndexError};
use crate::models::QuestionType;
use crate::utils::fs::write_atomic;

/// 编号桶
///
/// 默认按题型分桶；开启分类编号时再按标准化的领域和难度细分。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub question_type: QuestionType,
    pub scope: Option<(String, String)>,
}

impl BucketKey {
    pub fn for_type(question_type: QuestionType) -> Self {
        Self {
            question_type,
            scope: None,
        }
    }

    pub fn scoped(question_type: QuestionType, domain: &str, difficulty: &str) -> Self {
        Self {
            question_type,
            scope: Some((domain.to_string(), difficulty.to_string())),
        }
    }

    /// 索引文件中的键
    ///
    /// 分类桶的键与编号里打印的前缀一一对应，打印相同的两个值共用一个桶。
    pub fn storage_key(&self) -> String {
        match self.scope_segment() {
            None => self.question_type.as_str().to_string(),
            Some(scope) => format!("{}/{}", self.question_type.as_str(), scope),
        }
    }

    /// 题目编号，如 `Question_MQ_Parsed_0001`、`Question_MQ_Parsed_Culture_Easy_0001`
    pub fn format_id(&self, n: u64) -> String {
        let prefix = self.question_type.key_prefix();
        match self.scope_segment() {
            None => format!("Question_{}_Parsed_{:04}", prefix, n),
            Some(scope) => format!("Question_{}_Parsed_{}_{:04}", prefix, scope, n),
        }
    }

    fn scope_segment(&self) -> Option<String> {
        self.scope.as_ref().map(|(domain, difficulty)| {
            format!("{}_{}", key_segment(domain), key_segment(difficulty))
        })
    }
}

fn key_segment(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

struct Bucket {
    guard: Mutex<()>,
    value: AtomicU64,
}

impl Bucket {
    fn new(value: u64) -> Arc<Self> {
        Arc::new(Self {
            guard: Mutex::new(()),
            value: AtomicU64::new(value),
        })
    }
}

/// 编号分配器
///
/// 不同桶可以并发发号；同一个桶的 读取-递增-落盘 互斥。
/// `reset` 持有写闸，期间没有任何发号。
pub struct IndexAllocator {
    path: PathBuf,
    gate: RwLock<()>,
    buckets: RwLock<HashMap<String, Arc<Bucket>>>,
    flush: Mutex<()>,
}

impl IndexAllocator {
    /// 加载索引文件
    ///
    /// 文件不存在时从默认桶（全部为 0）开始；文件存在但无法解析时返回错误，绝不静默归零。
    pub fn load(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        let mut values: BTreeMap<String, u64> = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| IndexError::Corrupt {
                path: path.display().to_string(),
                source: Box::new(e),
            })?;
            serde_json::from_str(&content).map_err(|e| IndexError::Corrupt {
                path: path.display().to_string(),
                source: Box::new(e),
            })?
        } else {
            info!("索引文件不存在，从 0 开始编号: {}", path.display());
            BTreeMap::new()
        };

        for question_type in QuestionType::ALL {
            values.entry(question_type.as_str().to_string()).or_insert(0);
        }
        debug!("已加载题目索引: {:?}", values);

        let buckets = values
            .into_iter()
            .map(|(key, value)| (key, Bucket::new(value)))
            .collect();

        Ok(Self {
            path,
            gate: RwLock::new(()),
            buckets: RwLock::new(buckets),
            flush: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn bucket(&self, key: &str) -> Arc<Bucket> {
        if let Some(bucket) = self
            .buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return bucket.clone();
        }
        self.buckets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_insert_with(|| Bucket::new(0))
            .clone()
    }

    /// 发出桶内下一个编号，落盘成功后才返回
    ///
    /// 落盘失败时内存中的计数不回退：宁可跳号也不重复发号。
    pub fn next(&self, key: &BucketKey) -> AppResult<u64> {
        let _gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        let bucket = self.bucket(&key.storage_key());
        let _guard = bucket.guard.lock().unwrap_or_else(PoisonError::into_inner);

        let next = bucket.value.load(Ordering::SeqCst) + 1;
        bucket.value.store(next, Ordering::SeqCst);
        self.persist()?;

        Ok(next)
    }

    /// `next` 将会发出的编号（不落盘，用于试运行预览）
    pub fn peek(&self, key: &BucketKey) -> u64 {
        let storage_key = key.storage_key();
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&storage_key)
            .map(|b| b.value.load(Ordering::SeqCst))
            .unwrap_or(0)
            + 1
    }

    /// 当前所有桶的快照
    pub fn get_all_indices(&self) -> BTreeMap<String, u64> {
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, b)| (k.clone(), b.value.load(Ordering::SeqCst)))
            .collect()
    }

    /// 所有桶归零并落盘（仅限操作员显式调用）
    pub fn reset(&self) -> AppResult<()> {
        let _gate = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        let before = self.get_all_indices();
        for bucket in self
            .buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
        {
            bucket.value.store(0, Ordering::SeqCst);
        }
        self.persist()?;
        warn!("⚠️ 题目索引已全部归零（归零前: {:?}）", before);
        Ok(())
    }

    fn persist(&self) -> AppResult<()> {
        let _flush = self.flush.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.get_all_indices();
        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(|e| IndexError::PersistFailed {
            path: self.path.display().to_string(),
            source: Box::new(e),
        })?;
        write_atomic(&self.path, &bytes).map_err(|e| {
            IndexError::PersistFailed {
                path: self.path.display().to_string(),
                source: Box::new(e),
            }
            .into()
        })
    }
}
