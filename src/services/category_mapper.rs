//! 分类映射服务 - 业务能力层
//!
//! 把站点给出的原始难度 / 领域 / 主题字符串映射成标准标签。

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, MappingError};
use crate::models::loaders::load_mapping_document;
use crate::models::mapping::{MappingAxis, MappingDocument, MappingFinding, MappingTable};

/// 未映射值的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MappingMode {
    /// 记录警告并原样返回
    #[default]
    Lenient,
    /// 直接报错，终止运行
    Strict,
}

pub type UnmappedValues = BTreeMap<MappingAxis, BTreeSet<String>>;

/// 每个轴的映射规模：(标签数, 同义词数)
pub type MappingStats = BTreeMap<MappingAxis, (usize, usize)>;

struct MapperState {
    document: MappingDocument,
    table: MappingTable,
    unmapped: Mutex<UnmappedValues>,
}

impl MapperState {
    fn new(document: MappingDocument) -> Arc<Self> {
        let table = document.to_table();
        Arc::new(Self {
            document,
            table,
            unmapped: Mutex::new(BTreeMap::new()),
        })
    }
}

fn log_findings(document: &MappingDocument) {
    for finding in document.validate() {
        warn!("⚠️ 映射配置问题: {}", finding);
    }
}

/// 分类映射器
///
/// 映射表和未映射集合放在同一个 `Arc` 里，重新加载时整体替换，
/// 并发读者要么看到旧状态，要么看到新状态。
pub struct CategoryMapper {
    path: Option<PathBuf>,
    mode: MappingMode,
    state: RwLock<Arc<MapperState>>,
}

impl CategoryMapper {
    /// 从映射文件加载
    pub async fn load(path: impl Into<PathBuf>, mode: MappingMode) -> AppResult<Self> {
        let path = path.into();
        let document = load_mapping_document(&path).await?;
        log_findings(&document);
        Ok(Self {
            path: Some(path),
            mode,
            state: RwLock::new(MapperState::new(document)),
        })
    }

    /// 直接使用内存中的映射文档（无法 reload）
    pub fn from_document(document: MappingDocument, mode: MappingMode) -> Self {
        Self {
            path: None,
            mode,
            state: RwLock::new(MapperState::new(document)),
        }
    }

    pub fn mode(&self) -> MappingMode {
        self.mode
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn current(&self) -> Arc<MapperState> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn map_difficulty(&self, raw: &str) -> AppResult<String> {
        self.map(MappingAxis::Difficulty, raw)
    }

    pub fn map_domain(&self, raw: &str) -> AppResult<String> {
        self.map(MappingAxis::Domain, raw)
    }

    pub fn map_topic(&self, raw: &str) -> AppResult<String> {
        self.map(MappingAxis::Topic, raw)
    }

    /// 按轴映射一个原始值
    pub fn map(&self, axis: MappingAxis, raw: &str) -> AppResult<String> {
        let state = self.current();
        if let Some(label) = state.table.axis(axis).lookup(raw) {
            debug!("映射 {} '{}' -> '{}'", axis, raw, label);
            return Ok(label.to_string());
        }

        match self.mode {
            MappingMode::Strict => Err(AppError::Mapping(MappingError::UnmappedCategory {
                axis: axis.to_string(),
                value: raw.to_string(),
                hint: self.remediation_hint(axis, raw),
            })),
            MappingMode::Lenient => {
                let newly_seen = state
                    .unmapped
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entry(axis)
                    .or_default()
                    .insert(raw.trim().to_string());
                if newly_seen {
                    warn!(
                        "未知的 {} 值 '{}'，按原值使用。{}",
                        axis,
                        raw,
                        self.remediation_hint(axis, raw)
                    );
                }
                Ok(raw.trim().to_string())
            }
        }
    }

    fn remediation_hint(&self, axis: MappingAxis, raw: &str) -> String {
        let file = self
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "映射配置".to_string());
        format!(
            "请在 {} 的 [{}] 段中为 '{}' 添加同义词（也可以先用宽松模式运行，再查看未映射值报告）",
            file,
            axis.section_name(),
            raw.trim()
        )
    }

    /// 当前映射状态下见过但未映射的值
    pub fn get_unmapped_values(&self) -> UnmappedValues {
        let state = self.current();
        let mut values = state
            .unmapped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for axis in MappingAxis::ALL {
            values.entry(axis).or_default();
        }
        values
    }

    /// 重新读取映射文件，映射表和未映射集合一起替换
    pub async fn reload_mappings(&self) -> AppResult<()> {
        let Some(path) = &self.path else {
            return Err(AppError::Other("映射器没有关联的配置文件，无法重新加载".to_string()));
        };
        info!("重新加载映射文件: {}", path.display());
        let document = load_mapping_document(path).await?;
        log_findings(&document);
        let next = MapperState::new(document);
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = next;
        Ok(())
    }

    /// 检查当前映射文档，返回全部发现
    pub fn validate_mappings(&self) -> Vec<MappingFinding> {
        self.current().document.validate()
    }

    pub fn mapping_stats(&self) -> MappingStats {
        let state = self.current();
        MappingAxis::ALL
            .into_iter()
            .map(|axis| {
                let mapping = state.table.axis(axis);
                (axis, (mapping.len(), mapping.synonym_count()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::loaders::parse_mapping_document;
    use tokio_test::{assert_err, assert_ok};

    const MAPPINGS: &str = r#"
[difficulty_mapping]
Easy = ["easy", "average"]
Hard = ["difficult", "tough"]

[domain_mapping]
Culture = ["entertainment", "music"]
Science = ["science", "animals"]

[topic_mapping]
General = ["general", "trivia"]
"#;

    fn mapper(mode: MappingMode) -> CategoryMapper {
        let doc = parse_mapping_document(Path::new("mappings.toml"), MAPPINGS).unwrap();
        CategoryMapper::from_document(doc, mode)
    }

    #[test]
    fn test_case_and_whitespace_insensitive() {
        let mapper = mapper(MappingMode::Strict);
        for raw in ["easy", "EASY", "  Easy  ", "eAsY"] {
            assert_eq!(mapper.map_difficulty(raw).unwrap(), "Easy");
        }
        assert_eq!(mapper.map_domain("Animals").unwrap(), "Science");
        assert_eq!(mapper.map_topic("trivia").unwrap(), "General");
    }

    #[test]
    fn test_lenient_returns_raw_and_records_once() {
        let mapper = mapper(MappingMode::Lenient);
        assert_eq!(mapper.map_domain("Gastronomy").unwrap(), "Gastronomy");
        assert_eq!(mapper.map_domain("Gastronomy").unwrap(), "Gastronomy");

        let unmapped = mapper.get_unmapped_values();
        assert_eq!(unmapped[&MappingAxis::Domain].len(), 1);
        assert!(unmapped[&MappingAxis::Domain].contains("Gastronomy"));
        assert!(unmapped[&MappingAxis::Topic].is_empty());
    }

    #[test]
    fn test_lenient_fallback_is_trimmed_like_the_report() {
        let mapper = mapper(MappingMode::Lenient);
        assert_eq!(assert_ok!(mapper.map_domain(" Gastronomy ")), "Gastronomy");
        assert_eq!(assert_ok!(mapper.map_domain("Gastronomy\t")), "Gastronomy");

        let unmapped = mapper.get_unmapped_values();
        assert_eq!(
            unmapped[&MappingAxis::Domain].iter().collect::<Vec<_>>(),
            vec!["Gastronomy"]
        );
    }

    #[test]
    fn test_strict_fails_with_section_hint() {
        let mapper = mapper(MappingMode::Strict);
        let err = assert_err!(mapper.map_domain("Gastronomy"));
        assert!(err.is_fatal());
        let msg = err.to_string();
        assert!(msg.contains("Gastronomy"));
        assert!(msg.contains("domain_mapping"));
        assert!(mapper.get_unmapped_values()[&MappingAxis::Domain].is_empty());
    }

    #[tokio::test]
    async fn test_reload_swaps_table_and_clears_unmapped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mappings.toml");
        tokio::fs::write(&path, MAPPINGS).await.unwrap();

        let mapper = CategoryMapper::load(&path, MappingMode::Lenient).await.unwrap();
        assert_eq!(mapper.map_domain("cooking").unwrap(), "cooking");
        assert_eq!(mapper.get_unmapped_values()[&MappingAxis::Domain].len(), 1);

        let updated = MAPPINGS.replace("\"animals\"]", "\"animals\"]\nFood = [\"cooking\"]");
        tokio::fs::write(&path, updated).await.unwrap();
        mapper.reload_mappings().await.unwrap();

        assert_eq!(mapper.map_domain("cooking").unwrap(), "Food");
        assert!(mapper.get_unmapped_values()[&MappingAxis::Domain].is_empty());
    }

    #[test]
    fn test_stats_and_validation() {
        let mapper = mapper(MappingMode::Lenient);
        assert!(mapper.validate_mappings().is_empty());
        assert_eq!(mapper.mapping_stats()[&MappingAxis::Domain], (2, 4));
    }
}
