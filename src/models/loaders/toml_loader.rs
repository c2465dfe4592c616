use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use tokio::fs;
use tracing::{info, warn};

use crate::error::{AppError, AppResult, ConfigError, FileError};
use crate::models::mapping::{MappingAxis, MappingDocument, MappingFinding, RawEntry};
use crate::models::speed_profile::{ProfileCatalog, SpeedProfile};

/// 档位文件：`[profiles.<name>]` 表
#[derive(Debug, Deserialize)]
struct ProfilesFile {
    #[serde(default)]
    profiles: IndexMap<String, SpeedProfile>,
}

/// 加载速度档位目录
///
/// 内置档位总是存在；给定文件时，文件中的同名档位覆盖内置值，新名称追加。
pub async fn load_profile_catalog(path: Option<&Path>) -> AppResult<ProfileCatalog> {
    let mut catalog = ProfileCatalog::builtin();
    let Some(path) = path else {
        return Ok(catalog);
    };

    let content = read_file(path).await?;
    let file: ProfilesFile = toml::from_str(&content).map_err(|e| FileError::TomlParseFailed {
        path: path.display().to_string(),
        source: Box::new(e),
    })?;

    let count = file.profiles.len();
    catalog.merge(file.profiles.into_iter().map(|(name, mut profile)| {
        profile.name = name;
        profile
    }))?;
    info!("成功加载 {} 个速度档位: {}", count, path.display());

    Ok(catalog)
}

/// 加载映射文件（.toml 或 .json）
///
/// 缺少任何一个映射段是配置错误；其它校验发现只记录警告。
pub async fn load_mapping_document(path: &Path) -> AppResult<MappingDocument> {
    let content = read_file(path).await?;
    let document = parse_mapping_document(path, &content)?;

    let findings = document.validate();
    for finding in &findings {
        if let MappingFinding::MissingSection { section } = finding {
            return Err(ConfigError::MissingMappingSection {
                section: section.to_string(),
                path: path.display().to_string(),
            }
            .into());
        }
    }
    for finding in &findings {
        warn!("映射文件 {}: {}", path.display(), finding);
    }

    for axis in MappingAxis::ALL {
        let count = document.section(axis).map(|s| s.len()).unwrap_or(0);
        tracing::debug!("已加载 {} 个 {} 映射", count, axis);
    }
    info!("成功加载映射文件: {}", path.display());

    Ok(document)
}

/// 按扩展名解析映射文件内容
pub fn parse_mapping_document(path: &Path, content: &str) -> AppResult<MappingDocument> {
    let source = path.display().to_string();
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase());

    let sections: IndexMap<String, IndexMap<String, RawEntry>> = match extension.as_deref() {
        Some("toml") => {
            let table: toml::Table =
                toml::from_str(content).map_err(|e| FileError::TomlParseFailed {
                    path: source.clone(),
                    source: Box::new(e),
                })?;
            table
                .into_iter()
                .filter_map(|(name, value)| match value {
                    toml::Value::Table(entries) => Some((
                        name,
                        entries
                            .into_iter()
                            .map(|(label, v)| (label, toml_entry(v)))
                            .collect(),
                    )),
                    _ => None,
                })
                .collect()
        }
        Some("json") => {
            let root: IndexMap<String, serde_json::Value> = serde_json::from_str(content)
                .map_err(|e| FileError::JsonParseFailed {
                    path: source.clone(),
                    source: Box::new(e),
                })?;
            root.into_iter()
                .filter_map(|(name, value)| match value {
                    serde_json::Value::Object(entries) => Some((
                        name,
                        entries
                            .into_iter()
                            .map(|(label, v)| (label, json_entry(v)))
                            .collect(),
                    )),
                    _ => None,
                })
                .collect()
        }
        _ => return Err(ConfigError::UnsupportedFormat { path: source }.into()),
    };

    Ok(MappingDocument { source, sections })
}

fn toml_entry(value: toml::Value) -> RawEntry {
    match value {
        toml::Value::Array(items) => RawEntry::List(
            items
                .into_iter()
                .map(|item| match item {
                    toml::Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect(),
        ),
        other => RawEntry::NotAList(other.type_str().to_string()),
    }
}

fn json_entry(value: serde_json::Value) -> RawEntry {
    match value {
        serde_json::Value::Array(items) => RawEntry::List(
            items
                .into_iter()
                .map(|item| match item {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect(),
        ),
        serde_json::Value::String(_) => RawEntry::NotAList("string".to_string()),
        serde_json::Value::Number(_) => RawEntry::NotAList("number".to_string()),
        serde_json::Value::Bool(_) => RawEntry::NotAList("bool".to_string()),
        serde_json::Value::Object(_) => RawEntry::NotAList("object".to_string()),
        serde_json::Value::Null => RawEntry::NotAList("null".to_string()),
    }
}

async fn read_file(path: &Path) -> AppResult<String> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        return Err(FileError::NotFound {
            path: path.display().to_string(),
        }
        .into());
    }
    fs::read_to_string(path)
        .await
        .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOML_MAPPINGS: &str = r#"
[difficulty_mapping]
Easy = ["easy", "average"]
Hard = ["difficult", "tough"]

[domain_mapping]
Culture = ["entertainment", "music"]

[topic_mapping]
General = ["general"]
"#;

    #[test]
    fn test_parse_toml_mapping_keeps_declaration_order() {
        let doc = parse_mapping_document(Path::new("m.toml"), TOML_MAPPINGS).unwrap();
        let labels: Vec<&String> = doc
            .section(MappingAxis::Difficulty)
            .unwrap()
            .keys()
            .collect();
        assert_eq!(labels, ["Easy", "Hard"]);
        assert!(doc.validate().is_empty());
        assert_eq!(doc.to_table().domain.lookup("Music"), Some("Culture"));
    }

    #[test]
    fn test_parse_json_mapping_flags_non_list() {
        let json = r#"{
            "difficulty_mapping": {"Easy": ["easy"]},
            "domain_mapping": {"Science": "science"},
            "topic_mapping": {"General": ["general"]}
        }"#;
        let doc = parse_mapping_document(Path::new("m.json"), json).unwrap();
        let findings = doc.validate();
        assert_eq!(findings.len(), 1);
        assert!(matches!(findings[0], MappingFinding::NonListValue { .. }));
    }

    #[test]
    fn test_unsupported_extension() {
        let err = parse_mapping_document(Path::new("m.yaml"), "").unwrap_err();
        assert!(matches!(
            err,
            AppError::Config(ConfigError::UnsupportedFormat { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_section_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mappings.toml");
        tokio::fs::write(&path, "[difficulty_mapping]\nEasy = [\"easy\"]\n")
            .await
            .unwrap();
        let err = load_mapping_document(&path).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("domain_mapping"));
    }

    #[tokio::test]
    async fn test_profile_file_overrides_and_adds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.toml");
        let content = r#"
[profiles.normal]
concurrency = 4
delay_min = 1.0
delay_max = 2.0
requests_per_minute = 25
timeouts = { page_load_ms = 60000, network_idle_ms = 45000, quiz_page_ms = 45000, quiz_wait_ms = 30000 }

[profiles.night]
concurrency = 1
delay_min = 5.0
delay_max = 9.0
requests_per_minute = 5
wait_for_network_idle = false
timeouts = { page_load_ms = 90000, network_idle_ms = 60000, quiz_page_ms = 60000, quiz_wait_ms = 45000 }
"#;
        tokio::fs::write(&path, content).await.unwrap();

        let catalog = load_profile_catalog(Some(path.as_path())).await.unwrap();
        let normal = catalog.get("normal").unwrap();
        assert_eq!(normal.concurrency, 4);
        assert!(normal.wait_for_network_idle);
        let night = catalog.get("night").unwrap();
        assert_eq!(night.name, "night");
        assert!(!night.wait_for_network_idle);
        assert!(catalog.get("turbo").is_ok());
    }

    #[tokio::test]
    async fn test_invalid_profile_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.toml");
        let content = r#"
[profiles.broken]
concurrency = 2
delay_min = 4.0
delay_max = 1.0
requests_per_minute = 10
timeouts = { page_load_ms = 1, network_idle_ms = 1, quiz_page_ms = 1, quiz_wait_ms = 1 }
"#;
        tokio::fs::write(&path, content).await.unwrap();
        let err = load_profile_catalog(Some(path.as_path())).await.unwrap_err();
        assert!(err.to_string().contains("broken"));
    }
}
