//! 分类映射表
//!
//! 配置文件中每个轴（难度 / 领域 / 主题）一段，段内按声明顺序列出
//! `标准标签 = [原始同义词, ...]`。

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// 映射轴
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingAxis {
    Difficulty,
    Domain,
    Topic,
}

impl MappingAxis {
    pub const ALL: [MappingAxis; 3] = [
        MappingAxis::Difficulty,
        MappingAxis::Domain,
        MappingAxis::Topic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MappingAxis::Difficulty => "difficulty",
            MappingAxis::Domain => "domain",
            MappingAxis::Topic => "topic",
        }
    }

    /// 配置文件中对应的段名
    pub fn section_name(&self) -> &'static str {
        match self {
            MappingAxis::Difficulty => "difficulty_mapping",
            MappingAxis::Domain => "domain_mapping",
            MappingAxis::Topic => "topic_mapping",
        }
    }
}

impl fmt::Display for MappingAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 段内的一个值：应为字符串列表，其它类型只保留类型名用于报告
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEntry {
    List(Vec<String>),
    NotAList(String),
}

/// 校验发现的问题（只报告，不阻止加载）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingFinding {
    MissingSection {
        section: &'static str,
    },
    EmptySection {
        section: &'static str,
    },
    NonListValue {
        section: &'static str,
        label: String,
        found: String,
    },
    DuplicateSynonym {
        section: &'static str,
        synonym: String,
        first_label: String,
        other_label: String,
    },
}

impl fmt::Display for MappingFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingFinding::MissingSection { section } => write!(f, "缺少 [{}] 段", section),
            MappingFinding::EmptySection { section } => write!(f, "[{}] 段为空", section),
            MappingFinding::NonListValue {
                section,
                label,
                found,
            } => write!(f, "[{}] 中 '{}' 的值应为列表，实际为 {}", section, label, found),
            MappingFinding::DuplicateSynonym {
                section,
                synonym,
                first_label,
                other_label,
            } => write!(
                f,
                "[{}] 中同义词 '{}' 同时出现在 '{}' 和 '{}' 下（按声明顺序 '{}' 生效）",
                section, synonym, first_label, other_label, first_label
            ),
        }
    }
}

/// 解析后的映射文件（保留原始结构以便校验）
#[derive(Debug, Clone, Default)]
pub struct MappingDocument {
    pub source: String,
    pub sections: IndexMap<String, IndexMap<String, RawEntry>>,
}

impl MappingDocument {
    pub fn section(&self, axis: MappingAxis) -> Option<&IndexMap<String, RawEntry>> {
        self.sections.get(axis.section_name())
    }

    /// 检查缺段、空段、非列表值和同轴内重复的同义词
    pub fn validate(&self) -> Vec<MappingFinding> {
        let mut findings = Vec::new();

        for axis in MappingAxis::ALL {
            let section = axis.section_name();
            let Some(entries) = self.section(axis) else {
                findings.push(MappingFinding::MissingSection { section });
                continue;
            };
            if entries.is_empty() {
                findings.push(MappingFinding::EmptySection { section });
                continue;
            }

            let mut owner: HashMap<String, &str> = HashMap::new();
            for (label, entry) in entries {
                match entry {
                    RawEntry::NotAList(found) => findings.push(MappingFinding::NonListValue {
                        section,
                        label: label.clone(),
                        found: found.clone(),
                    }),
                    RawEntry::List(synonyms) => {
                        for synonym in synonyms {
                            let key = normalize(synonym);
                            match owner.get(&key) {
                                Some(first) if *first != label.as_str() => {
                                    findings.push(MappingFinding::DuplicateSynonym {
                                        section,
                                        synonym: key,
                                        first_label: first.to_string(),
                                        other_label: label.clone(),
                                    })
                                }
                                Some(_) => {}
                                None => {
                                    owner.insert(key, label.as_str());
                                }
                            }
                        }
                    }
                }
            }
        }

        findings
    }

    /// 构建查找表；非列表值被忽略
    pub fn to_table(&self) -> MappingTable {
        let axis = |axis: MappingAxis| {
            let entries = self
                .section(axis)
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(|(label, entry)| match entry {
                            RawEntry::List(synonyms) => Some((
                                label.clone(),
                                synonyms.iter().map(|s| normalize(s)).collect(),
                            )),
                            RawEntry::NotAList(_) => None,
                        })
                        .collect()
                })
                .unwrap_or_default();
            AxisMapping { entries }
        };

        MappingTable {
            difficulty: axis(MappingAxis::Difficulty),
            domain: axis(MappingAxis::Domain),
            topic: axis(MappingAxis::Topic),
        }
    }
}

/// 单个轴的有序映射
#[derive(Debug, Clone, Default)]
pub struct AxisMapping {
    entries: Vec<(String, Vec<String>)>,
}

impl AxisMapping {
    /// 去空白、忽略大小写后精确匹配，按声明顺序第一个命中的标签生效
    pub fn lookup(&self, raw: &str) -> Option<&str> {
        let needle = normalize(raw);
        self.entries
            .iter()
            .find(|(_, synonyms)| synonyms.iter().any(|s| *s == needle))
            .map(|(label, _)| label.as_str())
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(label, _)| label.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn synonym_count(&self) -> usize {
        self.entries.iter().map(|(_, synonyms)| synonyms.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 三个轴的查找表
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    pub difficulty: AxisMapping,
    pub domain: AxisMapping,
    pub topic: AxisMapping,
}

impl MappingTable {
    pub fn axis(&self, axis: MappingAxis) -> &AxisMapping {
        match axis {
            MappingAxis::Difficulty => &self.difficulty,
            MappingAxis::Domain => &self.domain,
            MappingAxis::Topic => &self.topic,
        }
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}
