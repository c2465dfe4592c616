use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

/// 题目类型（封闭集合，每条记录只判定一次）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    TrueFalse,
    Sound,
}

const MULTIPLE_CHOICE_COLUMNS: &[&str] = &[
    "Key",
    "Domain",
    "Topic",
    "Difficulty",
    "Question",
    "Option1",
    "Option2",
    "Option3",
    "Option4",
    "CorrectAnswer",
    "Hint",
    "Description",
    "ImagePath",
];

const TRUE_FALSE_COLUMNS: &[&str] = &[
    "Key",
    "Domain",
    "Topic",
    "Difficulty",
    "Question",
    "Option1",
    "Option2",
    "CorrectAnswer",
    "Hint",
    "Description",
];

const SOUND_COLUMNS: &[&str] = &[
    "Key",
    "Domain",
    "Topic",
    "Difficulty",
    "Question",
    "Option1",
    "Option2",
    "Option3",
    "Option4",
    "CorrectAnswer",
    "Hint",
    "Description",
    "AudioPath",
];

/// 媒体类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
}

impl QuestionType {
    pub const ALL: [QuestionType; 3] = [
        QuestionType::MultipleChoice,
        QuestionType::TrueFalse,
        QuestionType::Sound,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::TrueFalse => "true_false",
            QuestionType::Sound => "sound",
        }
    }

    /// 题目 Key 中使用的前缀
    pub fn key_prefix(self) -> &'static str {
        match self {
            QuestionType::MultipleChoice => "MQ",
            QuestionType::TrueFalse => "TF",
            QuestionType::Sound => "SOUND",
        }
    }

    /// 输出表中的选项列数
    pub fn max_options(self) -> usize {
        match self {
            QuestionType::TrueFalse => 2,
            QuestionType::MultipleChoice | QuestionType::Sound => 4,
        }
    }

    /// 输出表的列结构
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            QuestionType::MultipleChoice => MULTIPLE_CHOICE_COLUMNS,
            QuestionType::TrueFalse => TRUE_FALSE_COLUMNS,
            QuestionType::Sound => SOUND_COLUMNS,
        }
    }

    pub fn csv_file_name(self) -> String {
        format!("{}.csv", self.as_str())
    }

    /// 该类型题目附带的媒体类别
    pub fn media_kind(self) -> Option<MediaKind> {
        match self {
            QuestionType::MultipleChoice => Some(MediaKind::Image),
            QuestionType::Sound => Some(MediaKind::Audio),
            QuestionType::TrueFalse => None,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim() {
            "multiple_choice" => Some(QuestionType::MultipleChoice),
            "true_false" => Some(QuestionType::TrueFalse),
            "sound" => Some(QuestionType::Sound),
            _ => None,
        }
    }
}

impl std::fmt::Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 从页面提取出的原始题目
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuestionRecord {
    pub raw_text: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    pub hint: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
    pub raw_domain: String,
    pub raw_topic: String,
    pub raw_difficulty: String,
}

impl QuestionRecord {
    /// 是否还缺少只能从结果页拿到的字段
    pub fn needs_results(&self) -> bool {
        self.correct_answer.trim().is_empty() || self.description.trim().is_empty()
    }

    /// 合并结果页信息，已有内容不覆盖
    pub fn merge_result(&mut self, result: &QuizResult) {
        if self.correct_answer.trim().is_empty() {
            if let Some(answer) = &result.correct_answer {
                self.correct_answer = answer.clone();
            }
        }
        if self.hint.trim().is_empty() {
            if let Some(hint) = &result.hint {
                self.hint = hint.clone();
            }
        }
        if self.description.trim().is_empty() {
            if let Some(description) = &result.description {
                self.description = description.clone();
            }
        }
    }
}

/// 提交测验后结果页上单道题的信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuizResult {
    pub correct_answer: Option<String>,
    pub hint: Option<String>,
    pub description: Option<String>,
}

/// 已完成分类与映射的题目
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedQuestion {
    pub record: QuestionRecord,
    pub question_type: QuestionType,
    pub domain: String,
    pub topic: String,
    pub difficulty: String,
    /// 分类器认为二选一判定可疑
    pub suspicious: bool,
}

impl ResolvedQuestion {
    /// 与落盘后行内容一致的去重标识
    pub fn content_id(&self) -> String {
        let options: Vec<String> = self
            .record
            .options
            .iter()
            .take(self.question_type.max_options())
            .cloned()
            .collect();
        content_id(&clean_question_text(&self.record.raw_text), &options)
    }
}

/// 交给输出端的最终行
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionRow {
    pub question_type: QuestionType,
    pub key: String,
    pub domain: String,
    pub topic: String,
    pub difficulty: String,
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    pub hint: String,
    pub description: String,
    pub media_path: String,
}

impl QuestionRow {
    /// 按输出结构格式化一条题目
    pub fn from_resolved(resolved: &ResolvedQuestion, key: String, media_path: Option<String>) -> Self {
        let qtype = resolved.question_type;
        let record = &resolved.record;

        let options: Vec<String> = record
            .options
            .iter()
            .take(qtype.max_options())
            .map(|o| o.trim().to_string())
            .collect();

        let media_path = match qtype.media_kind() {
            Some(_) => media_path.unwrap_or_default(),
            None => String::new(),
        };

        Self {
            question_type: qtype,
            key,
            domain: resolved.domain.clone(),
            topic: resolved.topic.clone(),
            difficulty: resolved.difficulty.clone(),
            question: clean_question_text(&record.raw_text),
            correct_answer: resolve_correct_answer(&record.correct_answer, &options),
            options,
            hint: clean_hint(&record.hint),
            description: clean_description(&record.description),
            media_path,
        }
    }

    pub fn content_id(&self) -> String {
        content_id(&self.question, &self.options)
    }

    /// 按列顺序输出所有单元格
    pub fn fields(&self) -> Vec<String> {
        let mut fields = vec![
            self.key.clone(),
            self.domain.clone(),
            self.topic.clone(),
            self.difficulty.clone(),
            self.question.clone(),
        ];
        for i in 0..self.question_type.max_options() {
            fields.push(self.options.get(i).cloned().unwrap_or_default());
        }
        fields.push(self.correct_answer.clone());
        fields.push(self.hint.clone());
        fields.push(self.description.clone());
        if self.question_type.media_kind().is_some() {
            fields.push(self.media_path.clone());
        }
        fields
    }
}

/// 题干 + 选项的内容哈希，大小写与空白不敏感
pub fn content_id(question: &str, options: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(question).as_bytes());
    for option in options {
        let option = normalize(option);
        if option.is_empty() {
            continue;
        }
        hasher.update([0x1f]);
        hasher.update(option.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn question_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\.\s*").expect("静态正则"))
}

/// 去掉题干前的 "12. " 编号
pub fn clean_question_text(text: &str) -> String {
    question_prefix_re().replace(text.trim(), "").trim().to_string()
}

const HINT_PREFIXES: &[&str] = &["Explanation:", "Hint:"];
const DESCRIPTION_PREFIXES: &[&str] = &[
    "Explanation:",
    "Description:",
    "Summary:",
    "Interesting Information:",
    "Fun Fact:",
];

fn strip_markers(text: &str, markers: &[&str]) -> String {
    let mut out = text.trim().to_string();
    for marker in markers {
        out = out.replace(marker, "");
    }
    out.trim().to_string()
}

pub fn clean_hint(hint: &str) -> String {
    strip_markers(hint, HINT_PREFIXES)
}

pub fn clean_description(description: &str) -> String {
    strip_markers(description, DESCRIPTION_PREFIXES)
}

/// 把正确答案规整为选项原文：先精确匹配，再包含匹配，最后退回第一个选项
pub fn resolve_correct_answer(answer: &str, options: &[String]) -> String {
    let answer = answer.trim();
    if options.is_empty() {
        return answer.to_string();
    }
    if answer.is_empty() {
        return options[0].clone();
    }

    let lower = answer.to_lowercase();
    if let Some(exact) = options.iter().find(|o| o.trim().to_lowercase() == lower) {
        return exact.trim().to_string();
    }
    if let Some(partial) = options.iter().find(|o| {
        let o = o.trim().to_lowercase();
        !o.is_empty() && (o.contains(&lower) || lower.contains(&o))
    }) {
        return partial.trim().to_string();
    }

    warn!("无法把正确答案 '{}' 与选项匹配，使用第一个选项", answer);
    options[0].clone()
}
