//! 题型识别服务 - 业务能力层
//!
//! 按优先级依次询问各个策略，第一个给出意见的策略决定题型；
//! 都没有意见时为多选题。识别永远不会失败。

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::models::QuestionType;
use crate::utils::logging::truncate_text;

const TRUE_SYNONYMS: [&str; 7] = ["true", "t", "yes", "y", "correct", "right", "agree"];
const FALSE_SYNONYMS: [&str; 7] = ["false", "f", "no", "n", "incorrect", "wrong", "disagree"];

const CANONICAL_PAIRS: [(&str, &str); 7] = [
    ("true", "false"),
    ("yes", "no"),
    ("y", "n"),
    ("t", "f"),
    ("correct", "incorrect"),
    ("right", "wrong"),
    ("agree", "disagree"),
];

const SOUND_KEYWORDS: [&str; 3] = ["sound", "audio", "listen"];

const SHORT_OPTION_LEN: usize = 10;
const MEDIUM_OPTION_LEN: usize = 15;
const SIMILARITY_THRESHOLD: f64 = 0.3;

fn yes_no_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(is|does|can|will|were|has|have|are|am|do|did)\b|\btrue\s+or\s+false\b|\byes\s+or\s+no\b|\bcorrect\s+or\s+incorrect\b",
        )
        .expect("静态正则")
    })
}

fn factual_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(what\s+year|which\s+year|when\s+was|when\s+did|who\s+was|where\s+was|what\s+is\s+the|which\s+is\s+the)\b",
        )
        .expect("静态正则")
    })
}

/// 策略输入：题干原文和已清洗（去空白、小写、去空项）的选项
pub struct ClassifyInput<'a> {
    pub text: &'a str,
    pub text_lower: String,
    pub options: Vec<String>,
}

impl<'a> ClassifyInput<'a> {
    pub fn new(text: &'a str, options: &[String]) -> Self {
        Self {
            text,
            text_lower: text.trim().to_lowercase(),
            options: options
                .iter()
                .map(|o| o.trim().to_lowercase())
                .filter(|o| !o.is_empty())
                .collect(),
        }
    }

    fn binary(&self) -> Option<(&str, &str)> {
        match self.options.as_slice() {
            [a, b] => Some((a.as_str(), b.as_str())),
            _ => None,
        }
    }

    fn is_factual(&self) -> bool {
        factual_pattern().is_match(&self.text_lower)
    }
}

/// 单个识别策略：给出题型或者没有意见
pub trait ClassifyStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn classify(&self, input: &ClassifyInput<'_>) -> Option<QuestionType>;
}

/// 题干含有声音相关关键词
pub struct SoundSignal;

impl ClassifyStrategy for SoundSignal {
    fn name(&self) -> &'static str {
        "sound_signal"
    }

    fn classify(&self, input: &ClassifyInput<'_>) -> Option<QuestionType> {
        SOUND_KEYWORDS
            .iter()
            .any(|k| input.text_lower.contains(k))
            .then_some(QuestionType::Sound)
    }
}

/// 两个选项分别落在"真"与"假"同义词集合中
pub struct DirectSynonym;

impl ClassifyStrategy for DirectSynonym {
    fn name(&self) -> &'static str {
        "direct_synonym"
    }

    fn classify(&self, input: &ClassifyInput<'_>) -> Option<QuestionType> {
        let (a, b) = input.binary()?;
        let is_true = |s: &str| TRUE_SYNONYMS.contains(&s);
        let is_false = |s: &str| FALSE_SYNONYMS.contains(&s);
        ((is_true(a) && is_false(b)) || (is_false(a) && is_true(b)))
            .then_some(QuestionType::TrueFalse)
    }
}

/// 两个选项构成固定的成对词（任意顺序）
pub struct KnownBinaryPattern;

impl ClassifyStrategy for KnownBinaryPattern {
    fn name(&self) -> &'static str {
        "known_binary_pattern"
    }

    fn classify(&self, input: &ClassifyInput<'_>) -> Option<QuestionType> {
        let (a, b) = input.binary()?;
        CANONICAL_PAIRS
            .iter()
            .any(|(t, f)| (a == *t && b == *f) || (a == *f && b == *t))
            .then_some(QuestionType::TrueFalse)
    }
}

/// 一般疑问句式 + 两个短选项，排除事实类提问
pub struct LinguisticHeuristic;

impl ClassifyStrategy for LinguisticHeuristic {
    fn name(&self) -> &'static str {
        "linguistic_heuristic"
    }

    fn classify(&self, input: &ClassifyInput<'_>) -> Option<QuestionType> {
        let (a, b) = input.binary()?;
        let short = a.chars().count() <= SHORT_OPTION_LEN && b.chars().count() <= SHORT_OPTION_LEN;
        (short && yes_no_pattern().is_match(&input.text_lower) && !input.is_factual())
            .then_some(QuestionType::TrueFalse)
    }
}

/// 详细识别结果
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub question_type: QuestionType,
    /// 给出结论的策略；默认多选时为 None
    pub strategy: Option<&'static str>,
    /// 两个选项未被判为判断题但看起来很像判断题
    pub suspicious: bool,
}

/// 题型识别器
pub struct QuestionClassifier {
    strategies: Vec<Box<dyn ClassifyStrategy>>,
}

impl Default for QuestionClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl QuestionClassifier {
    /// 默认策略链：声音 → 同义词 → 成对词 → 句式
    pub fn new() -> Self {
        Self::with_strategies(vec![
            Box::new(SoundSignal),
            Box::new(DirectSynonym),
            Box::new(KnownBinaryPattern),
            Box::new(LinguisticHeuristic),
        ])
    }

    pub fn with_strategies(strategies: Vec<Box<dyn ClassifyStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn classify(&self, text: &str, options: &[String]) -> QuestionType {
        self.classify_detailed(text, options).question_type
    }

    pub fn classify_detailed(&self, text: &str, options: &[String]) -> Classification {
        let input = ClassifyInput::new(text, options);

        for strategy in &self.strategies {
            if let Some(question_type) = strategy.classify(&input) {
                debug!(
                    "题型识别: {} ({}) - {}",
                    question_type,
                    strategy.name(),
                    truncate_text(text, 50)
                );
                return Classification {
                    question_type,
                    strategy: Some(strategy.name()),
                    suspicious: false,
                };
            }
        }

        let suspicious = is_suspicious_binary(&input);
        if suspicious {
            warn!(
                "⚠️ 可疑的二选一题目，按多选题处理，请人工确认是否应为判断题: '{}' 选项 {:?}",
                truncate_text(text, 50),
                options
            );
        } else if input.options.len() == 2 {
            debug!("二选一题目默认按多选题处理: {}", truncate_text(text, 50));
        }

        Classification {
            question_type: QuestionType::MultipleChoice,
            strategy: None,
            suspicious,
        }
    }
}

fn is_suspicious_binary(input: &ClassifyInput<'_>) -> bool {
    let Some((a, b)) = input.binary() else {
        return false;
    };
    if input.is_factual() {
        return false;
    }
    if a.chars().count() > MEDIUM_OPTION_LEN || b.chars().count() > MEDIUM_OPTION_LEN {
        return false;
    }
    char_overlap(a, b) > SIMILARITY_THRESHOLD
}

/// 两个字符串字符集合的交并比
fn char_overlap(a: &str, b: &str) -> f64 {
    let a: HashSet<char> = a.chars().collect();
    let b: HashSet<char> = b.chars().collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}
