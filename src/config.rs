use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{AppResult, ConfigError};
use crate::models::DEFAULT_PROFILE;
use crate::orchestrator::backoff::DEFAULT_ERROR_THRESHOLD;

/// 输出写入方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// 追加到已有输出，跳过已存在的题目
    #[default]
    Append,
    /// 运行前清空已有输出（可先备份）
    Overwrite,
}

impl FromStr for OutputMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "append" => Ok(OutputMode::Append),
            "overwrite" => Ok(OutputMode::Overwrite),
            _ => Err(()),
        }
    }
}

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    /// 初始速度档位
    pub speed_profile: String,
    /// 自定义档位文件，未设置时只用内置档位
    pub profiles_file: Option<PathBuf>,
    pub mappings_file: PathBuf,
    pub index_file: PathBuf,
    pub progress_file: PathBuf,
    pub output_dir: PathBuf,
    pub images_dir: PathBuf,
    pub audio_dir: PathBuf,
    /// 测验站点根地址
    pub base_url: String,
    /// 设置时连接已开启调试端口的浏览器，否则启动无头浏览器
    pub browser_debug_port: Option<u16>,
    pub chrome_executable: Option<PathBuf>,
    pub strict_mapping: bool,
    /// 试运行：完整走流程但不写输出、不占用编号、不记录进度
    pub dry_run: bool,
    pub reset_indices: bool,
    pub reset_progress: bool,
    /// 未映射值报告（JSON），为空时只写日志
    pub unmapped_report: Option<PathBuf>,
    pub max_questions: Option<usize>,
    /// 分类 URL 过滤片段
    pub categories: Vec<String>,
    /// 连续失败多少次后降速
    pub error_threshold: u32,
    /// 编号按 领域/难度 分桶
    pub index_by_category: bool,
    pub output_mode: OutputMode,
    pub backup_before_write: bool,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 输出日志文件
    pub output_log_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            speed_profile: DEFAULT_PROFILE.to_string(),
            profiles_file: None,
            mappings_file: PathBuf::from("config/mappings.toml"),
            index_file: PathBuf::from("question_indices.json"),
            progress_file: PathBuf::from("scrape_progress.json"),
            output_dir: PathBuf::from("output"),
            images_dir: PathBuf::from("assets/images"),
            audio_dir: PathBuf::from("assets/audio"),
            base_url: "https://www.funtrivia.com".to_string(),
            browser_debug_port: None,
            chrome_executable: None,
            strict_mapping: false,
            dry_run: false,
            reset_indices: false,
            reset_progress: false,
            unmapped_report: Some(PathBuf::from("unmapped_values.json")),
            max_questions: None,
            categories: Vec::new(),
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            index_by_category: false,
            output_mode: OutputMode::Append,
            backup_before_write: true,
            verbose_logging: false,
            output_log_file: "scrape_log.txt".to_string(),
        }
    }
}

impl Config {
    /// 从环境变量读取配置，未设置的项使用默认值
    ///
    /// 设置了但无法解析的值直接报错，不会静默回退。
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 用任意查找函数代替进程环境
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let default = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let path = |name: &str| var(name).map(PathBuf::from);

        Ok(Self {
            speed_profile: var("SPEED_PROFILE").unwrap_or(default.speed_profile),
            profiles_file: path("PROFILES_FILE").or(default.profiles_file),
            mappings_file: path("MAPPINGS_FILE").unwrap_or(default.mappings_file),
            index_file: path("INDEX_FILE").unwrap_or(default.index_file),
            progress_file: path("PROGRESS_FILE").unwrap_or(default.progress_file),
            output_dir: path("OUTPUT_DIR").unwrap_or(default.output_dir),
            images_dir: path("IMAGES_DIR").unwrap_or(default.images_dir),
            audio_dir: path("AUDIO_DIR").unwrap_or(default.audio_dir),
            base_url: var("BASE_URL").unwrap_or(default.base_url),
            browser_debug_port: parse_var(&var, "BROWSER_DEBUG_PORT", "u16")?
                .or(default.browser_debug_port),
            chrome_executable: path("CHROME_EXECUTABLE").or(default.chrome_executable),
            strict_mapping: bool_var(&var, "STRICT_MAPPING")?.unwrap_or(default.strict_mapping),
            dry_run: bool_var(&var, "DRY_RUN")?.unwrap_or(default.dry_run),
            reset_indices: bool_var(&var, "RESET_INDICES")?.unwrap_or(default.reset_indices),
            reset_progress: bool_var(&var, "RESET_PROGRESS")?.unwrap_or(default.reset_progress),
            unmapped_report: match lookup("UNMAPPED_REPORT") {
                Some(v) if v.trim().is_empty() => None,
                Some(v) => Some(PathBuf::from(v)),
                None => default.unmapped_report,
            },
            max_questions: parse_var(&var, "MAX_QUESTIONS", "usize")?.or(default.max_questions),
            categories: var("CATEGORIES")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(default.categories),
            error_threshold: parse_var(&var, "ERROR_THRESHOLD", "u32")?
                .unwrap_or(default.error_threshold),
            index_by_category: bool_var(&var, "INDEX_BY_CATEGORY")?
                .unwrap_or(default.index_by_category),
            output_mode: parse_var(&var, "OUTPUT_MODE", "append|overwrite")?
                .unwrap_or(default.output_mode),
            backup_before_write: bool_var(&var, "BACKUP_BEFORE_WRITE")?
                .unwrap_or(default.backup_before_write),
            verbose_logging: bool_var(&var, "VERBOSE_LOGGING")?.unwrap_or(default.verbose_logging),
            output_log_file: var("OUTPUT_LOG_FILE").unwrap_or(default.output_log_file),
        })
    }
}

fn parse_var<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    expected_type: &str,
) -> AppResult<Option<T>> {
    let Some(value) = var(name) else {
        return Ok(None);
    };
    value.trim().parse().map(Some).map_err(|_| {
        ConfigError::EnvVarParseFailed {
            var_name: name.to_string(),
            value,
            expected_type: expected_type.to_string(),
        }
        .into()
    })
}

fn bool_var(var: &impl Fn(&str) -> Option<String>, name: &str) -> AppResult<Option<bool>> {
    let Some(value) = var(name) else {
        return Ok(None);
    };
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::EnvVarParseFailed {
            var_name: name.to_string(),
            value,
            expected_type: "bool".to_string(),
        }
        .into()),
    }
}
