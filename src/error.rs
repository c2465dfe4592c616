use std::time::Duration;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 浏览器 / 页面相关错误
    #[error("浏览器错误: {0}")]
    Browser(#[from] BrowserError),
    /// 文件操作错误
    #[error("文件错误: {0}")]
    File(#[from] FileError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 分类映射错误
    #[error("映射错误: {0}")]
    Mapping(#[from] MappingError),
    /// 持久化索引错误
    #[error("索引错误: {0}")]
    Index(#[from] IndexError),
    /// 媒体下载错误
    #[error("媒体错误: {0}")]
    Media(#[from] MediaError),
    /// 运行已被取消（不是故障）
    #[error("任务已取消")]
    Cancelled,
    /// 其他错误
    #[error("错误: {0}")]
    Other(String),
}

/// 浏览器相关错误
#[derive(Debug, Error)]
pub enum BrowserError {
    /// 连接浏览器失败
    #[error("无法连接到浏览器 (端口: {port}): {source}")]
    ConnectionFailed {
        port: u16,
        #[source]
        source: BoxError,
    },
    /// 启动浏览器失败
    #[error("启动浏览器失败: {source}")]
    LaunchFailed {
        #[source]
        source: BoxError,
    },
    /// 导航失败
    #[error("导航到 {url} 失败: {source}")]
    NavigationFailed {
        url: String,
        #[source]
        source: BoxError,
    },
    /// 某个阶段超时
    #[error("{stage} 超时 ({timeout:?}): {url}")]
    Timeout {
        stage: &'static str,
        url: String,
        timeout: Duration,
    },
    /// 执行脚本失败
    #[error("执行脚本失败: {source}")]
    ScriptExecutionFailed {
        #[source]
        source: BoxError,
    },
    /// 页面内容无法提取
    #[error("无法从 {url} 提取题目: {reason}")]
    ExtractionFailed { url: String, reason: String },
}

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    /// 文件不存在
    #[error("文件不存在: {path}")]
    NotFound { path: String },
    /// 读取文件失败
    #[error("读取文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: BoxError,
    },
    /// 写入文件失败
    #[error("写入文件失败 ({path}): {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: BoxError,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: BoxError,
    },
    /// JSON 解析失败
    #[error("JSON解析失败 ({path}): {source}")]
    JsonParseFailed {
        path: String,
        #[source]
        source: BoxError,
    },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 速度档位不存在
    #[error("未知的速度档位 '{name}'，可用档位: {available}")]
    UnknownProfile { name: String, available: String },
    /// 速度档位参数不合法
    #[error("速度档位 '{name}' 不合法: {reason}（请修改档位配置文件中的 [profiles.{name}]）")]
    InvalidProfile { name: String, reason: String },
    /// 映射文件缺少必需的段
    #[error("映射文件 {path} 缺少 [{section}] 段，请补全后重新运行")]
    MissingMappingSection { section: String, path: String },
    /// 不支持的配置文件格式
    #[error("不支持的配置文件格式: {path}（仅支持 .toml / .json）")]
    UnsupportedFormat { path: String },
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
}

/// 分类映射错误
#[derive(Debug, Error)]
pub enum MappingError {
    /// 严格模式下遇到未映射的原始分类
    #[error("未知的 {axis} 值 '{value}'：{hint}")]
    UnmappedCategory {
        axis: String,
        value: String,
        hint: String,
    },
}

/// 持久化索引错误
#[derive(Debug, Error)]
pub enum IndexError {
    /// 索引文件存在但无法读取或解析
    #[error("索引文件 {path} 已损坏或无法读取，拒绝从 0 重新计数（请修复或手动删除该文件）: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: BoxError,
    },
    /// 索引写盘失败
    #[error("索引写入失败 ({path}): {source}")]
    PersistFailed {
        path: String,
        #[source]
        source: BoxError,
    },
}

/// 媒体下载错误
#[derive(Debug, Error)]
pub enum MediaError {
    /// 下载失败
    #[error("下载媒体失败 ({url}): {source}")]
    DownloadFailed {
        url: String,
        #[source]
        source: BoxError,
    },
}

// ========== 从常见错误类型转换 ==========

impl From<chromiumoxide::error::CdpError> for AppError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        AppError::Browser(BrowserError::ScriptExecutionFailed {
            source: Box::new(err),
        })
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::File(FileError::JsonParseFailed {
            path: String::new(),
            source: Box::new(err),
        })
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: String::new(),
            source: Box::new(err),
        })
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建浏览器连接错误
    pub fn browser_connection_failed(
        port: u16,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Browser(BrowserError::ConnectionFailed {
            port,
            source: Box::new(source),
        })
    }

    /// 创建导航失败错误
    pub fn navigation_failed(
        url: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Browser(BrowserError::NavigationFailed {
            url: url.into(),
            source: Box::new(source),
        })
    }

    /// 创建阶段超时错误
    pub fn timeout(stage: &'static str, url: impl Into<String>, timeout: Duration) -> Self {
        AppError::Browser(BrowserError::Timeout {
            stage,
            url: url.into(),
            timeout,
        })
    }

    /// 创建文件读取错误
    pub fn file_read_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::File(FileError::ReadFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 创建文件写入错误
    pub fn file_write_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::File(FileError::WriteFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 是否为运行级错误（配置缺口、状态损坏），这类错误不计入单条目失败而是终止整个运行
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Mapping(_) | AppError::Index(_) | AppError::Config(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
