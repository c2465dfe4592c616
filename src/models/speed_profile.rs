//! 速度档位
//!
//! 一个档位打包了并发数、请求间隔、每分钟请求上限和各阶段超时。
//! 启动时按名称选定，运行期间只会被错误监控（或操作员）切换到更保守的档位。

use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, ConfigError};

/// 从激进到保守的固定降级顺序
pub const PROFILE_LADDER: [&str; 5] = ["turbo", "aggressive", "fast", "normal", "conservative"];

/// 默认档位
pub const DEFAULT_PROFILE: &str = "normal";

/// 各阶段超时（毫秒）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    pub page_load_ms: u64,
    pub network_idle_ms: u64,
    pub quiz_page_ms: u64,
    pub quiz_wait_ms: u64,
}

impl Timeouts {
    pub fn page_load(&self) -> Duration {
        Duration::from_millis(self.page_load_ms)
    }

    pub fn network_idle(&self) -> Duration {
        Duration::from_millis(self.network_idle_ms)
    }

    pub fn quiz_page(&self) -> Duration {
        Duration::from_millis(self.quiz_page_ms)
    }

    pub fn quiz_wait(&self) -> Duration {
        Duration::from_millis(self.quiz_wait_ms)
    }
}

/// 速度档位
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedProfile {
    #[serde(default)]
    pub name: String,
    /// 同时在途的条目上限
    pub concurrency: usize,
    /// 两次派发之间的最小间隔（秒）
    pub delay_min: f64,
    /// 两次派发之间的最大间隔（秒）
    pub delay_max: f64,
    pub requests_per_minute: u32,
    pub timeouts: Timeouts,
    #[serde(default = "default_true")]
    pub wait_for_network_idle: bool,
    #[serde(default)]
    pub parallel_media_downloads: bool,
}

fn default_true() -> bool {
    true
}

impl SpeedProfile {
    /// 校验档位不变量
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |reason: String| {
            Err(ConfigError::InvalidProfile {
                name: self.name.clone(),
                reason,
            }
            .into())
        };

        if self.concurrency == 0 {
            return invalid("concurrency 必须大于 0".to_string());
        }
        if self.requests_per_minute == 0 {
            return invalid("requests_per_minute 必须大于 0".to_string());
        }
        if !self.delay_min.is_finite() || !self.delay_max.is_finite() || self.delay_min < 0.0 {
            return invalid(format!(
                "延迟必须是非负有限数 (delay_min={}, delay_max={})",
                self.delay_min, self.delay_max
            ));
        }
        if self.delay_min > self.delay_max {
            return invalid(format!(
                "delay_min ({}) 不能大于 delay_max ({})",
                self.delay_min, self.delay_max
            ));
        }
        Ok(())
    }

    /// 随机间隔的取值范围
    pub fn delay_range(&self) -> (Duration, Duration) {
        (
            Duration::from_secs_f64(self.delay_min),
            Duration::from_secs_f64(self.delay_max),
        )
    }

    pub fn conservative() -> Self {
        Self {
            name: "conservative".to_string(),
            concurrency: 1,
            delay_min: 3.0,
            delay_max: 6.0,
            requests_per_minute: 10,
            timeouts: Timeouts {
                page_load_ms: 90_000,
                network_idle_ms: 60_000,
                quiz_page_ms: 60_000,
                quiz_wait_ms: 45_000,
            },
            wait_for_network_idle: true,
            parallel_media_downloads: false,
        }
    }

    pub fn normal() -> Self {
        Self {
            name: "normal".to_string(),
            concurrency: 2,
            delay_min: 1.0,
            delay_max: 3.0,
            requests_per_minute: 15,
            timeouts: Timeouts {
                page_load_ms: 60_000,
                network_idle_ms: 45_000,
                quiz_page_ms: 45_000,
                quiz_wait_ms: 30_000,
            },
            wait_for_network_idle: true,
            parallel_media_downloads: false,
        }
    }

    pub fn fast() -> Self {
        Self {
            name: "fast".to_string(),
            concurrency: 3,
            delay_min: 0.5,
            delay_max: 1.5,
            requests_per_minute: 30,
            timeouts: Timeouts {
                page_load_ms: 45_000,
                network_idle_ms: 30_000,
                quiz_page_ms: 30_000,
                quiz_wait_ms: 20_000,
            },
            wait_for_network_idle: false,
            parallel_media_downloads: true,
        }
    }

    pub fn aggressive() -> Self {
        Self {
            name: "aggressive".to_string(),
            concurrency: 5,
            delay_min: 0.2,
            delay_max: 0.8,
            requests_per_minute: 60,
            timeouts: Timeouts {
                page_load_ms: 30_000,
                network_idle_ms: 20_000,
                quiz_page_ms: 20_000,
                quiz_wait_ms: 15_000,
            },
            wait_for_network_idle: false,
            parallel_media_downloads: true,
        }
    }

    pub fn turbo() -> Self {
        Self {
            name: "turbo".to_string(),
            concurrency: 8,
            delay_min: 0.1,
            delay_max: 0.4,
            requests_per_minute: 100,
            timeouts: Timeouts {
                page_load_ms: 20_000,
                network_idle_ms: 10_000,
                quiz_page_ms: 15_000,
                quiz_wait_ms: 10_000,
            },
            wait_for_network_idle: false,
            parallel_media_downloads: true,
        }
    }
}

impl std::fmt::Display for SpeedProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (并发 {}, 间隔 {:.1}-{:.1}s, {} 次/分钟)",
            self.name, self.concurrency, self.delay_min, self.delay_max, self.requests_per_minute
        )
    }
}

/// 速度档位目录
#[derive(Debug, Clone)]
pub struct ProfileCatalog {
    profiles: IndexMap<String, SpeedProfile>,
}

impl ProfileCatalog {
    /// 内置的五个档位
    pub fn builtin() -> Self {
        let profiles = [
            SpeedProfile::conservative(),
            SpeedProfile::normal(),
            SpeedProfile::fast(),
            SpeedProfile::aggressive(),
            SpeedProfile::turbo(),
        ]
        .into_iter()
        .map(|p| (p.name.clone(), p))
        .collect();
        Self { profiles }
    }

    /// 覆盖或追加档位，逐个校验
    pub fn merge(&mut self, profiles: impl IntoIterator<Item = SpeedProfile>) -> AppResult<()> {
        for profile in profiles {
            profile.validate()?;
            self.profiles.insert(profile.name.clone(), profile);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> AppResult<SpeedProfile> {
        self.profiles.get(name).cloned().ok_or_else(|| {
            ConfigError::UnknownProfile {
                name: name.to_string(),
                available: self.names().join(", "),
            }
            .into()
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }

    /// 降级阶梯上比 `current` 更保守的下一个档位；已是最保守时返回 None
    ///
    /// 不在阶梯上的自定义档位直接降到 conservative。
    pub fn next_more_conservative(&self, current: &str) -> Option<SpeedProfile> {
        let start = match PROFILE_LADDER.iter().position(|n| *n == current) {
            Some(pos) => pos + 1,
            None => PROFILE_LADDER.len() - 1,
        };
        PROFILE_LADDER[start..]
            .iter()
            .filter(|name| **name != current)
            .find_map(|name| self.profiles.get(*name).cloned())
    }
}

impl Default for ProfileCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
