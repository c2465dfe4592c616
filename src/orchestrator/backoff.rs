//! 自适应降速 - 编排层
//!
//! 连续失败达到阈值时沿降级阶梯切换到更保守的档位。只降不升。

use std::sync::{Mutex, PoisonError};

use tracing::{info, warn};

use crate::error::AppResult;
use crate::models::{ProfileCatalog, SpeedProfile};

pub const DEFAULT_ERROR_THRESHOLD: u32 = 5;

#[derive(Debug)]
struct BackoffState {
    consecutive_failures: u32,
    profile: SpeedProfile,
    downgrades: u32,
}

/// 当前档位与连续失败窗口，放在同一把锁下
#[derive(Debug)]
pub struct AdaptiveBackoff {
    threshold: u32,
    catalog: ProfileCatalog,
    state: Mutex<BackoffState>,
}

impl AdaptiveBackoff {
    pub fn new(catalog: ProfileCatalog, initial: SpeedProfile, threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            catalog,
            state: Mutex::new(BackoffState {
                consecutive_failures: 0,
                profile: initial,
                downgrades: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BackoffState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 记录一次失败；恰好越过阈值时返回新档位（调用方负责应用到限速器）
    pub fn record_failure(&self) -> Option<SpeedProfile> {
        let mut state = self.lock();
        state.consecutive_failures += 1;
        if state.consecutive_failures < self.threshold {
            return None;
        }
        state.consecutive_failures = 0;

        match self.catalog.next_more_conservative(&state.profile.name) {
            Some(next) => {
                warn!(
                    "⚠️ 连续 {} 次失败，降速: {} -> {}",
                    self.threshold, state.profile.name, next.name
                );
                state.profile = next.clone();
                state.downgrades += 1;
                Some(next)
            }
            None => {
                warn!(
                    "⚠️ 连续 {} 次失败，已是最保守档位 {}",
                    self.threshold, state.profile.name
                );
                None
            }
        }
    }

    pub fn record_success(&self) {
        self.lock().consecutive_failures = 0;
    }

    pub fn current(&self) -> SpeedProfile {
        self.lock().profile.clone()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn downgrades(&self) -> u32 {
        self.lock().downgrades
    }

    pub fn catalog(&self) -> &ProfileCatalog {
        &self.catalog
    }

    /// 手动切换档位，同时清空失败窗口
    pub fn switch_profile(&self, name: &str) -> AppResult<SpeedProfile> {
        let profile = self.catalog.get(name)?;
        let mut state = self.lock();
        info!("🔧 手动切换速度档位: {} -> {}", state.profile.name, profile.name);
        state.profile = profile.clone();
        state.consecutive_failures = 0;
        Ok(profile)
    }
}
