//! 全局限速器 - 基础设施层
//!
//! 两层约束叠加：
//! - 令牌桶：每分钟 `requests_per_minute` 个令牌，容量默认等于每分钟配额
//! - 随机间隔：相邻两次派发至少间隔 `[delay_min, delay_max]` 内随机抽取的时长

use std::num::NonZeroU32;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota};
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{AppError, AppResult, ConfigError};
use crate::models::SpeedProfile;

struct LimiterState {
    bucket: DefaultDirectRateLimiter,
    delay_min: Duration,
    delay_max: Duration,
    requests_per_minute: u32,
}

impl LimiterState {
    fn build(profile: &SpeedProfile, burst: Option<NonZeroU32>) -> AppResult<Self> {
        let rpm = NonZeroU32::new(profile.requests_per_minute).ok_or_else(|| {
            ConfigError::InvalidProfile {
                name: profile.name.clone(),
                reason: "requests_per_minute 必须大于 0".to_string(),
            }
        })?;
        let mut quota = Quota::per_minute(rpm);
        if let Some(burst) = burst {
            quota = quota.allow_burst(burst);
        }
        let (delay_min, delay_max) = profile.delay_range();

        Ok(Self {
            bucket: DefaultDirectRateLimiter::direct(quota),
            delay_min,
            delay_max,
            requests_per_minute: profile.requests_per_minute,
        })
    }

    fn jitter(&self) -> Duration {
        if self.delay_max <= self.delay_min {
            return self.delay_min;
        }
        let span = self.delay_max - self.delay_min;
        self.delay_min + span.mul_f64(fastrand::f64())
    }
}

/// 全局限速器
///
/// 所有派发共用一个实例；`reconfigure` 在降级时整体替换令牌桶和间隔范围。
pub struct RateLimiter {
    state: RwLock<Arc<LimiterState>>,
    last_dispatch: Mutex<Option<Instant>>,
    burst: Option<NonZeroU32>,
}

impl RateLimiter {
    pub fn new(profile: &SpeedProfile) -> AppResult<Self> {
        Self::build(profile, None)
    }

    /// 自定义令牌桶容量（默认等于每分钟配额）
    pub fn with_burst(profile: &SpeedProfile, burst: u32) -> AppResult<Self> {
        Self::build(profile, NonZeroU32::new(burst))
    }

    fn build(profile: &SpeedProfile, burst: Option<NonZeroU32>) -> AppResult<Self> {
        Ok(Self {
            state: RwLock::new(Arc::new(LimiterState::build(profile, burst)?)),
            last_dispatch: Mutex::new(None),
            burst,
        })
    }

    fn current(&self) -> Arc<LimiterState> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 等待派发许可
    ///
    /// 取消令牌触发后立即返回 `AppError::Cancelled`。
    pub async fn acquire(&self, cancel: &CancellationToken) -> AppResult<()> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AppError::Cancelled),
            _ = self.wait_turn() => Ok(()),
        }
    }

    async fn wait_turn(&self) {
        // 持锁等待，保证相邻派发之间的最小间隔
        let mut last = self.last_dispatch.lock().await;
        let state = self.current();

        if let Some(prev) = *last {
            let spacing = state.jitter();
            sleep_until(prev + spacing).await;
        }
        state.bucket.until_ready().await;

        *last = Some(Instant::now());
    }

    /// 切换到新档位的速率和间隔
    ///
    /// 新令牌桶从空桶开始，按新速率逐个补充，切换后不会先放出一整桶突发。
    pub fn reconfigure(&self, profile: &SpeedProfile) -> AppResult<()> {
        let next = LimiterState::build(profile, self.burst)?;
        let capacity = self
            .burst
            .or_else(|| NonZeroU32::new(next.requests_per_minute));
        if let Some(capacity) = capacity {
            let _ = next.bucket.check_n(capacity);
        }
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        debug!(
            "限速器已切换: {} 次/分钟, 间隔 {:.1}-{:.1}s",
            profile.requests_per_minute, profile.delay_min, profile.delay_max
        );
        Ok(())
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.current().requests_per_minute
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn profile(rpm: u32, delay_min: f64, delay_max: f64) -> SpeedProfile {
        SpeedProfile {
            name: "test".to_string(),
            requests_per_minute: rpm,
            delay_min,
            delay_max,
            ..SpeedProfile::normal()
        }
    }

    #[tokio::test]
    async fn test_minimum_spacing_between_dispatches() {
        let limiter = RateLimiter::new(&profile(6000, 0.05, 0.08)).unwrap();
        let cancel = CancellationToken::new();

        let mut stamps = Vec::new();
        for _ in 0..4 {
            limiter.acquire(&cancel).await.unwrap();
            stamps.push(Instant::now());
        }
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(49));
        }
    }

    #[tokio::test]
    async fn test_rate_ceiling_with_small_bucket() {
        // 600 次/分钟、容量 1：每 100ms 一个令牌
        let limiter = RateLimiter::with_burst(&profile(600, 0.0, 0.0), 1).unwrap();
        let cancel = CancellationToken::new();

        let start = Instant::now();
        for _ in 0..4 {
            limiter.acquire(&cancel).await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(280));
    }

    #[tokio::test]
    async fn test_acquire_returns_cancelled_promptly() {
        let limiter = Arc::new(RateLimiter::with_burst(&profile(1, 0.0, 0.0), 1).unwrap());
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("acquire should unblock after cancel")
            .unwrap();
        assert!(matches!(result, Err(AppError::Cancelled)));
    }

    #[tokio::test]
    async fn test_reconfigure_swaps_rate() {
        let limiter = RateLimiter::new(&profile(100, 0.0, 0.0)).unwrap();
        limiter.reconfigure(&profile(10, 0.0, 0.0)).unwrap();
        assert_eq!(limiter.requests_per_minute(), 10);
    }

    #[tokio::test]
    async fn test_reconfigure_starts_with_empty_bucket() {
        let limiter = RateLimiter::new(&profile(6000, 0.0, 0.0)).unwrap();
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();

        // 600 次/分钟：每 100ms 补充一个令牌，不能沿用整桶容量
        limiter.reconfigure(&profile(600, 0.0, 0.0)).unwrap();
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire(&cancel).await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(250));
    }
}
