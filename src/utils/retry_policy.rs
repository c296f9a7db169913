// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::settings::SchedulerSettings;

/// 重试策略配置
///
/// 用于带条件的短更新在存储竞争时的有限重试
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大重试次数
    pub max_retries: u32,
    /// 初始退避时间
    pub initial_backoff: Duration,
    /// 最大退避时间
    pub max_backoff: Duration,
    /// 退避乘数
    pub backoff_multiplier: f64,
    /// 抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl From<&SchedulerSettings> for RetryPolicy {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            max_retries: settings.progress_update_retries,
            initial_backoff: Duration::from_millis(settings.progress_update_backoff_ms),
            ..Self::default()
        }
    }
}

impl RetryPolicy {
    /// 计算第 `attempt` 次重试（从1开始）前的退避时间
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        // 限制最大退避时间
        let capped_backoff = backoff_secs.min(self.max_backoff.as_secs_f64());

        let jitter_range = capped_backoff * self.jitter_factor;
        let final_backoff = if jitter_range > 0.0 {
            (capped_backoff + rand::random_range(-jitter_range..jitter_range)).max(0.0)
        } else {
            capped_backoff
        };

        Duration::from_secs_f64(final_backoff)
    }

    /// 是否应该重试
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// 执行操作，失败时按策略退避重试
    ///
    /// # 参数
    ///
    /// * `operation` - 操作名称，仅用于日志
    /// * `f` - 每次调用返回一个新的 future
    ///
    /// # 返回值
    ///
    /// 第一次成功的结果，或重试耗尽后的最后一个错误
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(attempt) => {
                    attempt += 1;
                    let backoff = self.calculate_backoff(attempt);
                    warn!(
                        operation,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Retrying after error: {}",
                        e
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
