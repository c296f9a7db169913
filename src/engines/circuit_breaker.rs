// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use dashmap::DashMap;
use metrics::{counter, gauge};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::settings::CircuitBreakerSettings;

/// 熔断器配置
#[derive(Clone, Debug)]
pub struct CircuitConfig {
    /// 是否启用
    pub enabled: bool,
    /// 连续失败阈值
    pub max_failures: u32,
    /// 冷却时间
    pub cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self::from(&CircuitBreakerSettings::default())
    }
}

impl From<&CircuitBreakerSettings> for CircuitConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            enabled: settings.enabled,
            max_failures: settings.max_failures,
            cooldown: Duration::from_secs(settings.cooldown_secs),
        }
    }
}

/// 单个键的熔断状态
#[derive(Clone, Debug, Default)]
struct CircuitState {
    /// 连续失败次数
    consecutive_failures: u32,
    /// 上次失败时间
    last_failure: Option<Instant>,
}

/// 熔断器统计信息
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerStats {
    /// 有失败记录的键数量
    pub total_keys: usize,
    /// 当前处于打开状态的键数量
    pub open_keys: usize,
    pub max_failures: u32,
    pub cooldown_seconds: u64,
}

/// 熔断器
///
/// 按目标表单统计连续失败，达到阈值后在冷却期内拒绝执行。
/// 冷却结束后第一次检查即清零并放行。
#[derive(Clone)]
pub struct CircuitBreaker {
    /// 状态映射
    states: Arc<DashMap<String, CircuitState>>,
    config: CircuitConfig,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}

impl CircuitBreaker {
    /// 创建新的熔断器实例
    ///
    /// # 参数
    ///
    /// * `config` - 熔断配置
    ///
    /// # 返回值
    ///
    /// 返回新的熔断器实例
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            states: Arc::new(DashMap::new()),
            config,
        }
    }

    /// 检查熔断器是否打开
    ///
    /// # 参数
    ///
    /// * `key` - 熔断键（目标表单）
    ///
    /// # 返回值
    ///
    /// 如果熔断器打开则返回true，否则返回false
    pub fn is_open(&self, key: &str) -> bool {
        if !self.config.enabled {
            return false;
        }

        let Some(state) = self.states.get(key) else {
            return false;
        };

        if state.consecutive_failures < self.config.max_failures {
            return false;
        }

        let cooled_down = state
            .last_failure
            .is_none_or(|at| at.elapsed() > self.config.cooldown);
        if cooled_down {
            drop(state);
            // 冷却结束后放行一次试探：再失败一次即重新打开，成功则清零
            if let Some(mut state) = self.states.get_mut(key) {
                state.consecutive_failures = self.config.max_failures.saturating_sub(1);
            }
            self.update_status_metric(false);
            tracing::info!(key = %key, "Circuit half-open after cooldown");
            return false;
        }

        counter!("circuit_breaker_rejected_total").increment(1);
        true
    }

    /// 记录失败
    ///
    /// # 参数
    ///
    /// * `key` - 熔断键
    pub fn record_failure(&self, key: &str) {
        let mut state = self.states.entry(key.to_string()).or_default();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure = Some(Instant::now());
        let failures = state.consecutive_failures;
        drop(state);

        counter!("circuit_breaker_failures_total").increment(1);

        if failures == self.config.max_failures {
            tracing::warn!(
                key = %key,
                failures,
                cooldown_secs = self.config.cooldown.as_secs(),
                "Circuit opened"
            );
            self.update_status_metric(true);
        }
    }

    /// 记录成功，清除该键的失败记录
    ///
    /// # 参数
    ///
    /// * `key` - 熔断键
    pub fn record_success(&self, key: &str) {
        if self.states.remove(key).is_some() {
            self.update_status_metric(false);
        }
    }

    /// 获取熔断统计信息
    pub fn stats(&self) -> CircuitBreakerStats {
        let open_keys = self
            .states
            .iter()
            .filter(|entry| {
                entry.consecutive_failures >= self.config.max_failures
                    && entry
                        .last_failure
                        .is_some_and(|at| at.elapsed() <= self.config.cooldown)
            })
            .count();

        CircuitBreakerStats {
            total_keys: self.states.len(),
            open_keys,
            max_failures: self.config.max_failures,
            cooldown_seconds: self.config.cooldown.as_secs(),
        }
    }

    fn update_status_metric(&self, opened: bool) {
        let open_count = self
            .states
            .iter()
            .filter(|entry| entry.consecutive_failures >= self.config.max_failures)
            .count();
        gauge!("circuit_breaker_open_keys").set(open_count as f64);
        if opened {
            counter!("circuit_breaker_opened_total").increment(1);
        }
    }
}
