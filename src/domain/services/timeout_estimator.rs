// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::time::Duration;

use crate::config::settings::{BatchingSettings, TimeoutSettings};

/// 超时估算器
///
/// 根据负载参数计算单个提交与批次的超时，以及分批阈值和批次大小。
/// 全部为确定性的纯计算。
#[derive(Debug, Clone)]
pub struct TimeoutEstimator {
    timeouts: TimeoutSettings,
    batching: BatchingSettings,
}

impl TimeoutEstimator {
    pub fn new(timeouts: TimeoutSettings, batching: BatchingSettings) -> Self {
        Self { timeouts, batching }
    }

    /// 单个提交的超时（秒）
    ///
    /// 基础超时 + 每个排队位置的等待，封顶于配置上限。
    pub fn unit_timeout(
        &self,
        _total_units_in_run: usize,
        backlog_size: usize,
        pool_size: usize,
    ) -> u64 {
        let positions = (backlog_size / pool_size.max(1)) as u64;
        let timeout = self.timeouts.base_unit_secs
            + positions.saturating_mul(self.timeouts.per_position_wait_secs);
        timeout.min(self.timeouts.max_unit_secs)
    }

    /// 单个提交的超时
    pub fn unit_timeout_duration(
        &self,
        total_units_in_run: usize,
        backlog_size: usize,
        pool_size: usize,
    ) -> Duration {
        Duration::from_secs(self.unit_timeout(total_units_in_run, backlog_size, pool_size))
    }

    /// 批次超时（秒），与单个提交超时分别封顶
    pub fn batch_timeout(&self, batch_size: usize, _total_batches: usize) -> u64 {
        let timeout = (batch_size as u64)
            .saturating_mul(self.timeouts.base_unit_secs)
            .saturating_add(self.timeouts.batch_buffer_secs);
        timeout.min(self.timeouts.max_batch_secs)
    }

    /// 最优批次大小：clamp(min(容量/2, 总数/4), 最小值, 最大值)
    pub fn optimal_batch_size(&self, total_units: usize, queue_capacity: usize) -> usize {
        if queue_capacity == 0 {
            return self
                .batching
                .default_size
                .clamp(self.batching.min_size, self.batching.max_size);
        }
        (queue_capacity / 2)
            .min(total_units / 4)
            .clamp(self.batching.min_size, self.batching.max_size)
    }

    /// 是否需要分批：总数超过容量的一半
    pub fn needs_batching(&self, total_units: usize, queue_capacity: usize) -> bool {
        total_units > queue_capacity / 2
    }

    pub fn queue_capacity(&self) -> usize {
        self.batching.queue_capacity
    }
}
