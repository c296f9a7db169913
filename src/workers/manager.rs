// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use crate::config::settings::WorkerSettings;
use crate::domain::models::campaign::{CampaignStatus, ExecutionMode};
use crate::domain::repositories::campaign_repository::{CampaignRepository, RepositoryError};
use crate::workers::pool::{ExecutionPool, PoolState};

/// 两个池的状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    pub human_paced: PoolState,
    pub fast: PoolState,
}

/// 按需求比例计算两个池的容量
///
/// # 参数
///
/// * `total` - 并发总预算
/// * `min_human` - 人类节奏池最小容量
/// * `min_fast` - 快速池最小容量
/// * `demand_human` - 人类节奏需求
/// * `demand_fast` - 快速需求
///
/// # 返回值
///
/// 总需求为0时返回 `None`，否则返回 `(human, fast)`，两者之和等于 `total`
pub fn compute_allocation(
    total: usize,
    min_human: usize,
    min_fast: usize,
    demand_human: usize,
    demand_fast: usize,
) -> Option<(usize, usize)> {
    let demand_total = demand_human + demand_fast;
    if demand_total == 0 {
        return None;
    }

    let share = total as f64 * demand_human as f64 / demand_total as f64;
    let upper = total.saturating_sub(min_fast).max(min_human);
    let human = (share.round() as usize).clamp(min_human, upper).min(total);
    Some((human, total - human))
}

/// 初始分配：先满足两个最小值，剩余部分平分
pub fn initial_allocation(settings: &WorkerSettings) -> (usize, usize) {
    let spare = settings
        .total_budget
        .saturating_sub(settings.min_human_paced + settings.min_fast);
    let human = (settings.min_human_paced + spare / 2).min(settings.total_budget);
    (human, settings.total_budget - human)
}

/// 工作池管理器
///
/// 持有人类节奏与快速两个执行池，按观测到的需求周期性地重新分配并发预算。
/// 派发循环通过 `get_executor` 取得对应的池。
pub struct WorkerPoolManager {
    human_paced: Arc<ExecutionPool>,
    fast: Arc<ExecutionPool>,
    repository: Arc<dyn CampaignRepository>,
    settings: WorkerSettings,
}

impl WorkerPoolManager {
    /// 创建新的工作池管理器
    ///
    /// # 参数
    ///
    /// * `settings` - 工作池配置
    /// * `repository` - 活动仓库，用于统计需求
    pub fn new(settings: WorkerSettings, repository: Arc<dyn CampaignRepository>) -> Self {
        let (human, fast) = initial_allocation(&settings);
        info!(
            total = settings.total_budget,
            human_paced = human,
            fast = fast,
            "Worker pools initialized"
        );

        Self {
            human_paced: Arc::new(ExecutionPool::new(
                ExecutionMode::HumanPaced,
                human,
                settings.total_budget,
            )),
            fast: Arc::new(ExecutionPool::new(
                ExecutionMode::Fast,
                fast,
                settings.total_budget,
            )),
            repository,
            settings,
        }
    }

    /// 获取活动对应的执行池
    pub fn get_executor(&self, human_paced: bool) -> Arc<ExecutionPool> {
        if human_paced {
            self.human_paced.clone()
        } else {
            self.fast.clone()
        }
    }

    /// 任一池是否还有空闲槽位
    pub fn has_capacity(&self) -> bool {
        self.human_paced.has_capacity() || self.fast.has_capacity()
    }

    /// 两个池的容量之和
    pub fn pool_size(&self) -> usize {
        self.human_paced.size() + self.fast.size()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            human_paced: self.human_paced.state(),
            fast: self.fast.state(),
        }
    }

    async fn demand(&self, human_paced: bool) -> Result<usize, RepositoryError> {
        let queued = self
            .repository
            .count_by_status_and_mode(CampaignStatus::Queued, human_paced)
            .await?;
        let in_progress = self
            .repository
            .count_by_status_and_mode(CampaignStatus::InProgress, human_paced)
            .await?;
        let pending = self.get_executor(human_paced).pending() as u64;
        Ok((queued + in_progress + pending) as usize)
    }

    /// 再平衡两个池
    ///
    /// # 返回值
    ///
    /// 总需求为0时返回 `Ok(None)` 且不改变池容量，否则返回新的 `(human, fast)`
    #[instrument(skip(self))]
    pub async fn rebalance(&self) -> Result<Option<(usize, usize)>, RepositoryError> {
        let demand_human = self.demand(true).await?;
        let demand_fast = self.demand(false).await?;

        let Some((human, fast)) = compute_allocation(
            self.settings.total_budget,
            self.settings.min_human_paced,
            self.settings.min_fast,
            demand_human,
            demand_fast,
        ) else {
            debug!("No demand observed, pools left unchanged");
            return Ok(None);
        };

        for (pool, size) in [(&self.human_paced, human), (&self.fast, fast)] {
            if pool.size() == size {
                continue;
            }
            match pool.resize(size) {
                Ok(()) => info!(mode = %pool.mode(), size, "Pool resized"),
                Err(e) => error!(mode = %pool.mode(), "Failed to resize pool: {}", e),
            }
        }

        debug!(demand_human, demand_fast, human, fast, "Rebalance complete");
        Ok(Some((human, fast)))
    }
}
