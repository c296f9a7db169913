// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::pacing::ScheduledUnit;

/// 批次记录
///
/// 大型活动节奏计划的持久化分解。`current_batch_index` 只增不减，
/// 是进程重启后恢复执行的唯一持久游标。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    pub campaign_id: Uuid,
    pub batch_size: usize,
    pub current_batch_index: usize,
    pub total_batches: usize,
    /// 完整节奏计划
    pub plan: Vec<ScheduledUnit>,
    pub estimated_completion_at: Option<DateTime<Utc>>,
    /// 计划是否因时间窗口约束被压缩
    pub time_constraint_adjusted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BatchRecord {
    pub fn new(
        campaign_id: Uuid,
        batch_size: usize,
        plan: Vec<ScheduledUnit>,
        estimated_completion_at: Option<DateTime<Utc>>,
        time_constraint_adjusted: bool,
    ) -> Self {
        let now = Utc::now();
        let batch_size = batch_size.max(1);
        Self {
            campaign_id,
            batch_size,
            current_batch_index: 0,
            total_batches: plan.len().div_ceil(batch_size),
            plan,
            estimated_completion_at,
            time_constraint_adjusted,
            created_at: now,
            updated_at: now,
        }
    }

    /// 游标是否已越过最后一个批次
    pub fn is_finished(&self) -> bool {
        self.current_batch_index >= self.total_batches
    }
}
