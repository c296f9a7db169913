// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::models::batch::BatchRecord;
use crate::domain::models::campaign::Campaign;
use crate::domain::models::pacing::ScheduledUnit;
use crate::domain::models::status::BatchProgress;
use crate::domain::repositories::batch_repository::BatchRepository;
use crate::domain::repositories::campaign_repository::{CampaignRepository, RepositoryError};
use crate::domain::services::schedule_distributor::ScheduleDistributor;

/// 批次协调器
///
/// 把大型活动的完整节奏计划拆分为批次并持久化游标。
/// 所有操作都可以重复调用，进程重启后从持久游标继续。
pub struct BatchCoordinator {
    campaigns: Arc<dyn CampaignRepository>,
    batches: Arc<dyn BatchRepository>,
    distributor: ScheduleDistributor,
}

impl BatchCoordinator {
    /// 创建新的批次协调器
    ///
    /// # 参数
    ///
    /// * `campaigns` - 活动仓库，用于读取最新的处理进度
    /// * `batches` - 批次记录仓库
    /// * `distributor` - 节奏分配器
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        batches: Arc<dyn BatchRepository>,
        distributor: ScheduleDistributor,
    ) -> Self {
        Self {
            campaigns,
            batches,
            distributor,
        }
    }

    /// 为活动创建批次计划
    ///
    /// 已存在记录时原样返回；否则为全部请求数量生成完整计划并写入预计完成时间
    ///
    /// # 参数
    ///
    /// * `campaign` - 活动
    /// * `batch_size` - 批次大小
    /// * `now` - 当前时间
    #[instrument(skip(self, campaign), fields(campaign_id = %campaign.id))]
    pub async fn create_batch_schedule(
        &self,
        campaign: &Campaign,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Result<BatchRecord, RepositoryError> {
        if let Some(existing) = self.batches.find_by_campaign(campaign.id).await? {
            debug!(
                current_batch = existing.current_batch_index,
                total_batches = existing.total_batches,
                "Batch schedule already exists"
            );
            return Ok(existing);
        }

        let requested_start = campaign.window_start.unwrap_or(now);
        let start = requested_start.max(now);
        let plan = self.distributor.distribute(
            campaign.units_requested.max(0) as usize,
            start,
            campaign.window_end,
            campaign.human_paced,
            campaign.units_completed.max(0) as usize,
        );

        // 窗口开始时间已过或窗口过窄都视为计划被约束调整
        let time_constraint_adjusted = requested_start < start || plan.crowded;
        let estimated_completion_at = plan.estimated_completion();

        let record = BatchRecord::new(
            campaign.id,
            batch_size,
            plan.units,
            estimated_completion_at,
            time_constraint_adjusted,
        );
        let stored = self.batches.insert_if_absent(&record).await?;
        self.campaigns
            .set_estimated_completion(campaign.id, stored.estimated_completion_at)
            .await?;

        info!(
            batch_size = stored.batch_size,
            total_batches = stored.total_batches,
            time_constraint_adjusted = stored.time_constraint_adjusted,
            "Batch schedule created"
        );
        Ok(stored)
    }

    /// 获取下一批未处理的提交
    ///
    /// 起点取游标位置与活动已处理数量中的较大者，终点是当前批次的边界。
    /// 游标落后于已处理数量时先把游标前移。
    ///
    /// # 返回值
    ///
    /// * `Ok(None)` - 没有批次记录或活动不存在
    /// * `Ok(Some(vec![]))` - 全部批次已处理
    /// * `Ok(Some(units))` - 按 `sequence_index` 排序的下一批提交
    pub async fn get_next_batch(
        &self,
        campaign_id: Uuid,
    ) -> Result<Option<Vec<ScheduledUnit>>, RepositoryError> {
        let Some(mut record) = self.batches.find_by_campaign(campaign_id).await? else {
            warn!(campaign_id = %campaign_id, "No batch record, nothing to hand out");
            return Ok(None);
        };
        let Some(campaign) = self.campaigns.find_by_id(campaign_id).await? else {
            warn!(campaign_id = %campaign_id, "Campaign vanished while batching");
            return Ok(None);
        };

        let batch_size = record.batch_size.max(1);
        let processed = campaign.processed_units().max(0) as usize;

        let reconciled = (processed / batch_size).min(record.total_batches);
        if reconciled > record.current_batch_index {
            self.batches.advance_cursor_to(campaign_id, reconciled).await?;
            debug!(
                campaign_id = %campaign_id,
                from = record.current_batch_index,
                to = reconciled,
                "Batch cursor reconciled with processed count"
            );
            record.current_batch_index = reconciled;
        }

        record.plan.sort_by_key(|unit| unit.sequence_index);

        let batch_start = record.current_batch_index.saturating_mul(batch_size);
        let start = batch_start.max(processed);
        let end = batch_start.saturating_add(batch_size).min(record.plan.len());
        if start >= end {
            return Ok(Some(Vec::new()));
        }

        Ok(Some(record.plan[start..end].to_vec()))
    }

    /// 完成当前批次，游标前进一位
    ///
    /// # 返回值
    ///
    /// 不存在未完成的批次记录时返回 false
    pub async fn complete_current_batch(&self, campaign_id: Uuid) -> Result<bool, RepositoryError> {
        let advanced = self.batches.advance_cursor(campaign_id).await?;
        if advanced {
            debug!(campaign_id = %campaign_id, "Batch completed");
        }
        Ok(advanced)
    }

    /// 查询批次进度
    pub async fn batch_progress(
        &self,
        campaign_id: Uuid,
    ) -> Result<Option<BatchProgress>, RepositoryError> {
        let record = self.batches.find_by_campaign(campaign_id).await?;
        Ok(record.map(|record| BatchProgress {
            current_batch: record.current_batch_index,
            total_batches: record.total_batches,
            batch_size: record.batch_size,
            estimated_completion_at: record.estimated_completion_at,
            time_constraint_adjusted: record.time_constraint_adjusted,
        }))
    }

    /// 删除活动的批次记录
    pub async fn discard(&self, campaign_id: Uuid) -> Result<(), RepositoryError> {
        self.batches.delete(campaign_id).await
    }
}
