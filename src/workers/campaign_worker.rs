// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::Utc;
use metrics::counter;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::models::campaign::Campaign;
use crate::domain::models::pacing::ScheduledUnit;
use crate::domain::repositories::campaign_repository::{CampaignRepository, UnitOutcome};
use crate::domain::services::schedule_distributor::ScheduleDistributor;
use crate::domain::services::timeout_estimator::TimeoutEstimator;
use crate::engines::circuit_breaker::CircuitBreaker;
use crate::engines::traits::{ExecutionError, FormExecutor, RowSource, UnitData};
use crate::queue::batch_coordinator::BatchCoordinator;
use crate::utils::errors::WorkerError;
use crate::utils::retry_policy::RetryPolicy;

/// 一次运行的派发上下文
#[derive(Debug, Clone, Copy)]
pub struct RunContext {
    /// 派发时排队中的活动数量
    pub backlog: usize,
    /// 所在池的容量
    pub pool_size: usize,
    /// 需要分批时的批次大小
    pub batch_size: Option<usize>,
}

/// 一次运行的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// 调用执行器的次数
    pub executed: usize,
    /// 执行成功的次数
    pub succeeded: usize,
    /// 因熔断跳过的次数
    pub skipped: usize,
    /// 执行失败或超时的次数
    pub failed: usize,
}

impl RunSummary {
    fn absorb(&mut self, other: RunSummary) {
        self.executed += other.executed;
        self.succeeded += other.succeeded;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// 活动工作器
///
/// 执行一个已进入 InProgress 的活动：读取行数据，按节奏计划逐个提交，
/// 大型活动按持久游标逐批执行。所有提交处理完后把活动标记为完成；
/// 其余情况返回错误，由编排器决定重试或失败。
pub struct CampaignWorker {
    campaigns: Arc<dyn CampaignRepository>,
    coordinator: Arc<BatchCoordinator>,
    distributor: ScheduleDistributor,
    estimator: TimeoutEstimator,
    breaker: CircuitBreaker,
    executor: Arc<dyn FormExecutor>,
    rows: Arc<dyn RowSource>,
    progress_retry: RetryPolicy,
}

impl CampaignWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        coordinator: Arc<BatchCoordinator>,
        distributor: ScheduleDistributor,
        estimator: TimeoutEstimator,
        breaker: CircuitBreaker,
        executor: Arc<dyn FormExecutor>,
        rows: Arc<dyn RowSource>,
        progress_retry: RetryPolicy,
    ) -> Self {
        Self {
            campaigns,
            coordinator,
            distributor,
            estimator,
            breaker,
            executor,
            rows,
            progress_retry,
        }
    }

    /// 执行活动
    ///
    /// # 参数
    ///
    /// * `campaign` - 已处于 InProgress 状态的活动
    /// * `ctx` - 派发上下文
    ///
    /// # 返回值
    ///
    /// * `Ok(RunSummary)` - 所有提交已处理且活动已标记完成
    /// * `Err(WorkerError)` - 活动级失败
    #[instrument(skip(self, campaign, ctx), fields(campaign_id = %campaign.id, mode = %campaign.mode()))]
    pub async fn run(&self, campaign: &Campaign, ctx: RunContext) -> Result<RunSummary, WorkerError> {
        info!(
            executor = self.executor.name(),
            requested = campaign.units_requested,
            processed = campaign.processed_units(),
            batched = ctx.batch_size.is_some(),
            "Campaign run started"
        );

        let rows = self.rows.fetch_rows(campaign).await?;

        let summary = match ctx.batch_size {
            Some(batch_size) => self.run_batched(campaign, &rows, batch_size, ctx).await?,
            None => self.run_whole(campaign, &rows, ctx).await?,
        };

        let fresh = self
            .campaigns
            .find_by_id(campaign.id)
            .await?
            .ok_or_else(|| WorkerError::NotFound(campaign.id.to_string()))?;

        if !fresh.is_fully_processed() {
            return Err(WorkerError::Incomplete {
                processed: fresh.processed_units(),
                requested: fresh.units_requested,
            });
        }

        let completed = self
            .progress_retry
            .run("mark_completed", move || {
                self.campaigns.mark_completed(campaign.id, Utc::now())
            })
            .await?;
        if completed {
            counter!("campaigns_completed_total").increment(1);
            info!(
                units_completed = fresh.units_completed,
                units_failed = fresh.units_failed,
                skipped = summary.skipped,
                "Campaign completed"
            );
        } else {
            warn!("Campaign was no longer in progress when completing");
        }

        Ok(summary)
    }

    /// 不分批：为剩余提交生成计划并一次执行
    async fn run_whole(
        &self,
        campaign: &Campaign,
        rows: &[Value],
        ctx: RunContext,
    ) -> Result<RunSummary, WorkerError> {
        let now = Utc::now();
        let start = campaign.window_start.unwrap_or(now).max(now);
        let remaining = campaign.remaining_units().max(0) as usize;
        let plan = self.distributor.distribute(
            remaining,
            start,
            campaign.window_end,
            campaign.human_paced,
            campaign.units_completed.max(0) as usize,
        );
        self.campaigns
            .set_estimated_completion(campaign.id, plan.estimated_completion())
            .await?;

        // 已处理的提交占用了前面的行，剩余计划从其后继续
        let row_base = campaign.processed_units().max(0) as usize;
        let unit_timeout = self
            .estimator
            .unit_timeout_duration(plan.len(), ctx.backlog, ctx.pool_size);

        self.run_units(campaign, &plan.units, rows, row_base, unit_timeout, None)
            .await
    }

    /// 分批：循环读取持久游标处的批次，直到没有剩余提交
    async fn run_batched(
        &self,
        campaign: &Campaign,
        rows: &[Value],
        batch_size: usize,
        ctx: RunContext,
    ) -> Result<RunSummary, WorkerError> {
        let record = self
            .coordinator
            .create_batch_schedule(campaign, batch_size, Utc::now())
            .await?;
        let total_batches = record.total_batches;
        let unit_timeout = self
            .estimator
            .unit_timeout_duration(record.batch_size, ctx.backlog, ctx.pool_size);

        let mut summary = RunSummary::default();
        loop {
            let Some(batch) = self.coordinator.get_next_batch(campaign.id).await? else {
                return Err(WorkerError::NotFound(format!(
                    "batch record for campaign {}",
                    campaign.id
                )));
            };
            if batch.is_empty() {
                break;
            }

            let allowance = self.batch_allowance(&batch, record.batch_size, total_batches);
            let deadline = (Instant::now() + allowance, allowance);
            debug!(
                first_index = batch[0].sequence_index,
                units = batch.len(),
                "Running batch"
            );

            let batch_summary = self
                .run_units(campaign, &batch, rows, 0, unit_timeout, Some(deadline))
                .await?;
            summary.absorb(batch_summary);

            self.coordinator.complete_current_batch(campaign.id).await?;
        }

        // 游标已走完但有进度报告丢失时，按已处理数量补跑计划尾部
        let processed = self
            .campaigns
            .find_by_id(campaign.id)
            .await?
            .map_or(0, |fresh| fresh.processed_units().max(0) as usize);
        let mut plan = record.plan;
        plan.sort_by_key(|unit| unit.sequence_index);
        if processed < plan.len() {
            let tail = plan.split_off(processed);
            warn!(
                processed,
                planned = plan.len() + tail.len(),
                "Batch cursor exhausted with unreported units, running plan tail"
            );
            let allowance = self.batch_allowance(&tail, record.batch_size, total_batches);
            let deadline = (Instant::now() + allowance, allowance);
            let tail_summary = self
                .run_units(campaign, &tail, rows, 0, unit_timeout, Some(deadline))
                .await?;
            summary.absorb(tail_summary);
        }

        Ok(summary)
    }

    /// 批次允许时长：等待到最后一个提交的计划时间，加上全部延迟和批次超时
    fn batch_allowance(
        &self,
        batch: &[ScheduledUnit],
        batch_size: usize,
        total_batches: usize,
    ) -> Duration {
        let now = Utc::now();
        let wait = batch
            .iter()
            .map(|unit| unit.execution_time)
            .max()
            .and_then(|last| (last - now).to_std().ok())
            .unwrap_or_default();
        let delays: u64 = batch.iter().map(|unit| unit.delay_seconds).sum();
        wait + Duration::from_secs(delays)
            + Duration::from_secs(self.estimator.batch_timeout(batch_size, total_batches))
    }

    /// 按 `sequence_index` 顺序执行提交
    ///
    /// 截止时间只在提交之间检查，不会中断执行中的提交
    async fn run_units(
        &self,
        campaign: &Campaign,
        units: &[ScheduledUnit],
        rows: &[Value],
        row_base: usize,
        unit_timeout: Duration,
        deadline: Option<(Instant, Duration)>,
    ) -> Result<RunSummary, WorkerError> {
        let mut ordered: Vec<&ScheduledUnit> = units.iter().collect();
        ordered.sort_by_key(|unit| unit.sequence_index);

        let mut summary = RunSummary::default();
        for unit in ordered {
            if let Some((deadline, allowance)) = deadline {
                if Instant::now() >= deadline {
                    warn!(sequence_index = unit.sequence_index, "Batch deadline exceeded");
                    return Err(WorkerError::BatchTimeout(allowance));
                }
            }

            if let Ok(wait) = (unit.execution_time - Utc::now()).to_std() {
                tokio::time::sleep(wait).await;
            }
            if unit.delay_seconds > 0 {
                tokio::time::sleep(Duration::from_secs(unit.delay_seconds)).await;
            }

            let key = campaign.form_url.as_str();
            if self.breaker.is_open(key) {
                debug!(sequence_index = unit.sequence_index, "Circuit open, unit skipped");
                counter!("units_skipped_total").increment(1);
                summary.skipped += 1;
                self.record_outcome(campaign, UnitOutcome::Failed).await;
                continue;
            }

            let row_offset = row_base + unit.sequence_index;
            let data = UnitData {
                sequence_index: unit.sequence_index,
                row_offset,
                row: row_at(rows, row_offset),
            };

            summary.executed += 1;
            let execution = self.executor.execute(campaign, &data, unit_timeout);
            let result = match tokio::time::timeout(unit_timeout, execution).await {
                Ok(result) => result,
                Err(_) => Err(ExecutionError::Timeout(unit_timeout)),
            };

            match result {
                Ok(()) => {
                    self.breaker.record_success(key);
                    counter!("units_completed_total").increment(1);
                    summary.succeeded += 1;
                    self.record_outcome(campaign, UnitOutcome::Completed).await;
                }
                Err(e) => {
                    self.breaker.record_failure(key);
                    counter!("units_failed_total").increment(1);
                    summary.failed += 1;
                    self.record_outcome(campaign, UnitOutcome::Failed).await;

                    if !e.is_retryable() {
                        error!(
                            sequence_index = unit.sequence_index,
                            "Permanent unit failure: {}", e
                        );
                        return Err(e.into());
                    }
                    warn!(sequence_index = unit.sequence_index, "Unit failed: {}", e);
                }
            }
        }

        Ok(summary)
    }

    /// 记录提交结果；存储竞争时有限重试，耗尽后只记录日志
    async fn record_outcome(&self, campaign: &Campaign, outcome: UnitOutcome) {
        let result = self
            .progress_retry
            .run("record_unit_outcome", move || {
                self.campaigns.record_unit_outcome(campaign.id, outcome)
            })
            .await;

        match result {
            Ok(true) => {}
            Ok(false) => debug!(?outcome, "Counters already at the requested total"),
            Err(e) => error!(?outcome, "Dropping progress report: {}", e),
        }
    }
}

/// 行偏移超过行数时循环复用，没有行数据时为 Null
fn row_at(rows: &[Value], offset: usize) -> Value {
    if rows.is_empty() {
        Value::Null
    } else {
        rows[offset % rows.len()].clone()
    }
}
