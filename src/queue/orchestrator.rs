// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::Utc;
use metrics::{counter, gauge};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::settings::{SchedulerSettings, Settings};
use crate::domain::models::campaign::{Campaign, CampaignRequest, CampaignStatus};
use crate::domain::models::status::{BatchProgress, QueueStatus};
use crate::domain::repositories::batch_repository::BatchRepository;
use crate::domain::repositories::campaign_repository::{
    CampaignRepository, RepositoryError, RequeueRequest,
};
use crate::domain::services::priority;
use crate::domain::services::schedule_distributor::ScheduleDistributor;
use crate::domain::services::timeout_estimator::TimeoutEstimator;
use crate::engines::circuit_breaker::{CircuitBreaker, CircuitBreakerStats, CircuitConfig};
use crate::engines::traits::{FormExecutor, RowSource};
use crate::queue::batch_coordinator::BatchCoordinator;
use crate::utils::errors::WorkerError;
use crate::utils::retry_policy::RetryPolicy;
use crate::workers::campaign_worker::{CampaignWorker, RunContext};
use crate::workers::manager::WorkerPoolManager;

/// 编排器错误类型
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// 队列已满
    #[error("Queue is full (max {max})")]
    QueueFull { max: u64 },
    /// 请求校验失败
    #[error("Validation error: {0}")]
    Validation(String),
    /// 活动正在执行
    #[error("Campaign is in progress")]
    InProgress,
    /// 活动不存在
    #[error("Campaign not found")]
    NotFound,
    /// 仓库错误
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// 一次派发启动的运行
#[derive(Debug)]
pub struct DispatchedRun {
    pub campaign_id: Uuid,
    pub handle: JoinHandle<()>,
}

/// 队列编排器
///
/// 负责准入、持久队列、派发、优先级老化、失败后的重试策略以及删除和恢复。
/// 所有修改队列位置的操作都在 `queue_lock` 内串行执行，保证位置从1开始连续。
pub struct QueueOrchestrator {
    campaigns: Arc<dyn CampaignRepository>,
    coordinator: Arc<BatchCoordinator>,
    pools: Arc<WorkerPoolManager>,
    worker: Arc<CampaignWorker>,
    breaker: CircuitBreaker,
    estimator: TimeoutEstimator,
    settings: SchedulerSettings,
    retry: RetryPolicy,
    queue_lock: Mutex<()>,
}

impl QueueOrchestrator {
    /// 创建新的队列编排器
    ///
    /// # 参数
    ///
    /// * `settings` - 应用配置
    /// * `campaigns` - 活动仓库
    /// * `batches` - 批次记录仓库
    /// * `pools` - 工作池管理器，与再平衡任务共享
    /// * `executor` - 表单执行器
    /// * `rows` - 行数据源
    pub fn new(
        settings: &Settings,
        campaigns: Arc<dyn CampaignRepository>,
        batches: Arc<dyn BatchRepository>,
        pools: Arc<WorkerPoolManager>,
        executor: Arc<dyn FormExecutor>,
        rows: Arc<dyn RowSource>,
    ) -> Self {
        let distributor = ScheduleDistributor::new(settings.pacing.clone());
        let estimator = TimeoutEstimator::new(settings.timeouts.clone(), settings.batching.clone());
        let breaker = CircuitBreaker::new(CircuitConfig::from(&settings.circuit_breaker));
        let retry = RetryPolicy::from(&settings.scheduler);
        let coordinator = Arc::new(BatchCoordinator::new(
            campaigns.clone(),
            batches,
            distributor.clone(),
        ));
        let worker = Arc::new(CampaignWorker::new(
            campaigns.clone(),
            coordinator.clone(),
            distributor,
            estimator.clone(),
            breaker.clone(),
            executor,
            rows,
            retry.clone(),
        ));

        Self {
            campaigns,
            coordinator,
            pools,
            worker,
            breaker,
            estimator,
            settings: settings.scheduler.clone(),
            retry,
            queue_lock: Mutex::new(()),
        }
    }

    pub fn pools(&self) -> &Arc<WorkerPoolManager> {
        &self.pools
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// 校验请求并加入队列
    ///
    /// # 参数
    ///
    /// * `request` - 活动创建请求
    ///
    /// # 返回值
    ///
    /// * `Ok(Campaign)` - 已入队的活动
    /// * `Err(OrchestratorError)` - 校验失败、队列已满或存储错误
    pub async fn enqueue(&self, request: CampaignRequest) -> Result<Campaign, OrchestratorError> {
        request
            .validate()
            .map_err(|e| OrchestratorError::Validation(e.to_string()))?;
        let campaign = Campaign::new(request, self.settings.default_max_retries);
        self.add_to_queue(&campaign).await
    }

    /// 以队尾位置加入队列
    #[instrument(skip(self, campaign), fields(campaign_id = %campaign.id))]
    pub async fn add_to_queue(&self, campaign: &Campaign) -> Result<Campaign, OrchestratorError> {
        let _guard = self.queue_lock.lock().await;

        self.ensure_queue_space().await?;
        let queued = self.campaigns.insert_queued(campaign, Utc::now()).await?;

        counter!("campaigns_enqueued_total").increment(1);
        info!(
            position = queued.queue_position,
            units = queued.units_requested,
            human_paced = queued.human_paced,
            "Campaign enqueued"
        );
        Ok(queued)
    }

    async fn ensure_queue_space(&self) -> Result<(), OrchestratorError> {
        let queued = self.campaigns.count_by_status(CampaignStatus::Queued).await?;
        if queued >= self.settings.max_queue_size {
            warn!(queued, max = self.settings.max_queue_size, "Queue is full");
            return Err(OrchestratorError::QueueFull {
                max: self.settings.max_queue_size,
            });
        }
        Ok(())
    }

    /// 派发一轮
    ///
    /// 按 (priority desc, position asc) 读取排队活动，快速活动优先于人类节奏活动，
    /// 跳过窗口未开始的活动，在对应池有空位时启动执行。
    ///
    /// # 返回值
    ///
    /// 本轮启动的运行
    #[instrument(skip(self))]
    pub async fn dispatch_tick(self: &Arc<Self>) -> Result<Vec<DispatchedRun>, OrchestratorError> {
        if !self.pools.has_capacity() {
            debug!("No spare capacity, dispatch skipped");
            return Ok(Vec::new());
        }

        let _guard = self.queue_lock.lock().await;
        let now = Utc::now();
        let queued = self.campaigns.find_queued_ordered().await?;
        let backlog = queued.len();
        gauge!("campaigns_queued").set(backlog as f64);

        let (fast, human_paced): (Vec<Campaign>, Vec<Campaign>) =
            queued.into_iter().partition(|campaign| !campaign.human_paced);

        let mut dispatched = Vec::new();
        let mut pending_fast = 0;
        let mut pending_human = 0;

        for mut campaign in fast.into_iter().chain(human_paced) {
            if !campaign.is_eligible_at(now) {
                continue;
            }

            let pool = self.pools.get_executor(campaign.human_paced);
            let Some(slot) = pool.try_acquire() else {
                if campaign.human_paced {
                    pending_human += 1;
                } else {
                    pending_fast += 1;
                }
                continue;
            };

            if !self.campaigns.start_campaign(campaign.id, now).await? {
                debug!(campaign_id = %campaign.id, "Campaign no longer queued");
                continue;
            }
            campaign.status = CampaignStatus::InProgress;
            campaign.queue_position = None;

            let total = campaign.units_requested.max(0) as usize;
            let capacity = self.estimator.queue_capacity();
            let batch_size = self
                .estimator
                .needs_batching(total, capacity)
                .then(|| self.estimator.optimal_batch_size(total, capacity));
            let ctx = RunContext {
                backlog,
                pool_size: pool.size(),
                batch_size,
            };

            info!(
                campaign_id = %campaign.id,
                mode = %campaign.mode(),
                priority = campaign.priority,
                batch_size = ?batch_size,
                "Campaign dispatched"
            );
            counter!("campaigns_dispatched_total", "mode" => campaign.mode().as_str())
                .increment(1);

            let campaign_id = campaign.id;
            let this = Arc::clone(self);
            let handle = pool.spawn(slot, async move {
                this.execute(campaign, ctx).await;
            });
            dispatched.push(DispatchedRun {
                campaign_id,
                handle,
            });
        }

        self.pools.get_executor(false).set_pending(pending_fast);
        self.pools.get_executor(true).set_pending(pending_human);

        Ok(dispatched)
    }

    async fn execute(&self, campaign: Campaign, ctx: RunContext) {
        match self.worker.run(&campaign, ctx).await {
            Ok(summary) => debug!(campaign_id = %campaign.id, ?summary, "Run finished"),
            Err(e) => {
                warn!(campaign_id = %campaign.id, "Campaign run failed: {}", e);
                if let Err(e) = self.handle_failure(&campaign, &e).await {
                    error!(
                        campaign_id = %campaign.id,
                        "Failed to apply retry policy: {}", e
                    );
                }
            }
        }
    }

    /// 活动级失败后的重试策略
    ///
    /// 不可重试的错误直接失败且不消耗重试次数；否则重试次数加一，
    /// 达到上限即终止，未达上限则回到队尾。队列已满时保持可重试的失败状态。
    #[instrument(skip(self, campaign, error), fields(campaign_id = %campaign.id))]
    pub async fn handle_failure(
        &self,
        campaign: &Campaign,
        error: &WorkerError,
    ) -> Result<(), OrchestratorError> {
        let Some(current) = self.campaigns.find_by_id(campaign.id).await? else {
            return Ok(());
        };
        if current.status != CampaignStatus::InProgress {
            debug!(status = %current.status, "Failure already handled");
            return Ok(());
        }

        let id = current.id;
        let retry_count = current.retry_count;
        let now = Utc::now();

        if !error.is_retryable() {
            self.retry
                .run("mark_failed", move || {
                    self.campaigns.mark_failed(id, retry_count, retry_count, now)
                })
                .await?;
            counter!("campaigns_failed_total", "reason" => "permanent").increment(1);
            error!(retry_count, "Campaign failed permanently: {}", error);
            return Ok(());
        }

        let next = (retry_count + 1).min(current.max_retries);
        if retry_count + 1 >= current.max_retries {
            self.retry
                .run("mark_failed", move || {
                    self.campaigns.mark_failed(id, retry_count, next, now)
                })
                .await?;
            counter!("campaigns_failed_total", "reason" => "retries_exhausted").increment(1);
            error!(retry_count = next, max_retries = current.max_retries, "Campaign failed");
            return Ok(());
        }

        let _guard = self.queue_lock.lock().await;
        if self.ensure_queue_space().await.is_err() {
            self.retry
                .run("mark_failed", move || {
                    self.campaigns.mark_failed(id, retry_count, next, now)
                })
                .await?;
            warn!(retry_count = next, "Queue full, campaign left failed but retryable");
            return Ok(());
        }

        let request = RequeueRequest {
            id,
            expected_status: CampaignStatus::InProgress,
            expected_retry_count: retry_count,
            retry_count: next,
            priority: priority::score(current.created_at, now),
            now,
        };
        let requeued = self
            .retry
            .run("requeue", move || self.campaigns.requeue(request))
            .await?;
        if requeued {
            counter!("campaigns_requeued_total").increment(1);
            info!(retry_count = next, "Campaign re-queued after failure");
        }
        Ok(())
    }

    /// 重新计算所有排队活动的优先级，仅写入变化的值
    ///
    /// # 返回值
    ///
    /// 被更新的活动数量
    #[instrument(skip(self))]
    pub async fn age_priorities(&self) -> Result<usize, OrchestratorError> {
        let now = Utc::now();
        let queued = self.campaigns.find_by_status(CampaignStatus::Queued).await?;

        let mut updated = 0;
        for campaign in queued {
            let score = priority::score(campaign.created_at, now);
            if score != campaign.priority && self.campaigns.update_priority(campaign.id, score).await? {
                updated += 1;
            }
        }

        if updated > 0 {
            debug!(updated, "Priorities aged");
        }
        Ok(updated)
    }

    /// 再平衡工作池
    pub async fn rebalance_pools(&self) -> Result<Option<(usize, usize)>, OrchestratorError> {
        Ok(self.pools.rebalance().await?)
    }

    /// 队列状态快照
    pub async fn queue_status(&self) -> Result<QueueStatus, OrchestratorError> {
        let queued_count = self.campaigns.count_by_status(CampaignStatus::Queued).await?;
        let active_count = self
            .campaigns
            .count_by_status(CampaignStatus::InProgress)
            .await?;

        Ok(QueueStatus {
            queued_count,
            active_count,
            max_queue_size: self.settings.max_queue_size,
            pool_size: self.pools.pool_size(),
            has_capacity: self.pools.has_capacity(),
        })
    }

    /// 批次进度，未分批的活动返回 `None`
    pub async fn batch_progress(
        &self,
        campaign_id: Uuid,
    ) -> Result<Option<BatchProgress>, OrchestratorError> {
        Ok(self.coordinator.batch_progress(campaign_id).await?)
    }

    /// 重新接纳可重试的失败活动
    ///
    /// # 返回值
    ///
    /// 重新入队的活动数量
    #[instrument(skip(self))]
    pub async fn retry_failed_campaigns(&self) -> Result<usize, OrchestratorError> {
        let _guard = self.queue_lock.lock().await;
        let failed = self.campaigns.find_by_status(CampaignStatus::Failed).await?;

        let mut requeued = 0;
        for campaign in failed.into_iter().filter(Campaign::can_retry) {
            if self.ensure_queue_space().await.is_err() {
                break;
            }
            let now = Utc::now();
            let request = RequeueRequest {
                id: campaign.id,
                expected_status: CampaignStatus::Failed,
                expected_retry_count: campaign.retry_count,
                retry_count: campaign.retry_count,
                priority: priority::score(campaign.created_at, now),
                now,
            };
            if self.campaigns.requeue(request).await? {
                requeued += 1;
            }
        }

        if requeued > 0 {
            info!(requeued, "Failed campaigns re-admitted");
        }
        Ok(requeued)
    }

    /// 熔断统计
    pub fn circuit_breaker_stats(&self) -> CircuitBreakerStats {
        self.breaker.stats()
    }

    /// 删除排队中或已终止的活动及其批次记录
    #[instrument(skip(self))]
    pub async fn delete_campaign(&self, id: Uuid) -> Result<(), OrchestratorError> {
        let _guard = self.queue_lock.lock().await;

        let campaign = self
            .campaigns
            .find_by_id(id)
            .await?
            .ok_or(OrchestratorError::NotFound)?;
        if campaign.status == CampaignStatus::InProgress {
            return Err(OrchestratorError::InProgress);
        }

        if !self.campaigns.delete_idle(id).await? {
            return Err(OrchestratorError::InProgress);
        }
        self.coordinator.discard(id).await?;

        info!(status = %campaign.status, "Campaign deleted");
        Ok(())
    }

    /// 启动时把上一个进程遗留的执行中活动放回队尾，重试次数不变
    ///
    /// # 返回值
    ///
    /// 恢复的活动数量
    #[instrument(skip(self))]
    pub async fn recover_interrupted(&self) -> Result<usize, OrchestratorError> {
        let _guard = self.queue_lock.lock().await;
        let interrupted = self
            .campaigns
            .find_by_status(CampaignStatus::InProgress)
            .await?;

        let mut recovered = 0;
        for campaign in interrupted {
            let now = Utc::now();
            let request = RequeueRequest {
                id: campaign.id,
                expected_status: CampaignStatus::InProgress,
                expected_retry_count: campaign.retry_count,
                retry_count: campaign.retry_count,
                priority: priority::score(campaign.created_at, now),
                now,
            };
            if self.campaigns.requeue(request).await? {
                recovered += 1;
            }
        }

        if recovered > 0 {
            info!(recovered, "Interrupted campaigns re-queued");
        }
        Ok(recovered)
    }
}
