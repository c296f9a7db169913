// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::campaign::{Campaign, CampaignStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DbErr;
use thiserror::Error;
use uuid::Uuid;

/// 仓库错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// 数据库错误
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    /// 持久化数据无法解析
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// 单个提交的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    Completed,
    Failed,
}

/// 重新入队的条件更新参数
///
/// 只有当前状态与重试次数都与期望值一致时才会生效
#[derive(Debug, Clone, Copy)]
pub struct RequeueRequest {
    pub id: Uuid,
    pub expected_status: CampaignStatus,
    pub expected_retry_count: i32,
    pub retry_count: i32,
    pub priority: i32,
    pub now: DateTime<Utc>,
}

/// 活动仓库特质
///
/// 所有状态与计数器变更都是带条件的原子更新，返回值表示是否命中
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    /// 以队尾位置插入新活动（位置 = 当前最大位置 + 1）
    async fn insert_queued(
        &self,
        campaign: &Campaign,
        now: DateTime<Utc>,
    ) -> Result<Campaign, RepositoryError>;
    /// 根据ID查找活动
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Campaign>, RepositoryError>;
    /// 按 (priority desc, queue_position asc) 返回全部排队活动
    async fn find_queued_ordered(&self) -> Result<Vec<Campaign>, RepositoryError>;
    /// 按状态查找活动
    async fn find_by_status(&self, status: CampaignStatus)
        -> Result<Vec<Campaign>, RepositoryError>;
    /// 按状态计数
    async fn count_by_status(&self, status: CampaignStatus) -> Result<u64, RepositoryError>;
    /// 按状态与执行模式计数
    async fn count_by_status_and_mode(
        &self,
        status: CampaignStatus,
        human_paced: bool,
    ) -> Result<u64, RepositoryError>;
    /// Queued → InProgress，清空位置并把其后的活动前移一位
    async fn start_campaign(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, RepositoryError>;
    /// 在计数器未达上限时原子地记录一个提交结果
    async fn record_unit_outcome(
        &self,
        id: Uuid,
        outcome: UnitOutcome,
    ) -> Result<bool, RepositoryError>;
    /// InProgress → Completed
    async fn mark_completed(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, RepositoryError>;
    /// InProgress → Failed，写入新的重试次数
    async fn mark_failed(
        &self,
        id: Uuid,
        expected_retry_count: i32,
        retry_count: i32,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
    /// 重新入队到队尾
    async fn requeue(&self, request: RequeueRequest) -> Result<bool, RepositoryError>;
    /// 仅在排队且数值变化时更新优先级
    async fn update_priority(&self, id: Uuid, priority: i32) -> Result<bool, RepositoryError>;
    /// 写入预计完成时间
    async fn set_estimated_completion(
        &self,
        id: Uuid,
        at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError>;
    /// 删除非执行中的活动并补齐队列位置空洞
    async fn delete_idle(&self, id: Uuid) -> Result<bool, RepositoryError>;
}
