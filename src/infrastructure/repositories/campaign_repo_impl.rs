// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::models::campaign::{Campaign, CampaignStatus};
use crate::domain::repositories::campaign_repository::{
    CampaignRepository, RepositoryError, RequeueRequest, UnitOutcome,
};
use crate::infrastructure::database::entities::campaign as campaign_entity;

/// 活动仓库实现
///
/// 基于SeaORM实现。计数器与状态变更全部使用带条件的 `UPDATE`，
/// 队列位置的移动放在事务内完成。
#[derive(Clone)]
pub struct CampaignRepositoryImpl {
    /// 数据库连接
    db: Arc<DatabaseConnection>,
}

impl CampaignRepositoryImpl {
    /// 创建新的活动仓库实例
    ///
    /// # 参数
    ///
    /// * `db` - 数据库连接
    ///
    /// # 返回值
    ///
    /// 返回新的活动仓库实例
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

fn to_utc(at: DateTime<FixedOffset>) -> DateTime<Utc> {
    at.with_timezone(&Utc)
}

impl TryFrom<campaign_entity::Model> for Campaign {
    type Error = RepositoryError;

    fn try_from(model: campaign_entity::Model) -> Result<Self, Self::Error> {
        let status = model
            .status
            .parse::<CampaignStatus>()
            .map_err(|e| RepositoryError::Corrupt(e.to_string()))?;

        Ok(Self {
            id: model.id,
            form_url: model.form_url,
            payload: model.payload,
            units_requested: model.units_requested,
            units_completed: model.units_completed,
            units_failed: model.units_failed,
            human_paced: model.human_paced,
            priority: model.priority,
            status,
            queue_position: model.queue_position,
            created_at: to_utc(model.created_at),
            queued_at: model.queued_at.map(to_utc),
            window_start: model.window_start.map(to_utc),
            window_end: model.window_end.map(to_utc),
            estimated_completion_at: model.estimated_completion_at.map(to_utc),
            retry_count: model.retry_count,
            max_retries: model.max_retries,
            updated_at: to_utc(model.updated_at),
        })
    }
}

impl From<&Campaign> for campaign_entity::ActiveModel {
    fn from(campaign: &Campaign) -> Self {
        Self {
            id: Set(campaign.id),
            form_url: Set(campaign.form_url.clone()),
            payload: Set(campaign.payload.clone()),
            units_requested: Set(campaign.units_requested),
            units_completed: Set(campaign.units_completed),
            units_failed: Set(campaign.units_failed),
            human_paced: Set(campaign.human_paced),
            priority: Set(campaign.priority),
            status: Set(campaign.status.to_string()),
            queue_position: Set(campaign.queue_position),
            created_at: Set(campaign.created_at.into()),
            queued_at: Set(campaign.queued_at.map(Into::into)),
            window_start: Set(campaign.window_start.map(Into::into)),
            window_end: Set(campaign.window_end.map(Into::into)),
            estimated_completion_at: Set(campaign.estimated_completion_at.map(Into::into)),
            retry_count: Set(campaign.retry_count),
            max_retries: Set(campaign.max_retries),
            updated_at: Set(campaign.updated_at.into()),
        }
    }
}

fn into_campaigns(models: Vec<campaign_entity::Model>) -> Result<Vec<Campaign>, RepositoryError> {
    models.into_iter().map(Campaign::try_from).collect()
}

/// 当前排队活动中的最大位置
async fn max_queue_position<C: ConnectionTrait>(conn: &C) -> Result<i32, DbErr> {
    let max: Option<Option<i32>> = campaign_entity::Entity::find()
        .select_only()
        .column_as(campaign_entity::Column::QueuePosition.max(), "max_position")
        .filter(campaign_entity::Column::Status.eq(CampaignStatus::Queued.to_string()))
        .into_tuple()
        .one(conn)
        .await?;
    Ok(max.flatten().unwrap_or(0))
}

/// 把位于 `position` 之后的排队活动前移一位，保持位置连续
async fn close_position_gap<C: ConnectionTrait>(conn: &C, position: i32) -> Result<(), DbErr> {
    campaign_entity::Entity::update_many()
        .col_expr(
            campaign_entity::Column::QueuePosition,
            Expr::col(campaign_entity::Column::QueuePosition).sub(1),
        )
        .filter(campaign_entity::Column::Status.eq(CampaignStatus::Queued.to_string()))
        .filter(campaign_entity::Column::QueuePosition.gt(position))
        .exec(conn)
        .await?;
    Ok(())
}

#[async_trait]
impl CampaignRepository for CampaignRepositoryImpl {
    async fn insert_queued(
        &self,
        campaign: &Campaign,
        now: DateTime<Utc>,
    ) -> Result<Campaign, RepositoryError> {
        let txn = self.db.begin().await?;

        let mut queued = campaign.clone();
        queued.status = CampaignStatus::Queued;
        queued.queue_position = Some(max_queue_position(&txn).await? + 1);
        queued.queued_at = Some(now);
        queued.updated_at = now;

        let model: campaign_entity::ActiveModel = (&queued).into();
        model.insert(&txn).await?;
        txn.commit().await?;

        Ok(queued)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Campaign>, RepositoryError> {
        let model = campaign_entity::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?;

        model.map(Campaign::try_from).transpose()
    }

    async fn find_queued_ordered(&self) -> Result<Vec<Campaign>, RepositoryError> {
        let models = campaign_entity::Entity::find()
            .filter(campaign_entity::Column::Status.eq(CampaignStatus::Queued.to_string()))
            .order_by_desc(campaign_entity::Column::Priority)
            .order_by_asc(campaign_entity::Column::QueuePosition)
            .all(self.db.as_ref())
            .await?;

        into_campaigns(models)
    }

    async fn find_by_status(
        &self,
        status: CampaignStatus,
    ) -> Result<Vec<Campaign>, RepositoryError> {
        let models = campaign_entity::Entity::find()
            .filter(campaign_entity::Column::Status.eq(status.to_string()))
            .order_by_asc(campaign_entity::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;

        into_campaigns(models)
    }

    async fn count_by_status(&self, status: CampaignStatus) -> Result<u64, RepositoryError> {
        let count = campaign_entity::Entity::find()
            .filter(campaign_entity::Column::Status.eq(status.to_string()))
            .count(self.db.as_ref())
            .await?;
        Ok(count)
    }

    async fn count_by_status_and_mode(
        &self,
        status: CampaignStatus,
        human_paced: bool,
    ) -> Result<u64, RepositoryError> {
        let count = campaign_entity::Entity::find()
            .filter(campaign_entity::Column::Status.eq(status.to_string()))
            .filter(campaign_entity::Column::HumanPaced.eq(human_paced))
            .count(self.db.as_ref())
            .await?;
        Ok(count)
    }

    async fn start_campaign(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let txn = self.db.begin().await?;

        let position = campaign_entity::Entity::find_by_id(id)
            .filter(campaign_entity::Column::Status.eq(CampaignStatus::Queued.to_string()))
            .one(&txn)
            .await?
            .map(|model| model.queue_position);

        let Some(position) = position else {
            txn.rollback().await?;
            return Ok(false);
        };

        let result = campaign_entity::Entity::update_many()
            .col_expr(
                campaign_entity::Column::Status,
                Expr::value(CampaignStatus::InProgress.to_string()),
            )
            .col_expr(
                campaign_entity::Column::QueuePosition,
                Expr::value(Option::<i32>::None),
            )
            .col_expr(
                campaign_entity::Column::UpdatedAt,
                Expr::value(DateTime::<FixedOffset>::from(now)),
            )
            .filter(campaign_entity::Column::Id.eq(id))
            .filter(campaign_entity::Column::Status.eq(CampaignStatus::Queued.to_string()))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            txn.rollback().await?;
            return Ok(false);
        }

        if let Some(position) = position {
            close_position_gap(&txn, position).await?;
        }

        txn.commit().await?;
        Ok(true)
    }

    async fn record_unit_outcome(
        &self,
        id: Uuid,
        outcome: UnitOutcome,
    ) -> Result<bool, RepositoryError> {
        let column = match outcome {
            UnitOutcome::Completed => campaign_entity::Column::UnitsCompleted,
            UnitOutcome::Failed => campaign_entity::Column::UnitsFailed,
        };

        let result = campaign_entity::Entity::update_many()
            .col_expr(column, Expr::col(column).add(1))
            .col_expr(
                campaign_entity::Column::UpdatedAt,
                Expr::value(DateTime::<FixedOffset>::from(Utc::now())),
            )
            .filter(campaign_entity::Column::Id.eq(id))
            .filter(Expr::cust(
                "units_completed + units_failed < units_requested",
            ))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn mark_completed(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let result = campaign_entity::Entity::update_many()
            .col_expr(
                campaign_entity::Column::Status,
                Expr::value(CampaignStatus::Completed.to_string()),
            )
            .col_expr(
                campaign_entity::Column::UpdatedAt,
                Expr::value(DateTime::<FixedOffset>::from(now)),
            )
            .filter(campaign_entity::Column::Id.eq(id))
            .filter(campaign_entity::Column::Status.eq(CampaignStatus::InProgress.to_string()))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        expected_retry_count: i32,
        retry_count: i32,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = campaign_entity::Entity::update_many()
            .col_expr(
                campaign_entity::Column::Status,
                Expr::value(CampaignStatus::Failed.to_string()),
            )
            .col_expr(campaign_entity::Column::RetryCount, Expr::value(retry_count))
            .col_expr(
                campaign_entity::Column::UpdatedAt,
                Expr::value(DateTime::<FixedOffset>::from(now)),
            )
            .filter(campaign_entity::Column::Id.eq(id))
            .filter(campaign_entity::Column::Status.eq(CampaignStatus::InProgress.to_string()))
            .filter(campaign_entity::Column::RetryCount.eq(expected_retry_count))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn requeue(&self, request: RequeueRequest) -> Result<bool, RepositoryError> {
        let txn = self.db.begin().await?;
        let position = max_queue_position(&txn).await? + 1;
        let now = DateTime::<FixedOffset>::from(request.now);

        let result = campaign_entity::Entity::update_many()
            .col_expr(
                campaign_entity::Column::Status,
                Expr::value(CampaignStatus::Queued.to_string()),
            )
            .col_expr(
                campaign_entity::Column::QueuePosition,
                Expr::value(Some(position)),
            )
            .col_expr(
                campaign_entity::Column::RetryCount,
                Expr::value(request.retry_count),
            )
            .col_expr(campaign_entity::Column::Priority, Expr::value(request.priority))
            .col_expr(campaign_entity::Column::QueuedAt, Expr::value(Some(now)))
            .col_expr(campaign_entity::Column::UpdatedAt, Expr::value(now))
            .filter(campaign_entity::Column::Id.eq(request.id))
            .filter(campaign_entity::Column::Status.eq(request.expected_status.to_string()))
            .filter(campaign_entity::Column::RetryCount.eq(request.expected_retry_count))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            txn.rollback().await?;
            return Ok(false);
        }

        txn.commit().await?;
        Ok(true)
    }

    async fn update_priority(&self, id: Uuid, priority: i32) -> Result<bool, RepositoryError> {
        let result = campaign_entity::Entity::update_many()
            .col_expr(campaign_entity::Column::Priority, Expr::value(priority))
            .col_expr(
                campaign_entity::Column::UpdatedAt,
                Expr::value(DateTime::<FixedOffset>::from(Utc::now())),
            )
            .filter(campaign_entity::Column::Id.eq(id))
            .filter(campaign_entity::Column::Status.eq(CampaignStatus::Queued.to_string()))
            .filter(campaign_entity::Column::Priority.ne(priority))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn set_estimated_completion(
        &self,
        id: Uuid,
        at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        campaign_entity::Entity::update_many()
            .col_expr(
                campaign_entity::Column::EstimatedCompletionAt,
                Expr::value(at.map(DateTime::<FixedOffset>::from)),
            )
            .filter(campaign_entity::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    async fn delete_idle(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let txn = self.db.begin().await?;

        let Some(model) = campaign_entity::Entity::find_by_id(id)
            .filter(campaign_entity::Column::Status.ne(CampaignStatus::InProgress.to_string()))
            .one(&txn)
            .await?
        else {
            txn.rollback().await?;
            return Ok(false);
        };

        let result = campaign_entity::Entity::delete_many()
            .filter(campaign_entity::Column::Id.eq(id))
            .filter(campaign_entity::Column::Status.ne(CampaignStatus::InProgress.to_string()))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            txn.rollback().await?;
            return Ok(false);
        }

        if let Some(position) = model.queue_position {
            close_position_gap(&txn, position).await?;
        }

        txn.commit().await?;
        Ok(true)
    }
}
