// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::models::batch::BatchRecord;
use crate::domain::models::pacing::ScheduledUnit;
use crate::domain::repositories::batch_repository::BatchRepository;
use crate::domain::repositories::campaign_repository::RepositoryError;
use crate::infrastructure::database::entities::batch_schedule as batch_entity;

/// 批次记录仓库实现
#[derive(Clone)]
pub struct BatchRepositoryImpl {
    /// 数据库连接
    db: Arc<DatabaseConnection>,
}

impl BatchRepositoryImpl {
    /// 创建新的批次记录仓库实例
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

fn to_usize(value: i32, field: &str) -> Result<usize, RepositoryError> {
    usize::try_from(value)
        .map_err(|_| RepositoryError::Corrupt(format!("{} is negative: {}", field, value)))
}

fn to_i32(value: usize, field: &str) -> Result<i32, RepositoryError> {
    i32::try_from(value)
        .map_err(|_| RepositoryError::Corrupt(format!("{} out of range: {}", field, value)))
}

impl TryFrom<batch_entity::Model> for BatchRecord {
    type Error = RepositoryError;

    fn try_from(model: batch_entity::Model) -> Result<Self, Self::Error> {
        let plan: Vec<ScheduledUnit> = serde_json::from_value(model.plan)
            .map_err(|e| RepositoryError::Corrupt(format!("batch plan: {}", e)))?;

        Ok(Self {
            campaign_id: model.campaign_id,
            batch_size: to_usize(model.batch_size, "batch_size")?,
            current_batch_index: to_usize(model.current_batch_index, "current_batch_index")?,
            total_batches: to_usize(model.total_batches, "total_batches")?,
            plan,
            estimated_completion_at: model
                .estimated_completion_at
                .map(|at| at.with_timezone(&Utc)),
            time_constraint_adjusted: model.time_constraint_adjusted,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        })
    }
}

impl TryFrom<&BatchRecord> for batch_entity::ActiveModel {
    type Error = RepositoryError;

    fn try_from(record: &BatchRecord) -> Result<Self, Self::Error> {
        let plan = serde_json::to_value(&record.plan)
            .map_err(|e| RepositoryError::Corrupt(format!("batch plan: {}", e)))?;

        Ok(Self {
            campaign_id: Set(record.campaign_id),
            batch_size: Set(to_i32(record.batch_size, "batch_size")?),
            current_batch_index: Set(to_i32(
                record.current_batch_index,
                "current_batch_index",
            )?),
            total_batches: Set(to_i32(record.total_batches, "total_batches")?),
            plan: Set(plan),
            estimated_completion_at: Set(record.estimated_completion_at.map(Into::into)),
            time_constraint_adjusted: Set(record.time_constraint_adjusted),
            created_at: Set(record.created_at.into()),
            updated_at: Set(record.updated_at.into()),
        })
    }
}

#[async_trait]
impl BatchRepository for BatchRepositoryImpl {
    async fn find_by_campaign(
        &self,
        campaign_id: Uuid,
    ) -> Result<Option<BatchRecord>, RepositoryError> {
        let model = batch_entity::Entity::find_by_id(campaign_id)
            .one(self.db.as_ref())
            .await?;

        model.map(BatchRecord::try_from).transpose()
    }

    async fn insert_if_absent(&self, record: &BatchRecord) -> Result<BatchRecord, RepositoryError> {
        let txn = self.db.begin().await?;

        if let Some(existing) = batch_entity::Entity::find_by_id(record.campaign_id)
            .one(&txn)
            .await?
        {
            txn.commit().await?;
            return BatchRecord::try_from(existing);
        }

        let model = batch_entity::ActiveModel::try_from(record)?;
        let inserted = model.insert(&txn).await?;
        txn.commit().await?;

        BatchRecord::try_from(inserted)
    }

    async fn advance_cursor(&self, campaign_id: Uuid) -> Result<bool, RepositoryError> {
        let result = batch_entity::Entity::update_many()
            .col_expr(
                batch_entity::Column::CurrentBatchIndex,
                Expr::col(batch_entity::Column::CurrentBatchIndex).add(1),
            )
            .col_expr(
                batch_entity::Column::UpdatedAt,
                Expr::value(DateTime::<FixedOffset>::from(Utc::now())),
            )
            .filter(batch_entity::Column::CampaignId.eq(campaign_id))
            .filter(Expr::cust("current_batch_index < total_batches"))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn advance_cursor_to(
        &self,
        campaign_id: Uuid,
        index: usize,
    ) -> Result<bool, RepositoryError> {
        let index = to_i32(index, "current_batch_index")?;
        let result = batch_entity::Entity::update_many()
            .col_expr(batch_entity::Column::CurrentBatchIndex, Expr::value(index))
            .col_expr(
                batch_entity::Column::UpdatedAt,
                Expr::value(DateTime::<FixedOffset>::from(Utc::now())),
            )
            .filter(batch_entity::Column::CampaignId.eq(campaign_id))
            .filter(batch_entity::Column::CurrentBatchIndex.lt(index))
            .filter(batch_entity::Column::TotalBatches.gte(index))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn delete(&self, campaign_id: Uuid) -> Result<(), RepositoryError> {
        batch_entity::Entity::delete_by_id(campaign_id)
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }
}
