// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::models::batch::BatchRecord;
use crate::domain::repositories::campaign_repository::RepositoryError;

/// 批次记录仓储接口
#[async_trait]
pub trait BatchRepository: Send + Sync {
    /// 根据活动ID查找批次记录
    async fn find_by_campaign(
        &self,
        campaign_id: Uuid,
    ) -> Result<Option<BatchRecord>, RepositoryError>;

    /// 不存在时插入；已存在时原样返回已有记录
    async fn insert_if_absent(&self, record: &BatchRecord) -> Result<BatchRecord, RepositoryError>;

    /// 游标未越界时原子地前进一个批次
    async fn advance_cursor(&self, campaign_id: Uuid) -> Result<bool, RepositoryError>;

    /// 把游标前移到 `index`（只增不减，且不超过总批次数）
    async fn advance_cursor_to(
        &self,
        campaign_id: Uuid,
        index: usize,
    ) -> Result<bool, RepositoryError>;

    /// 删除批次记录
    async fn delete(&self, campaign_id: Uuid) -> Result<(), RepositoryError>;
}
