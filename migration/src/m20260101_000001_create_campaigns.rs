// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm_migration::prelude::*;

/// 活动表迁移
#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    /// 创建 campaigns 表及调度索引
    ///
    /// # 参数
    ///
    /// * `manager` - 数据库模式管理器
    ///
    /// # 返回值
    ///
    /// * `Ok(())` - 迁移成功
    /// * `Err(DbErr)` - 迁移失败
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Campaigns::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Campaigns::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Campaigns::FormUrl).string().not_null())
                    .col(ColumnDef::new(Campaigns::Payload).json().not_null())
                    .col(ColumnDef::new(Campaigns::UnitsRequested).integer().not_null())
                    .col(
                        ColumnDef::new(Campaigns::UnitsCompleted)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Campaigns::UnitsFailed)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Campaigns::HumanPaced)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Campaigns::Priority)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Campaigns::Status).string().not_null())
                    .col(ColumnDef::new(Campaigns::QueuePosition).integer().null())
                    .col(
                        ColumnDef::new(Campaigns::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Campaigns::QueuedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Campaigns::WindowStart)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Campaigns::WindowEnd)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Campaigns::EstimatedCompletionAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Campaigns::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Campaigns::MaxRetries)
                            .integer()
                            .not_null()
                            .default(3),
                    )
                    .col(
                        ColumnDef::new(Campaigns::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Dispatch order: status filter, then (priority desc, queue_position asc)
        manager
            .create_index(
                Index::create()
                    .name("idx_campaigns_status_priority_position")
                    .table(Campaigns::Table)
                    .col(Campaigns::Status)
                    .col(Campaigns::Priority)
                    .col(Campaigns::QueuePosition)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_campaigns_status_human_paced")
                    .table(Campaigns::Table)
                    .col(Campaigns::Status)
                    .col(Campaigns::HumanPaced)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Campaigns::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Campaigns {
    Table,
    Id,
    FormUrl,
    Payload,
    UnitsRequested,
    UnitsCompleted,
    UnitsFailed,
    HumanPaced,
    Priority,
    Status,
    QueuePosition,
    CreatedAt,
    QueuedAt,
    WindowStart,
    WindowEnd,
    EstimatedCompletionAt,
    RetryCount,
    MaxRetries,
    UpdatedAt,
}
