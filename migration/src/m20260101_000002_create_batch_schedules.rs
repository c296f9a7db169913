// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm_migration::prelude::*;

/// 批次计划表迁移
#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One row per batched campaign; the plan column holds the serialized pacing plan
        manager
            .create_table(
                Table::create()
                    .table(BatchSchedules::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BatchSchedules::CampaignId)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(BatchSchedules::BatchSize).integer().not_null())
                    .col(
                        ColumnDef::new(BatchSchedules::CurrentBatchIndex)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(BatchSchedules::TotalBatches)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(BatchSchedules::Plan).json().not_null())
                    .col(
                        ColumnDef::new(BatchSchedules::EstimatedCompletionAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(BatchSchedules::TimeConstraintAdjusted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(BatchSchedules::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BatchSchedules::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BatchSchedules::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum BatchSchedules {
    Table,
    CampaignId,
    BatchSize,
    CurrentBatchIndex,
    TotalBatches,
    Plan,
    EstimatedCompletionAt,
    TimeConstraintAdjusted,
    CreatedAt,
    UpdatedAt,
}
