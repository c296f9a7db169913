// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm::entity::prelude::*;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "campaigns")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub form_url: String,
    pub payload: Json,
    pub units_requested: i32,
    pub units_completed: i32,
    pub units_failed: i32,
    pub human_paced: bool,
    pub priority: i32,
    pub status: String,
    pub queue_position: Option<i32>,
    pub created_at: ChronoDateTimeWithTimeZone,
    pub queued_at: Option<ChronoDateTimeWithTimeZone>,
    pub window_start: Option<ChronoDateTimeWithTimeZone>,
    pub window_end: Option<ChronoDateTimeWithTimeZone>,
    pub estimated_completion_at: Option<ChronoDateTimeWithTimeZone>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub updated_at: ChronoDateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::batch_schedule::Entity")]
    BatchSchedule,
}

impl Related<super::batch_schedule::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BatchSchedule.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
