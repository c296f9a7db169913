// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// 队列状态快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub queued_count: u64,
    pub active_count: u64,
    pub max_queue_size: u64,
    pub pool_size: usize,
    pub has_capacity: bool,
}

/// 批次进度快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub current_batch: usize,
    pub total_batches: usize,
    pub batch_size: usize,
    pub estimated_completion_at: Option<DateTime<Utc>>,
    pub time_constraint_adjusted: bool,
}
