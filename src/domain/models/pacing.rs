// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 计划中的单个提交
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledUnit {
    /// 0 起始的稳定排序键，同时对应数据源中的行偏移
    pub sequence_index: usize,
    /// 计划执行时间
    pub execution_time: DateTime<Utc>,
    /// 执行前的思考延迟（秒）
    pub delay_seconds: u64,
}

impl ScheduledUnit {
    /// 实际提交的最早时间
    pub fn submit_at(&self) -> DateTime<Utc> {
        self.execution_time + Duration::seconds(self.delay_seconds as i64)
    }
}

/// 节奏计划
///
/// 按 `sequence_index` 有序，计算后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PacingPlan {
    pub units: Vec<ScheduledUnit>,
    /// 时间窗口不足以宽松容纳全部提交，时段被重复使用
    pub crowded: bool,
}

impl PacingPlan {
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// 计划预计完成时间（最后一个提交的提交时间）
    pub fn estimated_completion(&self) -> Option<DateTime<Utc>> {
        self.units.iter().map(ScheduledUnit::submit_at).max()
    }
}
