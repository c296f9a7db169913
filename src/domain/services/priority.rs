// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Duration, Utc};

/// 等待时长分层：(最小等待小时数, 优先级)，从高到低排列
const AGE_TIERS: [(i64, i32); 5] = [(24, 20), (12, 16), (6, 12), (2, 8), (1, 4)];

/// 根据等待时长计算优先级
///
/// 分层而非线性，以限制老化任务触发的重排次数。随等待时长单调不减。
///
/// # 参数
///
/// * `created_at` - 活动创建时间
/// * `now` - 当前时间
///
/// # 返回值
///
/// 0 到 20 之间的优先级
pub fn score(created_at: DateTime<Utc>, now: DateTime<Utc>) -> i32 {
    score_for_age(now - created_at)
}

/// 根据等待时长计算优先级
pub fn score_for_age(age: Duration) -> i32 {
    AGE_TIERS
        .iter()
        .find(|(hours, _)| age >= Duration::hours(*hours))
        .map(|(_, priority)| *priority)
        .unwrap_or(0)
}
