// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};
use rand::Rng;

use crate::config::settings::PacingSettings;
use crate::domain::models::pacing::{PacingPlan, ScheduledUnit};

/// 时间窗口内的一个时段
#[derive(Debug, Clone, Copy)]
struct Slot {
    start: DateTime<Utc>,
    length_ms: i64,
    weight: f64,
}

/// 节奏分配器
///
/// 为活动的每个提交计算执行时间与延迟。人类节奏模式下按一天中的
/// 活跃度曲线在窗口内随机抽取时间点；其他情况紧密排列。
/// 随机源可注入，测试中使用固定种子即可复现。
#[derive(Debug, Clone)]
pub struct ScheduleDistributor {
    pacing: PacingSettings,
}

impl ScheduleDistributor {
    pub fn new(pacing: PacingSettings) -> Self {
        Self { pacing }
    }

    /// 使用线程随机源生成节奏计划
    ///
    /// # 参数
    ///
    /// * `unit_count` - 需要规划的提交数量
    /// * `window_start` - 窗口开始
    /// * `window_end` - 窗口结束，缺省表示立即执行
    /// * `human_paced` - 是否人类节奏
    /// * `already_completed` - 活动此前已完成的提交数量
    ///
    /// # 返回值
    ///
    /// 恰好包含 `unit_count` 个提交的计划
    pub fn distribute(
        &self,
        unit_count: usize,
        window_start: DateTime<Utc>,
        window_end: Option<DateTime<Utc>>,
        human_paced: bool,
        already_completed: usize,
    ) -> PacingPlan {
        let mut rng = rand::rng();
        self.distribute_with(
            unit_count,
            window_start,
            window_end,
            human_paced,
            already_completed,
            &mut rng,
        )
    }

    /// 使用指定随机源生成节奏计划
    pub fn distribute_with<R: Rng + ?Sized>(
        &self,
        unit_count: usize,
        window_start: DateTime<Utc>,
        window_end: Option<DateTime<Utc>>,
        human_paced: bool,
        already_completed: usize,
        rng: &mut R,
    ) -> PacingPlan {
        if unit_count == 0 {
            return PacingPlan::default();
        }

        match window_end {
            Some(end) if human_paced && end > window_start => {
                self.spread_over_window(unit_count, window_start, end, already_completed, rng)
            }
            _ => self.back_to_back(unit_count, window_start, already_completed),
        }
    }

    fn back_to_back(
        &self,
        unit_count: usize,
        window_start: DateTime<Utc>,
        already_completed: usize,
    ) -> PacingPlan {
        let mut units = Vec::with_capacity(unit_count);
        let mut at = window_start;
        for index in 0..unit_count {
            // 首个提交尽快给出反馈，后续稍微拉开以免对目标造成突发压力
            let delay_seconds = if index == 0 && already_completed == 0 {
                self.pacing.fast_initial_delay_secs
            } else {
                self.pacing.fast_followup_delay_secs
            };
            units.push(ScheduledUnit {
                sequence_index: index,
                execution_time: at,
                delay_seconds,
            });
            at += Duration::seconds(delay_seconds as i64);
        }
        PacingPlan {
            units,
            crowded: false,
        }
    }

    fn spread_over_window<R: Rng + ?Sized>(
        &self,
        unit_count: usize,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        already_completed: usize,
        rng: &mut R,
    ) -> PacingPlan {
        let mut slots = self.build_slots(window_start, window_end);
        let mut total_weight: f64 = slots.iter().map(|slot| slot.weight).sum();
        if total_weight <= 0.0 {
            // 窗口完全落在零权重时段时退化为按时长均匀分布
            for slot in &mut slots {
                slot.weight = slot.length_ms as f64;
            }
            total_weight = slots.iter().map(|slot| slot.weight).sum();
        }

        let cumulative: Vec<f64> = slots
            .iter()
            .scan(0.0, |acc, slot| {
                *acc += slot.weight;
                Some(*acc)
            })
            .collect();

        let mut times: Vec<DateTime<Utc>> = (0..unit_count)
            .map(|_| {
                let draw = rng.random_range(0.0..total_weight);
                let index = cumulative
                    .partition_point(|edge| *edge <= draw)
                    .min(slots.len() - 1);
                let slot = slots[index];
                let offset_ms = rng.random_range(0..slot.length_ms);
                slot.start + Duration::milliseconds(offset_ms)
            })
            .collect();

        // 执行顺序必须按时间先后，与抽取顺序无关
        times.sort();

        let crowded =
            unit_count > slots.len().saturating_mul(self.pacing.crowding_threshold_per_hour);

        let units = times
            .into_iter()
            .enumerate()
            .map(|(index, execution_time)| {
                let delay_seconds = if index == 0 && already_completed == 0 {
                    self.pacing.first_unit_delay_secs
                } else {
                    rng.random_range(self.pacing.min_delay_secs..=self.pacing.max_delay_secs)
                };
                ScheduledUnit {
                    sequence_index: index,
                    execution_time,
                    delay_seconds,
                }
            })
            .collect();

        PacingPlan { units, crowded }
    }

    /// 把窗口按本地整点切分为时段，首尾时段可能不足一小时
    fn build_slots(&self, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Vec<Slot> {
        let offset = Duration::minutes(self.pacing.utc_offset_minutes as i64);
        let mut slots = Vec::new();
        let mut cursor = window_start;

        while cursor < window_end {
            let local = cursor + offset;
            let hour_start = local
                .duration_trunc(Duration::hours(1))
                .unwrap_or(local);
            let next_boundary = (hour_start + Duration::hours(1) - offset).min(window_end);
            let length_ms = (next_boundary - cursor).num_milliseconds().max(1);
            let weight = self
                .pacing
                .hour_weights
                .get(local.hour() as usize)
                .copied()
                .unwrap_or(0.0)
                * (length_ms as f64 / 3_600_000.0);

            slots.push(Slot {
                start: cursor,
                length_ms,
                weight,
            });
            cursor += Duration::milliseconds(length_ms);
        }

        slots
    }
}
