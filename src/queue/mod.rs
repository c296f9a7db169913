// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 队列模块
///
/// - 编排器（orchestrator）：准入、派发、老化、重试、删除与恢复
/// - 批次协调器（batch_coordinator）：大型活动的分批与持久游标
/// - 调度器（scheduler）：驱动周期任务
pub mod batch_coordinator;
pub mod orchestrator;
pub mod scheduler;
