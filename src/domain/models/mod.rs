// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域模型模块
///
/// 该模块定义了系统的核心业务实体，包括：
/// - 活动（campaign）：一次客户提交需求及其状态机
/// - 节奏计划（pacing）：每个提交的执行时间与延迟
/// - 批次记录（batch）：大型活动的可恢复分批游标
/// - 状态快照（status）：对外暴露的只读统计结构
pub mod batch;
pub mod campaign;
pub mod pacing;
pub mod status;
