// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域服务模块
///
/// 该模块包含与存储和执行无关的纯业务规则：
/// - 优先级（priority）：按等待时长计算老化优先级
/// - 节奏分配（schedule_distributor）：为每个提交计算执行时间与延迟
/// - 超时估算（timeout_estimator）：单个提交与批次的超时以及批次大小
pub mod priority;
pub mod schedule_distributor;
pub mod timeout_estimator;
