// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 仓库接口模块
///
/// 该模块定义了领域层的仓库接口，遵循依赖倒置原则。
/// 具体实现由基础设施层提供。
///
/// 包含的仓库接口：
/// - 活动仓库（campaign_repository）：活动的入队、状态机与计数器
/// - 批次仓库（batch_repository）：大型活动的批次游标
pub mod batch_repository;
pub mod campaign_repository;
