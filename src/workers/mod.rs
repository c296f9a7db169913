// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 工作器模块
///
/// 提供执行池、池管理器以及执行单个活动的工作器
pub mod campaign_worker;
pub mod manager;
pub mod pool;
