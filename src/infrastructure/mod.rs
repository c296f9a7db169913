// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 基础设施层模块
///
/// 该模块包含系统的技术实现细节：
/// - 数据库（database）：连接池和实体映射
/// - 指标（metrics）：Prometheus 导出器
/// - 仓库实现（repositories）：领域仓库接口的具体实现
///
/// 基础设施层依赖于领域层的抽象接口。
pub mod database;
pub mod metrics;
pub mod repositories;
