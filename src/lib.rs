// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 配置模块
///
/// 处理应用程序的配置设置和环境变量
pub mod config;

/// 领域模块
///
/// 包含核心业务实体、服务和仓库接口
pub mod domain;

/// 引擎模块
///
/// 表单执行与行数据的接口边界，以及熔断器
pub mod engines;

/// 基础设施模块
///
/// 提供数据库、仓库实现和指标导出
pub mod infrastructure;

/// 队列模块
///
/// 实现活动队列、批次协调和周期调度
pub mod queue;

/// 工具模块
///
/// 提供错误类型、重试策略和遥测初始化
pub mod utils;

/// 工作器模块
///
/// 实现执行池和活动执行
pub mod workers;
