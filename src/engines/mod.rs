// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 执行引擎模块
///
/// - 特质（traits）：表单执行器与行数据源的接口边界
/// - 熔断器（circuit_breaker）：按目标表单的失败计数与冷却
/// - 空跑实现（dry_run）：无后端时使用的执行器与数据源
pub mod circuit_breaker;
pub mod dry_run;
pub mod traits;
