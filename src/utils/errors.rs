// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::time::Duration;
use thiserror::Error;

use crate::domain::repositories::campaign_repository::RepositoryError;
use crate::engines::traits::ExecutionError;

/// 活动执行错误类型
///
/// 表示一次活动运行整体失败，由编排器决定重试或终止
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("仓库错误: {0}")]
    Repository(#[from] RepositoryError),

    #[error("执行错误: {0}")]
    Execution(#[from] ExecutionError),

    #[error("批次超时: {0:?}")]
    BatchTimeout(Duration),

    #[error("提交未全部处理: {processed}/{requested}")]
    Incomplete { processed: i32, requested: i32 },

    #[error("未找到: {0}")]
    NotFound(String),
}

impl WorkerError {
    /// 是否值得消耗一次重试机会
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Execution(e) => e.is_retryable(),
            _ => true,
        }
    }
}
