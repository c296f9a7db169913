// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::domain::models::campaign::Campaign;

/// 执行错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// 超时
    #[error("Timeout after {0:?}")]
    Timeout(Duration),
    /// 目标表单拒绝了提交
    #[error("Submission rejected: {0}")]
    Rejected(String),
    /// 目标暂时不可用
    #[error("Target unavailable: {0}")]
    Unavailable(String),
    /// 不可恢复的错误（表单不存在、负载无效等）
    #[error("Permanent failure: {0}")]
    Permanent(String),
}

impl ExecutionError {
    /// 判断错误是否可重试
    ///
    /// # 返回值
    ///
    /// 如果错误是可重试的则返回true，否则返回false
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ExecutionError::Permanent(_))
    }
}

/// 单个提交的输入
#[derive(Debug, Clone)]
pub struct UnitData {
    /// 计划中的序号
    pub sequence_index: usize,
    /// 数据源中的行偏移
    pub row_offset: usize,
    /// 该行数据，缺失时为 Null
    pub row: Value,
}

/// 表单提交执行器特质
///
/// 工作器只依赖该接口，具体的提交方式由实现方决定
#[async_trait]
pub trait FormExecutor: Send + Sync {
    /// 执行一次提交
    ///
    /// # 参数
    ///
    /// * `campaign` - 所属活动
    /// * `unit` - 提交输入
    /// * `timeout` - 本次提交允许的最长时间
    async fn execute(
        &self,
        campaign: &Campaign,
        unit: &UnitData,
        timeout: Duration,
    ) -> Result<(), ExecutionError>;

    /// 执行器名称
    fn name(&self) -> &'static str;
}

/// 行数据源特质
#[async_trait]
pub trait RowSource: Send + Sync {
    /// 读取活动的全部行数据
    async fn fetch_rows(&self, campaign: &Campaign) -> Result<Vec<Value>, ExecutionError>;
}
