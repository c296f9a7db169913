// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// 活动实体
///
/// 一次客户需求：向目标表单提交 `units_requested` 份响应。
/// 计数器只增不减，且始终满足 `units_completed + units_failed <= units_requested`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    /// 活动唯一标识符
    pub id: Uuid,
    /// 目标表单引用
    pub form_url: String,
    /// 行数据等附加负载，由数据源协作方解释
    pub payload: serde_json::Value,
    /// 请求的提交数量
    pub units_requested: i32,
    /// 已成功的提交数量
    pub units_completed: i32,
    /// 已失败的提交数量
    pub units_failed: i32,
    /// 是否以人类节奏执行
    pub human_paced: bool,
    /// 当前优先级，由老化任务维护
    pub priority: i32,
    /// 活动状态
    pub status: CampaignStatus,
    /// 队列位置，仅在 Queued 状态下存在
    pub queue_position: Option<i32>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 最近一次入队时间
    pub queued_at: Option<DateTime<Utc>>,
    /// 时间窗口开始，缺省表示立即执行
    pub window_start: Option<DateTime<Utc>>,
    /// 时间窗口结束
    pub window_end: Option<DateTime<Utc>>,
    /// 预计完成时间
    pub estimated_completion_at: Option<DateTime<Utc>>,
    /// 已用重试次数
    pub retry_count: i32,
    /// 最大重试次数
    pub max_retries: i32,
    /// 更新时间
    pub updated_at: DateTime<Utc>,
}

/// 活动状态枚举
///
/// Queued → InProgress → Completed/Failed，可恢复失败时 InProgress → Queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    /// 排队中
    #[default]
    Queued,
    /// 执行中
    InProgress,
    /// 已完成
    Completed,
    /// 已失败
    Failed,
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CampaignStatus::Queued => write!(f, "queued"),
            CampaignStatus::InProgress => write!(f, "in_progress"),
            CampaignStatus::Completed => write!(f, "completed"),
            CampaignStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for CampaignStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(CampaignStatus::Queued),
            "in_progress" => Ok(CampaignStatus::InProgress),
            "completed" => Ok(CampaignStatus::Completed),
            "failed" => Ok(CampaignStatus::Failed),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// 执行模式，对应两个工作池
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// 人类节奏
    HumanPaced,
    /// 快速
    Fast,
}

impl ExecutionMode {
    pub fn from_human_paced(human_paced: bool) -> Self {
        if human_paced {
            ExecutionMode::HumanPaced
        } else {
            ExecutionMode::Fast
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::HumanPaced => "human_paced",
            ExecutionMode::Fast => "fast",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 领域错误类型
#[derive(Error, Debug)]
pub enum DomainError {
    /// 无法识别的状态字符串
    #[error("Unknown campaign status: {0}")]
    UnknownStatus(String),
}

/// 活动创建请求
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_window"))]
pub struct CampaignRequest {
    #[validate(url)]
    pub form_url: String,
    #[validate(range(min = 1))]
    pub units_requested: i32,
    #[serde(default)]
    pub human_paced: bool,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    #[validate(range(min = 0, max = 10))]
    pub max_retries: Option<i32>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

fn validate_window(request: &CampaignRequest) -> Result<(), ValidationError> {
    if let (Some(start), Some(end)) = (request.window_start, request.window_end) {
        if end < start {
            let mut error = ValidationError::new("window_order");
            error.message = Some("window_end must not precede window_start".into());
            return Err(error);
        }
    }
    Ok(())
}

impl Campaign {
    /// 根据请求创建新的活动
    ///
    /// 新活动处于 Queued 状态但尚未分配队列位置，位置由入队时分配
    pub fn new(request: CampaignRequest, default_max_retries: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            form_url: request.form_url,
            payload: request.payload,
            units_requested: request.units_requested,
            units_completed: 0,
            units_failed: 0,
            human_paced: request.human_paced,
            priority: 0,
            status: CampaignStatus::Queued,
            queue_position: None,
            created_at: now,
            queued_at: None,
            window_start: request.window_start,
            window_end: request.window_end,
            estimated_completion_at: None,
            retry_count: 0,
            max_retries: request.max_retries.unwrap_or(default_max_retries),
            updated_at: now,
        }
    }

    /// 已处理（成功或失败）的提交数量
    pub fn processed_units(&self) -> i32 {
        self.units_completed + self.units_failed
    }

    /// 尚未处理的提交数量
    pub fn remaining_units(&self) -> i32 {
        (self.units_requested - self.processed_units()).max(0)
    }

    /// 所有提交是否都已处理
    pub fn is_fully_processed(&self) -> bool {
        self.processed_units() >= self.units_requested
    }

    pub fn mode(&self) -> ExecutionMode {
        ExecutionMode::from_human_paced(self.human_paced)
    }

    /// 是否已到达可执行时间
    pub fn is_eligible_at(&self, now: DateTime<Utc>) -> bool {
        self.window_start.is_none_or(|start| start <= now)
    }

    /// 失败的活动是否仍可被重新入队
    pub fn can_retry(&self) -> bool {
        self.status == CampaignStatus::Failed && self.retry_count < self.max_retries
    }
}
