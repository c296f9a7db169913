// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::domain::models::campaign::Campaign;
use crate::engines::traits::{ExecutionError, FormExecutor, RowSource, UnitData};

/// 空跑执行器
///
/// 只记录日志并返回成功，用于没有表单后端时端到端运行
#[derive(Debug, Default, Clone)]
pub struct DryRunExecutor;

#[async_trait]
impl FormExecutor for DryRunExecutor {
    async fn execute(
        &self,
        campaign: &Campaign,
        unit: &UnitData,
        timeout: Duration,
    ) -> Result<(), ExecutionError> {
        debug!(
            campaign_id = %campaign.id,
            form_url = %campaign.form_url,
            sequence_index = unit.sequence_index,
            row_offset = unit.row_offset,
            timeout_secs = timeout.as_secs(),
            "Dry-run submission"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "dry_run"
    }
}

/// 从活动负载的 `rows` 数组读取行数据
#[derive(Debug, Default, Clone)]
pub struct PayloadRowSource;

#[async_trait]
impl RowSource for PayloadRowSource {
    async fn fetch_rows(&self, campaign: &Campaign) -> Result<Vec<Value>, ExecutionError> {
        match campaign.payload.get("rows") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(rows)) => Ok(rows.clone()),
            Some(other) => Err(ExecutionError::Permanent(format!(
                "payload.rows must be an array, got {}",
                json_kind(other)
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
