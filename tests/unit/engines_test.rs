// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use campaignd::domain::models::campaign::{Campaign, CampaignRequest};
use campaignd::engines::dry_run::{DryRunExecutor, PayloadRowSource};
use campaignd::engines::traits::{ExecutionError, FormExecutor, RowSource, UnitData};
use campaignd::utils::errors::WorkerError;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn campaign(payload: serde_json::Value) -> Campaign {
    Campaign::new(
        CampaignRequest {
            form_url: "https://forms.example.com/f/feedback".to_string(),
            units_requested: 2,
            human_paced: false,
            window_start: None,
            window_end: None,
            max_retries: None,
            payload,
        },
        3,
    )
}

#[tokio::test]
async fn test_dry_run_stack_through_trait_objects() {
    let executor: Arc<dyn FormExecutor> = Arc::new(DryRunExecutor);
    let rows: Arc<dyn RowSource> = Arc::new(PayloadRowSource);
    let campaign = campaign(json!({ "rows": [{ "email": "x@example.com" }] }));

    let fetched = rows.fetch_rows(&campaign).await.unwrap();
    assert_eq!(fetched.len(), 1);

    let unit = UnitData {
        sequence_index: 0,
        row_offset: 0,
        row: fetched[0].clone(),
    };
    assert!(executor
        .execute(&campaign, &unit, Duration::from_secs(1))
        .await
        .is_ok());
    assert_eq!(executor.name(), "dry_run");
}

#[test]
fn test_worker_error_retryability() {
    let permanent: WorkerError = ExecutionError::Permanent("gone".to_string()).into();
    assert!(!permanent.is_retryable());

    let transient: WorkerError = ExecutionError::Timeout(Duration::from_secs(5)).into();
    assert!(transient.is_retryable());

    let deadline = WorkerError::BatchTimeout(Duration::from_secs(90));
    assert!(deadline.is_retryable());
}
