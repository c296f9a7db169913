// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{
    create_test_app, create_test_app_with, create_test_app_wrapping, join_runs, request,
    test_settings, FlakyProgressRepository, ScriptedExecutor, UnavailableRowSource,
};
use campaignd::domain::models::campaign::{Campaign, CampaignStatus};
use campaignd::engines::traits::ExecutionError;
use campaignd::queue::orchestrator::OrchestratorError;
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration as StdDuration;

#[tokio::test]
async fn test_fast_campaign_runs_to_completion() {
    let app = create_test_app().await;

    let campaign = app.orchestrator.enqueue(request(4, false)).await.unwrap();
    assert_eq!(campaign.queue_position, Some(1));

    let runs = app.orchestrator.dispatch_tick().await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].campaign_id, campaign.id);
    join_runs(runs).await;

    let stored = app.campaigns.find_by_id(campaign.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CampaignStatus::Completed);
    assert_eq!(stored.units_completed, 4);
    assert_eq!(stored.units_failed, 0);
    assert_eq!(stored.queue_position, None);
    assert!(stored.estimated_completion_at.is_some());

    // 两行数据被循环复用
    assert_eq!(app.executor.calls(), 4);
    assert_eq!(app.executor.offsets(), vec![0, 1, 2, 3]);
    let rows = app.executor.rows();
    assert_eq!(rows[0], json!({ "name": "a" }));
    assert_eq!(rows[3], json!({ "name": "b" }));

    let snapshot = app.pools.snapshot();
    assert_eq!(snapshot.fast.active_count + snapshot.human_paced.active_count, 0);
}

#[tokio::test]
async fn test_large_campaign_runs_in_batches() {
    let app = create_test_app().await;

    // 容量10的一半是5，12个提交需要分批：min(5, 12/4) = 3
    let campaign = app.orchestrator.enqueue(request(12, false)).await.unwrap();
    let runs = app.orchestrator.dispatch_tick().await.unwrap();
    join_runs(runs).await;

    let stored = app.campaigns.find_by_id(campaign.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CampaignStatus::Completed);
    assert_eq!(stored.units_completed, 12);

    let progress = app
        .orchestrator
        .batch_progress(campaign.id)
        .await
        .unwrap()
        .expect("batched campaign keeps its batch record");
    assert_eq!(progress.batch_size, 3);
    assert_eq!(progress.total_batches, 4);
    assert_eq!(progress.current_batch, 4);
    assert!(!progress.time_constraint_adjusted);

    let mut offsets = app.executor.offsets();
    offsets.sort_unstable();
    assert_eq!(offsets, (0..12).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_small_campaign_has_no_batch_record() {
    let app = create_test_app().await;
    let campaign = app.orchestrator.enqueue(request(3, false)).await.unwrap();
    join_runs(app.orchestrator.dispatch_tick().await.unwrap()).await;

    assert!(app
        .orchestrator
        .batch_progress(campaign.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_retryable_failure_requeues_until_retries_exhausted() {
    let app = create_test_app_with(
        test_settings(),
        ScriptedExecutor::succeeding(),
        Some(Arc::new(UnavailableRowSource)),
    )
    .await;

    let mut req = request(2, false);
    req.max_retries = Some(3);
    let campaign = app.orchestrator.enqueue(req).await.unwrap();

    for expected_retry in 1..=2 {
        join_runs(app.orchestrator.dispatch_tick().await.unwrap()).await;
        let stored = app.campaigns.find_by_id(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Queued);
        assert_eq!(stored.retry_count, expected_retry);
        assert_eq!(stored.queue_position, Some(1));
    }

    join_runs(app.orchestrator.dispatch_tick().await.unwrap()).await;
    let stored = app.campaigns.find_by_id(campaign.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CampaignStatus::Failed);
    assert_eq!(stored.retry_count, 3);
    assert_eq!(stored.queue_position, None);
    assert!(!stored.can_retry());
    assert_eq!(app.executor.calls(), 0);

    // 重试次数已用完，不会被重新接纳，也不会再被派发
    assert_eq!(app.orchestrator.retry_failed_campaigns().await.unwrap(), 0);
    assert!(app.orchestrator.dispatch_tick().await.unwrap().is_empty());
    let stored = app.campaigns.find_by_id(campaign.id).await.unwrap().unwrap();
    assert_eq!(stored.retry_count, 3);
}

#[tokio::test]
async fn test_permanent_unit_error_fails_without_consuming_retry() {
    let app = create_test_app_with(
        test_settings(),
        ScriptedExecutor::failing_with(ExecutionError::Permanent("form deleted".to_string())),
        None,
    )
    .await;

    let campaign = app.orchestrator.enqueue(request(5, false)).await.unwrap();
    join_runs(app.orchestrator.dispatch_tick().await.unwrap()).await;

    let stored = app.campaigns.find_by_id(campaign.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CampaignStatus::Failed);
    assert_eq!(stored.retry_count, 0);
    assert_eq!(stored.units_failed, 1);
    assert_eq!(app.executor.calls(), 1);
}

#[tokio::test]
async fn test_open_circuit_skips_remaining_units() {
    let mut settings = test_settings();
    settings.circuit_breaker.max_failures = 2;
    let app = create_test_app_with(
        settings,
        ScriptedExecutor::failing_with(ExecutionError::Rejected("captcha".to_string())),
        None,
    )
    .await;

    let campaign = app.orchestrator.enqueue(request(5, false)).await.unwrap();
    join_runs(app.orchestrator.dispatch_tick().await.unwrap()).await;

    let stored = app.campaigns.find_by_id(campaign.id).await.unwrap().unwrap();
    // 每个提交都已处理（失败或跳过），活动仍视为完成
    assert_eq!(stored.status, CampaignStatus::Completed);
    assert_eq!(stored.units_failed, 5);
    assert_eq!(stored.units_completed, 0);
    assert_eq!(app.executor.calls(), 2);

    let stats = app.orchestrator.circuit_breaker_stats();
    assert_eq!(stats.open_keys, 1);
    assert_eq!(stats.max_failures, 2);
}

#[tokio::test]
async fn test_dropped_progress_report_does_not_fail_batched_campaign() {
    let settings = test_settings();
    // 耗尽一次进度更新的全部重试
    let failures = settings.scheduler.progress_update_retries as usize + 1;
    let app = create_test_app_wrapping(settings, ScriptedExecutor::succeeding(), None, |inner| {
        Arc::new(FlakyProgressRepository::new(inner, failures))
    })
    .await;

    let campaign = app.orchestrator.enqueue(request(12, false)).await.unwrap();
    join_runs(app.orchestrator.dispatch_tick().await.unwrap()).await;

    let stored = app.campaigns.find_by_id(campaign.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CampaignStatus::Completed);
    assert_eq!(stored.units_completed, 12);
    assert_eq!(stored.retry_count, 0);
    // 丢失的一个报告由计划尾部补齐
    assert_eq!(app.executor.calls(), 13);

    let progress = app.orchestrator.batch_progress(campaign.id).await.unwrap().unwrap();
    assert_eq!(progress.current_batch, progress.total_batches);
}

#[tokio::test]
async fn test_stalled_unit_times_out_and_opens_circuit() {
    let mut settings = test_settings();
    settings.timeouts.base_unit_secs = 1;
    settings.timeouts.max_unit_secs = 1;
    settings.circuit_breaker.max_failures = 1;
    let app = create_test_app_with(
        settings,
        ScriptedExecutor::stalling(StdDuration::from_secs(30)),
        None,
    )
    .await;

    let campaign = app.orchestrator.enqueue(request(2, false)).await.unwrap();
    join_runs(app.orchestrator.dispatch_tick().await.unwrap()).await;

    let stored = app.campaigns.find_by_id(campaign.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CampaignStatus::Completed);
    assert_eq!(stored.units_failed, 2);
    assert_eq!(stored.units_completed, 0);
    // 超时计入熔断，第二个提交被跳过
    assert_eq!(app.executor.calls(), 1);
    assert_eq!(app.orchestrator.circuit_breaker_stats().open_keys, 1);
}

#[tokio::test]
async fn test_batch_deadline_requeues_campaign() {
    let mut settings = test_settings();
    settings.timeouts.base_unit_secs = 1;
    settings.timeouts.max_unit_secs = 1;
    settings.timeouts.batch_buffer_secs = 0;
    settings.timeouts.max_batch_secs = 1;
    let app = create_test_app_with(
        settings,
        ScriptedExecutor::stalling(StdDuration::from_secs(30)),
        None,
    )
    .await;

    let campaign = app.orchestrator.enqueue(request(12, false)).await.unwrap();
    join_runs(app.orchestrator.dispatch_tick().await.unwrap()).await;

    // 第一个提交超时耗尽批次时限，剩余提交不再执行
    let stored = app.campaigns.find_by_id(campaign.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CampaignStatus::Queued);
    assert_eq!(stored.retry_count, 1);
    assert_eq!(stored.units_failed, 1);
    assert_eq!(app.executor.calls(), 1);

    let progress = app.orchestrator.batch_progress(campaign.id).await.unwrap().unwrap();
    assert_eq!(progress.current_batch, 0);
}

#[tokio::test]
async fn test_future_window_is_not_dispatched() {
    let app = create_test_app().await;

    let mut req = request(2, false);
    req.window_start = Some(Utc::now() + Duration::hours(3));
    req.window_end = Some(Utc::now() + Duration::hours(5));
    let campaign = app.orchestrator.enqueue(req).await.unwrap();

    let runs = app.orchestrator.dispatch_tick().await.unwrap();
    assert!(runs.is_empty());

    let stored = app.campaigns.find_by_id(campaign.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CampaignStatus::Queued);
    assert_eq!(stored.queue_position, Some(1));
}

#[tokio::test]
async fn test_fast_campaigns_dispatch_before_human_paced() {
    let mut settings = test_settings();
    settings.workers.total_budget = 2;
    let app = create_test_app_with(settings, ScriptedExecutor::succeeding(), None).await;

    let human = app.orchestrator.enqueue(request(1, true)).await.unwrap();
    let fast = app.orchestrator.enqueue(request(1, false)).await.unwrap();

    let runs = app.orchestrator.dispatch_tick().await.unwrap();
    let order: Vec<_> = runs.iter().map(|run| run.campaign_id).collect();
    assert_eq!(order, vec![fast.id, human.id]);
    join_runs(runs).await;
}

#[tokio::test]
async fn test_higher_priority_dispatches_first_and_rest_stays_pending() {
    let mut settings = test_settings();
    settings.workers.total_budget = 2;
    let app = create_test_app_with(settings, ScriptedExecutor::succeeding(), None).await;

    let newer = app.orchestrator.enqueue(request(1, false)).await.unwrap();
    let mut older = Campaign::new(request(1, false), 3);
    older.created_at = Utc::now() - Duration::hours(3);
    let older = app.orchestrator.add_to_queue(&older).await.unwrap();
    assert_eq!(older.queue_position, Some(2));

    assert_eq!(app.orchestrator.age_priorities().await.unwrap(), 1);

    // 快速池只有一个槽位
    assert_eq!(app.pools.get_executor(false).size(), 1);
    let runs = app.orchestrator.dispatch_tick().await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].campaign_id, older.id);
    assert_eq!(app.pools.get_executor(false).pending(), 1);
    join_runs(runs).await;

    let waiting = app.campaigns.find_by_id(newer.id).await.unwrap().unwrap();
    assert_eq!(waiting.status, CampaignStatus::Queued);
    assert_eq!(waiting.queue_position, Some(1));
}

#[tokio::test]
async fn test_age_priorities_only_writes_changes() {
    let app = create_test_app().await;

    let mut campaign = Campaign::new(request(1, false), 3);
    campaign.created_at = Utc::now() - Duration::hours(7);
    let campaign = app.orchestrator.add_to_queue(&campaign).await.unwrap();
    app.orchestrator.enqueue(request(1, false)).await.unwrap();

    assert_eq!(app.orchestrator.age_priorities().await.unwrap(), 1);
    assert_eq!(app.orchestrator.age_priorities().await.unwrap(), 0);

    let stored = app.campaigns.find_by_id(campaign.id).await.unwrap().unwrap();
    assert_eq!(stored.priority, 12);
}

#[tokio::test]
async fn test_enqueue_rejects_when_queue_full() {
    let mut settings = test_settings();
    settings.scheduler.max_queue_size = 2;
    let app = create_test_app_with(settings, ScriptedExecutor::succeeding(), None).await;

    app.orchestrator.enqueue(request(1, false)).await.unwrap();
    app.orchestrator.enqueue(request(1, false)).await.unwrap();
    let err = app.orchestrator.enqueue(request(1, false)).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::QueueFull { max: 2 }));

    let status = app.orchestrator.queue_status().await.unwrap();
    assert_eq!(status.queued_count, 2);
    assert_eq!(status.max_queue_size, 2);
}

#[tokio::test]
async fn test_enqueue_validates_request() {
    let app = create_test_app().await;

    let err = app.orchestrator.enqueue(request(0, false)).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));

    let mut reversed = request(3, true);
    reversed.window_start = Some(Utc::now());
    reversed.window_end = Some(Utc::now() - Duration::hours(1));
    let err = app.orchestrator.enqueue(reversed).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));

    assert_eq!(app.orchestrator.queue_status().await.unwrap().queued_count, 0);
}

#[tokio::test]
async fn test_delete_campaign_rules() {
    let app = create_test_app().await;

    let first = app.orchestrator.enqueue(request(1, false)).await.unwrap();
    let second = app.orchestrator.enqueue(request(1, false)).await.unwrap();
    let third = app.orchestrator.enqueue(request(1, false)).await.unwrap();

    app.orchestrator.delete_campaign(second.id).await.unwrap();
    assert!(app.campaigns.find_by_id(second.id).await.unwrap().is_none());
    let third = app.campaigns.find_by_id(third.id).await.unwrap().unwrap();
    assert_eq!(third.queue_position, Some(2));

    assert!(app.campaigns.start_campaign(first.id, Utc::now()).await.unwrap());
    let err = app.orchestrator.delete_campaign(first.id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InProgress));

    let err = app
        .orchestrator
        .delete_campaign(uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound));
}

#[tokio::test]
async fn test_recover_interrupted_requeues_in_progress() {
    let app = create_test_app().await;

    let campaign = app.orchestrator.enqueue(request(3, false)).await.unwrap();
    assert!(app.campaigns.start_campaign(campaign.id, Utc::now()).await.unwrap());

    assert_eq!(app.orchestrator.recover_interrupted().await.unwrap(), 1);

    let stored = app.campaigns.find_by_id(campaign.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CampaignStatus::Queued);
    assert_eq!(stored.retry_count, 0);
    assert_eq!(stored.queue_position, Some(1));
}

#[tokio::test]
async fn test_retry_failed_campaigns_readmits_retryable() {
    let app = create_test_app().await;

    let campaign = app.orchestrator.enqueue(request(3, false)).await.unwrap();
    let now = Utc::now();
    assert!(app.campaigns.start_campaign(campaign.id, now).await.unwrap());
    assert!(app.campaigns.mark_failed(campaign.id, 0, 1, now).await.unwrap());

    assert_eq!(app.orchestrator.retry_failed_campaigns().await.unwrap(), 1);

    let stored = app.campaigns.find_by_id(campaign.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CampaignStatus::Queued);
    assert_eq!(stored.retry_count, 1);
    assert_eq!(stored.queue_position, Some(1));
}

#[tokio::test]
async fn test_queue_status_reports_pools() {
    let app = create_test_app().await;
    app.orchestrator.enqueue(request(1, true)).await.unwrap();

    let status = app.orchestrator.queue_status().await.unwrap();
    assert_eq!(status.queued_count, 1);
    assert_eq!(status.active_count, 0);
    assert_eq!(status.pool_size, 4);
    assert!(status.has_capacity);
}
