// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{request, setup_db, test_settings};
use campaignd::domain::models::campaign::{Campaign, CampaignStatus};
use campaignd::domain::repositories::campaign_repository::{
    CampaignRepository, RequeueRequest, UnitOutcome,
};
use campaignd::infrastructure::repositories::campaign_repo_impl::CampaignRepositoryImpl;
use chrono::Utc;
use std::sync::Arc;

async fn repo() -> Arc<CampaignRepositoryImpl> {
    let db = setup_db(&test_settings()).await;
    Arc::new(CampaignRepositoryImpl::new(db))
}

async fn queued(repo: &CampaignRepositoryImpl, units: i32) -> Campaign {
    repo.insert_queued(&Campaign::new(request(units, false), 3), Utc::now())
        .await
        .unwrap()
}

async fn positions(repo: &CampaignRepositoryImpl) -> Vec<i32> {
    let mut positions: Vec<i32> = repo
        .find_queued_ordered()
        .await
        .unwrap()
        .into_iter()
        .filter_map(|campaign| campaign.queue_position)
        .collect();
    positions.sort_unstable();
    positions
}

#[tokio::test]
async fn test_insert_assigns_tail_positions() {
    let repo = repo().await;
    for expected in 1..=3 {
        let campaign = queued(&repo, 1).await;
        assert_eq!(campaign.queue_position, Some(expected));
        assert!(campaign.queued_at.is_some());
    }
    assert_eq!(positions(&repo).await, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_start_closes_position_gap() {
    let repo = repo().await;
    let _first = queued(&repo, 1).await;
    let second = queued(&repo, 1).await;
    let _third = queued(&repo, 1).await;

    assert!(repo.start_campaign(second.id, Utc::now()).await.unwrap());
    assert_eq!(positions(&repo).await, vec![1, 2]);

    let started = repo.find_by_id(second.id).await.unwrap().unwrap();
    assert_eq!(started.status, CampaignStatus::InProgress);
    assert_eq!(started.queue_position, None);

    // 第二次启动不命中
    assert!(!repo.start_campaign(second.id, Utc::now()).await.unwrap());
}

#[tokio::test]
async fn test_requeue_goes_to_tail() {
    let repo = repo().await;
    let first = queued(&repo, 1).await;
    let _second = queued(&repo, 1).await;

    let now = Utc::now();
    assert!(repo.start_campaign(first.id, now).await.unwrap());
    let request = RequeueRequest {
        id: first.id,
        expected_status: CampaignStatus::InProgress,
        expected_retry_count: 0,
        retry_count: 1,
        priority: 4,
        now,
    };
    assert!(repo.requeue(request).await.unwrap());
    // 期望值已不再成立
    assert!(!repo.requeue(request).await.unwrap());

    let requeued = repo.find_by_id(first.id).await.unwrap().unwrap();
    assert_eq!(requeued.queue_position, Some(2));
    assert_eq!(requeued.retry_count, 1);
    assert_eq!(requeued.priority, 4);
    assert_eq!(positions(&repo).await, vec![1, 2]);
}

#[tokio::test]
async fn test_unit_counters_never_exceed_requested() {
    let repo = repo().await;
    let campaign = queued(&repo, 5).await;
    assert!(repo.start_campaign(campaign.id, Utc::now()).await.unwrap());

    let id = campaign.id;
    let mut handles = Vec::new();
    for i in 0..12 {
        let repo = repo.clone();
        let outcome = if i % 3 == 0 {
            UnitOutcome::Failed
        } else {
            UnitOutcome::Completed
        };
        handles.push(tokio::spawn(async move {
            repo.record_unit_outcome(id, outcome).await.unwrap()
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 5);

    let stored = repo.find_by_id(campaign.id).await.unwrap().unwrap();
    assert_eq!(stored.processed_units(), 5);
    assert!(stored.is_fully_processed());
}

#[tokio::test]
async fn test_terminal_transitions_are_conditional() {
    let repo = repo().await;
    let campaign = queued(&repo, 1).await;
    let now = Utc::now();

    // 排队中的活动不能直接完成或失败
    assert!(!repo.mark_completed(campaign.id, now).await.unwrap());
    assert!(!repo.mark_failed(campaign.id, 0, 1, now).await.unwrap());

    assert!(repo.start_campaign(campaign.id, now).await.unwrap());
    assert!(!repo.mark_failed(campaign.id, 2, 3, now).await.unwrap());
    assert!(repo.mark_completed(campaign.id, now).await.unwrap());
    assert!(!repo.mark_completed(campaign.id, now).await.unwrap());
}

#[tokio::test]
async fn test_update_priority_only_for_queued_changes() {
    let repo = repo().await;
    let campaign = queued(&repo, 1).await;

    assert!(!repo.update_priority(campaign.id, 0).await.unwrap());
    assert!(repo.update_priority(campaign.id, 8).await.unwrap());

    assert!(repo.start_campaign(campaign.id, Utc::now()).await.unwrap());
    assert!(!repo.update_priority(campaign.id, 12).await.unwrap());
}

#[tokio::test]
async fn test_delete_idle_closes_gap_and_spares_running() {
    let repo = repo().await;
    let first = queued(&repo, 1).await;
    let second = queued(&repo, 1).await;
    let third = queued(&repo, 1).await;

    assert!(repo.delete_idle(first.id).await.unwrap());
    assert_eq!(positions(&repo).await, vec![1, 2]);

    assert!(repo.start_campaign(second.id, Utc::now()).await.unwrap());
    assert!(!repo.delete_idle(second.id).await.unwrap());
    assert!(repo.find_by_id(second.id).await.unwrap().is_some());

    let third = repo.find_by_id(third.id).await.unwrap().unwrap();
    assert_eq!(third.queue_position, Some(1));
}

#[tokio::test]
async fn test_counts_by_status_and_mode() {
    let repo = repo().await;
    queued(&repo, 1).await;
    repo.insert_queued(&Campaign::new(request(1, true), 3), Utc::now())
        .await
        .unwrap();

    assert_eq!(repo.count_by_status(CampaignStatus::Queued).await.unwrap(), 2);
    assert_eq!(
        repo.count_by_status_and_mode(CampaignStatus::Queued, true)
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        repo.count_by_status_and_mode(CampaignStatus::InProgress, false)
            .await
            .unwrap(),
        0
    );
}
