// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{request, setup_db, test_settings};
use campaignd::domain::models::campaign::Campaign;
use campaignd::domain::repositories::batch_repository::BatchRepository;
use campaignd::domain::repositories::campaign_repository::{CampaignRepository, UnitOutcome};
use campaignd::domain::services::schedule_distributor::ScheduleDistributor;
use campaignd::infrastructure::repositories::batch_repo_impl::BatchRepositoryImpl;
use campaignd::infrastructure::repositories::campaign_repo_impl::CampaignRepositoryImpl;
use campaignd::queue::batch_coordinator::BatchCoordinator;
use chrono::{Duration, Utc};
use std::sync::Arc;

struct Fixture {
    campaigns: Arc<dyn CampaignRepository>,
    batches: Arc<dyn BatchRepository>,
    coordinator: BatchCoordinator,
}

async fn fixture() -> Fixture {
    let settings = test_settings();
    let db = setup_db(&settings).await;
    let campaigns: Arc<dyn CampaignRepository> = Arc::new(CampaignRepositoryImpl::new(db.clone()));
    let batches: Arc<dyn BatchRepository> = Arc::new(BatchRepositoryImpl::new(db));
    let coordinator = BatchCoordinator::new(
        campaigns.clone(),
        batches.clone(),
        ScheduleDistributor::new(settings.pacing),
    );
    Fixture {
        campaigns,
        batches,
        coordinator,
    }
}

async fn started(fixture: &Fixture, units: i32) -> Campaign {
    let campaign = fixture
        .campaigns
        .insert_queued(&Campaign::new(request(units, false), 3), Utc::now())
        .await
        .unwrap();
    assert!(fixture
        .campaigns
        .start_campaign(campaign.id, Utc::now())
        .await
        .unwrap());
    campaign
}

fn indices(units: &[campaignd::domain::models::pacing::ScheduledUnit]) -> Vec<usize> {
    units.iter().map(|unit| unit.sequence_index).collect()
}

#[tokio::test]
async fn test_create_batch_schedule_is_idempotent() {
    let fixture = fixture().await;
    let campaign = started(&fixture, 10).await;

    let first = fixture
        .coordinator
        .create_batch_schedule(&campaign, 4, Utc::now())
        .await
        .unwrap();
    assert_eq!(first.total_batches, 3);
    assert_eq!(first.plan.len(), 10);
    assert_eq!(first.current_batch_index, 0);

    let second = fixture
        .coordinator
        .create_batch_schedule(&campaign, 7, Utc::now())
        .await
        .unwrap();
    assert_eq!(second.batch_size, 4);
    assert_eq!(second.plan, first.plan);

    let stored = fixture.campaigns.find_by_id(campaign.id).await.unwrap().unwrap();
    assert!(stored.estimated_completion_at.is_some());
    assert_eq!(stored.estimated_completion_at, second.estimated_completion_at);
}

#[tokio::test]
async fn test_next_batch_is_stable_until_completed() {
    let fixture = fixture().await;
    let campaign = started(&fixture, 10).await;
    fixture
        .coordinator
        .create_batch_schedule(&campaign, 4, Utc::now())
        .await
        .unwrap();

    let batch = fixture.coordinator.get_next_batch(campaign.id).await.unwrap().unwrap();
    assert_eq!(indices(&batch), vec![0, 1, 2, 3]);
    let again = fixture.coordinator.get_next_batch(campaign.id).await.unwrap().unwrap();
    assert_eq!(again, batch);

    assert!(fixture.coordinator.complete_current_batch(campaign.id).await.unwrap());
    let batch = fixture.coordinator.get_next_batch(campaign.id).await.unwrap().unwrap();
    assert_eq!(indices(&batch), vec![4, 5, 6, 7]);
}

#[tokio::test]
async fn test_next_batch_resumes_from_processed_count() {
    let fixture = fixture().await;
    let campaign = started(&fixture, 10).await;
    fixture
        .coordinator
        .create_batch_schedule(&campaign, 4, Utc::now())
        .await
        .unwrap();

    // 进程在第二批中途中断：已处理5个，游标仍停在0
    for _ in 0..5 {
        assert!(fixture
            .campaigns
            .record_unit_outcome(campaign.id, UnitOutcome::Completed)
            .await
            .unwrap());
    }

    let batch = fixture.coordinator.get_next_batch(campaign.id).await.unwrap().unwrap();
    assert_eq!(indices(&batch), vec![5, 6, 7]);

    let record = fixture
        .batches
        .find_by_campaign(campaign.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.current_batch_index, 1);
}

#[tokio::test]
async fn test_finished_schedule_hands_out_nothing() {
    let fixture = fixture().await;
    let campaign = started(&fixture, 5).await;
    fixture
        .coordinator
        .create_batch_schedule(&campaign, 2, Utc::now())
        .await
        .unwrap();

    for _ in 0..3 {
        assert!(fixture.coordinator.complete_current_batch(campaign.id).await.unwrap());
    }
    assert!(!fixture.coordinator.complete_current_batch(campaign.id).await.unwrap());

    let batch = fixture.coordinator.get_next_batch(campaign.id).await.unwrap().unwrap();
    assert!(batch.is_empty());

    let progress = fixture
        .coordinator
        .batch_progress(campaign.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.current_batch, 3);
    assert_eq!(progress.total_batches, 3);
}

#[tokio::test]
async fn test_missing_record_yields_none() {
    let fixture = fixture().await;
    let campaign = started(&fixture, 5).await;

    assert!(fixture.coordinator.get_next_batch(campaign.id).await.unwrap().is_none());
    assert!(!fixture.coordinator.complete_current_batch(campaign.id).await.unwrap());
    assert!(fixture.coordinator.batch_progress(campaign.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_past_window_start_marks_adjusted() {
    let fixture = fixture().await;
    let mut campaign = started(&fixture, 6).await;
    campaign.window_start = Some(Utc::now() - Duration::hours(2));

    let record = fixture
        .coordinator
        .create_batch_schedule(&campaign, 3, Utc::now())
        .await
        .unwrap();
    assert!(record.time_constraint_adjusted);
    assert!(record
        .plan
        .iter()
        .all(|unit| unit.execution_time >= campaign.window_start.unwrap()));
}

#[tokio::test]
async fn test_discard_removes_record() {
    let fixture = fixture().await;
    let campaign = started(&fixture, 6).await;
    fixture
        .coordinator
        .create_batch_schedule(&campaign, 3, Utc::now())
        .await
        .unwrap();

    fixture.coordinator.discard(campaign.id).await.unwrap();
    assert!(fixture
        .batches
        .find_by_campaign(campaign.id)
        .await
        .unwrap()
        .is_none());
}
