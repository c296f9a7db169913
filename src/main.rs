// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use anyhow::Context;
use campaignd::config::settings::Settings;
use campaignd::domain::models::campaign::CampaignRequest;
use campaignd::domain::repositories::batch_repository::BatchRepository;
use campaignd::domain::repositories::campaign_repository::CampaignRepository;
use campaignd::engines::dry_run::{DryRunExecutor, PayloadRowSource};
use campaignd::infrastructure::database::connection;
use campaignd::infrastructure::repositories::batch_repo_impl::BatchRepositoryImpl;
use campaignd::infrastructure::repositories::campaign_repo_impl::CampaignRepositoryImpl;
use campaignd::queue::orchestrator::QueueOrchestrator;
use campaignd::queue::scheduler::CampaignScheduler;
use campaignd::workers::manager::WorkerPoolManager;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use campaignd::utils::telemetry;
use migration::{Migrator, MigratorTrait};

/// 主函数
///
/// 应用程序入口点，负责初始化所有组件并启动调度循环。
/// 第一个命令行参数可以是包含活动请求数组的 JSON 文件，启动后依次入队。
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize logging
    telemetry::init_telemetry();
    info!("Starting campaignd...");

    // 2. Load configuration
    let settings = Settings::new()?;
    info!("Configuration loaded");

    campaignd::infrastructure::metrics::init_metrics(&settings.metrics);

    // 3. Connect to database
    let db = Arc::new(connection::create_pool(&settings.database).await?);
    info!("Database connection established");

    info!("Running database migrations...");
    Migrator::up(db.as_ref(), None).await?;
    info!("Database migrations applied");

    // 4. Wire repositories, pools and the orchestrator
    let campaigns: Arc<dyn CampaignRepository> = Arc::new(CampaignRepositoryImpl::new(db.clone()));
    let batches: Arc<dyn BatchRepository> = Arc::new(BatchRepositoryImpl::new(db.clone()));
    let pools = Arc::new(WorkerPoolManager::new(
        settings.workers.clone(),
        campaigns.clone(),
    ));
    let orchestrator = Arc::new(QueueOrchestrator::new(
        &settings,
        campaigns,
        batches,
        pools,
        Arc::new(DryRunExecutor),
        Arc::new(PayloadRowSource),
    ));

    let recovered = orchestrator.recover_interrupted().await?;
    info!("Recovered {} interrupted campaigns", recovered);

    if let Some(path) = std::env::args().nth(1) {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read campaign file {}", path))?;
        let requests: Vec<CampaignRequest> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse campaign file {}", path))?;
        for request in requests {
            match orchestrator.enqueue(request).await {
                Ok(campaign) => info!("Enqueued campaign {}", campaign.id),
                Err(e) => warn!("Rejected campaign: {}", e),
            }
        }
    }

    // 5. Start periodic loops
    let scheduler = CampaignScheduler::new(orchestrator.clone());
    scheduler.start();

    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(err) => error!("Unable to listen for shutdown signal: {}", err),
    }

    scheduler.shutdown();
    match orchestrator.queue_status().await {
        Ok(status) => info!(
            queued = status.queued_count,
            active = status.active_count,
            "Shut down; in-progress campaigns resume on next start"
        ),
        Err(e) => warn!("Failed to read final queue status: {}", e),
    }

    Ok(())
}
