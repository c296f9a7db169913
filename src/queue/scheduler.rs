// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::queue::orchestrator::QueueOrchestrator;

/// 活动调度器
///
/// 驱动三个周期任务：派发、优先级老化和工作池再平衡
pub struct CampaignScheduler {
    orchestrator: Arc<QueueOrchestrator>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl CampaignScheduler {
    /// 创建新的活动调度器实例
    ///
    /// # 参数
    ///
    /// * `orchestrator` - 队列编排器
    pub fn new(orchestrator: Arc<QueueOrchestrator>) -> Self {
        Self {
            orchestrator,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// 启动调度器后台任务
    ///
    /// # 返回值
    ///
    /// 三个周期任务的中止句柄
    pub fn start(&self) -> Vec<AbortHandle> {
        let settings = self.orchestrator.settings().clone();

        let dispatch = {
            let orchestrator = self.orchestrator.clone();
            spawn_periodic("dispatch", settings.dispatch_interval_secs, move || {
                let orchestrator = orchestrator.clone();
                async move {
                    match orchestrator.dispatch_tick().await {
                        Ok(runs) if !runs.is_empty() => {
                            info!("Dispatched {} campaigns", runs.len())
                        }
                        Ok(_) => {}
                        Err(e) => error!("Dispatch tick failed: {}", e),
                    }
                }
            })
        };

        let aging = {
            let orchestrator = self.orchestrator.clone();
            spawn_periodic("aging", settings.aging_interval_secs, move || {
                let orchestrator = orchestrator.clone();
                async move {
                    if let Err(e) = orchestrator.age_priorities().await {
                        error!("Priority aging failed: {}", e);
                    }
                }
            })
        };

        let rebalance = {
            let orchestrator = self.orchestrator.clone();
            spawn_periodic("rebalance", settings.rebalance_interval_secs, move || {
                let orchestrator = orchestrator.clone();
                async move {
                    if let Err(e) = orchestrator.rebalance_pools().await {
                        error!("Pool rebalance failed: {}", e);
                    }
                }
            })
        };

        let handles = vec![dispatch, aging, rebalance];
        let aborts = handles.iter().map(JoinHandle::abort_handle).collect();
        self.handles.lock().extend(handles);

        info!(
            dispatch_secs = settings.dispatch_interval_secs,
            aging_secs = settings.aging_interval_secs,
            rebalance_secs = settings.rebalance_interval_secs,
            "Campaign scheduler started"
        );
        aborts
    }

    /// 是否有周期任务在运行
    pub fn is_running(&self) -> bool {
        self.handles.lock().iter().any(|handle| !handle.is_finished())
    }

    /// 停止所有周期任务，执行中的活动不受影响
    pub fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in &handles {
            handle.abort();
        }
        info!("Campaign scheduler stopped");
    }
}

fn spawn_periodic<F, Fut>(name: &'static str, period_secs: u64, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(period_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            tracing::trace!(task = name, "Scheduler tick");
            tick().await;
        }
    })
}
