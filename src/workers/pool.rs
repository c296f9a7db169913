// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use metrics::gauge;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::domain::models::campaign::ExecutionMode;

/// 工作池错误类型
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PoolError {
    #[error("Pool size {requested} exceeds the worker budget {budget}")]
    ExceedsBudget { requested: usize, budget: usize },
}

/// 工作池状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolState {
    pub desired_size: usize,
    pub active_count: usize,
    pub pending_queue_depth: usize,
}

/// 执行池
///
/// 同一模式的活动共享的有限并发。缩容不会打断执行中的活动，
/// 只是在执行数回落到新容量以下之前不再发放新的槽位。
#[derive(Debug)]
pub struct ExecutionPool {
    mode: ExecutionMode,
    budget: usize,
    size: AtomicUsize,
    active: Arc<AtomicUsize>,
    pending: AtomicUsize,
}

/// 执行槽位
///
/// 持有期间占用池中的一个并发名额，释放时自动归还
#[derive(Debug)]
pub struct PoolSlot {
    mode: ExecutionMode,
    active: Arc<AtomicUsize>,
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        let remaining = self.active.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        gauge!("worker_pool_active", "mode" => self.mode.as_str()).set(remaining as f64);
    }
}

impl ExecutionPool {
    /// 创建新的执行池
    ///
    /// # 参数
    ///
    /// * `mode` - 执行模式
    /// * `size` - 初始容量
    /// * `budget` - 容量上限（两个池共享的总预算）
    pub fn new(mode: ExecutionMode, size: usize, budget: usize) -> Self {
        gauge!("worker_pool_size", "mode" => mode.as_str()).set(size as f64);
        Self {
            mode,
            budget,
            size: AtomicUsize::new(size.min(budget)),
            active: Arc::new(AtomicUsize::new(0)),
            pending: AtomicUsize::new(0),
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// 记录本轮派发中因容量不足而等待的活动数量
    pub fn set_pending(&self, depth: usize) {
        self.pending.store(depth, Ordering::Release);
        gauge!("worker_pool_pending", "mode" => self.mode.as_str()).set(depth as f64);
    }

    /// 是否还有空闲槽位
    pub fn has_capacity(&self) -> bool {
        self.active_count() < self.size()
    }

    pub fn available(&self) -> usize {
        self.size().saturating_sub(self.active_count())
    }

    /// 尝试占用一个槽位
    ///
    /// # 返回值
    ///
    /// 池已满时返回 `None`
    pub fn try_acquire(&self) -> Option<PoolSlot> {
        let size = self.size();
        let acquired = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < size).then_some(active + 1)
            });

        match acquired {
            Ok(previous) => {
                gauge!("worker_pool_active", "mode" => self.mode.as_str())
                    .set((previous + 1) as f64);
                Some(PoolSlot {
                    mode: self.mode,
                    active: self.active.clone(),
                })
            }
            Err(_) => None,
        }
    }

    /// 在槽位内执行任务，任务结束时槽位归还
    pub fn spawn<F>(&self, slot: PoolSlot, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let _slot = slot;
            task.await;
        })
    }

    /// 调整池容量
    pub fn resize(&self, new_size: usize) -> Result<(), PoolError> {
        if new_size > self.budget {
            return Err(PoolError::ExceedsBudget {
                requested: new_size,
                budget: self.budget,
            });
        }
        self.size.store(new_size, Ordering::Release);
        gauge!("worker_pool_size", "mode" => self.mode.as_str()).set(new_size as f64);
        Ok(())
    }

    pub fn state(&self) -> PoolState {
        PoolState {
            desired_size: self.size(),
            active_count: self.active_count(),
            pending_queue_depth: self.pending(),
        }
    }
}
