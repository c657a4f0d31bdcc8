//! 轮询调度：快速检查定时器 + 全量同步定时器
//!
//! 两个定时器相互独立。触发时若已有同步进行中则直接跳过，不排队。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::domain::errors::SyncError;
use crate::domain::model::{PollOutcome, SyncTrigger};
use crate::domain::service::SyncEngine;

/// 调度参数
#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub quick_check_interval: Duration,
    pub full_sync_interval: Duration,
    pub full_sync_initial_delay: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            quick_check_interval: Duration::from_secs(10),
            full_sync_interval: Duration::from_secs(15 * 60),
            full_sync_initial_delay: Duration::from_secs(60),
        }
    }
}

struct RunningTimers {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

pub struct PollScheduler {
    engine: Arc<SyncEngine>,
    settings: SchedulerSettings,
    running: Mutex<Option<RunningTimers>>,
}

impl PollScheduler {
    pub fn new(engine: Arc<SyncEngine>, settings: SchedulerSettings) -> Self {
        Self {
            engine,
            settings,
            running: Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// 启动（或重新挂载）两个定时器
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if let Some(previous) = running.take() {
            debug!("re-arming poll timers");
            stop_timers(previous).await;
        }

        let cancel = CancellationToken::new();
        let quick = tokio::spawn(quick_check_loop(
            self.engine.clone(),
            self.settings.quick_check_interval,
            cancel.clone(),
        ));
        let full = tokio::spawn(full_sync_loop(
            self.engine.clone(),
            self.settings.full_sync_initial_delay,
            self.settings.full_sync_interval,
            cancel.clone(),
        ));

        info!(
            quick_check_secs = self.settings.quick_check_interval.as_secs(),
            full_sync_secs = self.settings.full_sync_interval.as_secs(),
            "poll scheduler started"
        );
        *running = Some(RunningTimers {
            cancel,
            handles: vec![quick, full],
        });
    }

    /// 取消定时器并等待其退出
    pub async fn suspend(&self) {
        let mut running = self.running.lock().await;
        if let Some(timers) = running.take() {
            stop_timers(timers).await;
            info!("poll scheduler suspended");
        }
    }
}

async fn stop_timers(timers: RunningTimers) {
    timers.cancel.cancel();
    for handle in timers.handles {
        if let Err(err) = handle.await {
            warn!(error = %err, "poll timer task ended abnormally");
        }
    }
}

async fn quick_check_loop(engine: Arc<SyncEngine>, period: Duration, cancel: CancellationToken) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    outcome = engine.check_remote_changes() => outcome,
                };
                match outcome {
                    PollOutcome::Pulled { last_sync_time } => {
                        info!(last_sync_time, "remote changes pulled");
                    }
                    other => trace!(?other, "quick check finished"),
                }
            }
        }
    }
}

async fn full_sync_loop(
    engine: Arc<SyncEngine>,
    initial_delay: Duration,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + initial_delay, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    result = engine.full_sync(SyncTrigger::Background) => result,
                };
                match result {
                    Ok(_) => {}
                    Err(SyncError::SyncInProgress) => debug!("scheduled sync skipped, already running"),
                    Err(err) if err.is_auth() => debug!("scheduled sync skipped, not authenticated"),
                    Err(err) => warn!(error = %err, "scheduled sync failed"),
                }
            }
        }
    }
}
