// Periodic background tasks: store maintenance and continuous updates

use crate::application::scheduler::Scheduler;
use crate::application::worker::ShutdownToken;
use crate::error::Result;
use crate::port::{Maintenance, MaintenanceConfig};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// One round of a recurring chore
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run_once(&self) -> Result<()>;
}

/// Run `task` every `period` (first round right away) until shutdown
///
/// A failed round is logged; the next one still happens.
pub async fn run_periodic(
    task: Arc<dyn PeriodicTask>,
    period: Duration,
    mut shutdown: ShutdownToken,
) {
    info!(task = task.name(), period_secs = period.as_secs(), "Periodic task started");
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {},
            _ = shutdown.wait() => break,
        }
        if let Err(e) = task.run_once().await {
            error!(task = task.name(), error = %e, "Periodic task failed");
        }
    }
    info!(task = task.name(), "Periodic task stopped");
}

/// GC of old jobs, settled messages and applied reports, VACUUM when large
pub struct MaintenanceTask {
    maintenance: Arc<dyn Maintenance>,
    config: MaintenanceConfig,
}

impl MaintenanceTask {
    pub fn new(maintenance: Arc<dyn Maintenance>, config: MaintenanceConfig) -> Self {
        Self {
            maintenance,
            config,
        }
    }
}

#[async_trait]
impl PeriodicTask for MaintenanceTask {
    fn name(&self) -> &'static str {
        "maintenance"
    }

    async fn run_once(&self) -> Result<()> {
        self.maintenance
            .run_full_maintenance(&self.config)
            .await
            .map(|_| ())
    }
}

/// Schedules the due jobs of repositories registered with an update interval
pub struct ContinuousUpdates {
    scheduler: Arc<Scheduler>,
}

impl ContinuousUpdates {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl PeriodicTask for ContinuousUpdates {
    fn name(&self) -> &'static str {
        "continuous updates"
    }

    async fn run_once(&self) -> Result<()> {
        let scheduled = self.scheduler.schedule_due_updates().await?;
        debug!(scheduled = scheduled.len(), "Due updates checked");
        Ok(())
    }
}
