// Report listener: applies reports recorded by out-of-process workers

use crate::application::worker::constants::REPORT_BATCH_SIZE;
use crate::application::worker::ShutdownToken;
use crate::error::Result;
use crate::port::{ReportSink, ReportSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

pub struct ReportListener {
    source: Arc<dyn ReportSource>,
    sink: Arc<dyn ReportSink>,
    poll_interval: Duration,
}

impl ReportListener {
    pub fn new(
        source: Arc<dyn ReportSource>,
        sink: Arc<dyn ReportSink>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            sink,
            poll_interval,
        }
    }

    /// Apply every pending report, oldest first
    ///
    /// A report whose application fails stays pending and stops the pass, so
    /// reports of one job are never applied out of order.
    pub async fn drain(&self) -> Result<usize> {
        let mut applied = 0;
        loop {
            let pending = self.source.fetch_pending(REPORT_BATCH_SIZE).await?;
            if pending.is_empty() {
                return Ok(applied);
            }
            for entry in pending {
                self.sink.report(entry.report).await?;
                self.source.mark_applied(entry.id).await?;
                applied += 1;
            }
        }
    }

    /// Poll until shutdown
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(poll_ms = self.poll_interval.as_millis() as u64, "Report listener started");
        loop {
            if shutdown.is_shutdown() {
                break;
            }
            if let Err(e) = self.drain().await {
                error!(error = %e, "Applying worker reports failed");
            }
            tokio::select! {
                _ = sleep(self.poll_interval) => {},
                _ = shutdown.wait() => break,
            }
        }
        info!("Report listener stopped");
    }
}
