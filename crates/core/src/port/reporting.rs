// Result-reporting channel (worker → scheduler)

use crate::domain::JobReport;
use crate::error::Result;
use async_trait::async_trait;

/// Where workers send job reports
///
/// `report` returning `Ok` means the report is durably recorded; workers only
/// acknowledge a queue message after that.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn report(&self, report: JobReport) -> Result<()>;
}

/// A recorded report not yet applied by the scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct PendingReport {
    pub id: i64,
    pub report: JobReport,
}

/// Scheduler side of a durable report channel
#[async_trait]
pub trait ReportSource: Send + Sync {
    /// Oldest unapplied reports, in recording order
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<PendingReport>>;

    async fn mark_applied(&self, id: i64) -> Result<()>;
}

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Sink that keeps every report
    #[derive(Default)]
    pub struct RecordingSink {
        reports: Mutex<Vec<JobReport>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reports(&self) -> Vec<JobReport> {
            self.reports.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReportSink for RecordingSink {
        async fn report(&self, report: JobReport) -> Result<()> {
            self.reports.lock().unwrap().push(report);
            Ok(())
        }
    }
}
