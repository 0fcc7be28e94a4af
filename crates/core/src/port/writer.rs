// Item Writer Port

use crate::domain::Item;
use async_trait::async_trait;
use thiserror::Error;

/// Writer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriterError {
    /// The sink refused (part of) a batch; `accepted` items of it were stored
    #[error("batch rejected after {accepted} items: {reason}")]
    Rejected { accepted: usize, reason: String },

    /// The sink could not be reached
    #[error("writer unavailable: {0}")]
    Unavailable(String),
}

/// Sink for decoded items
///
/// Batches arrive in production order; a writer must not reorder them.
#[async_trait]
pub trait ItemWriter: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Persist a batch, returning how many items were accepted
    async fn write(&self, items: &[Item]) -> Result<usize, WriterError>;

    /// Force buffered items out
    async fn flush(&self) -> Result<(), WriterError>;
}

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Records every batch; can be told to reject the Nth call
    #[derive(Default)]
    pub struct RecordingWriter {
        calls: Mutex<Vec<Vec<Item>>>,
        fail_on_call: Mutex<Option<usize>>,
        flushes: Mutex<usize>,
    }

    impl RecordingWriter {
        pub fn new() -> Self {
            Self::default()
        }

        /// Reject the write attempted after `n - 1` successful batches, once
        pub fn failing_on_call(n: usize) -> Self {
            let writer = Self::default();
            writer.set_fail_on_call(Some(n));
            writer
        }

        pub fn set_fail_on_call(&self, n: Option<usize>) {
            *self.fail_on_call.lock().unwrap() = n;
        }

        /// Successful batches, in call order
        pub fn batches(&self) -> Vec<Vec<Item>> {
            self.calls.lock().unwrap().clone()
        }

        /// Item IDs of every successful batch, flattened
        pub fn written_ids(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .flatten()
                .map(|item| item.id.clone())
                .collect()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn flush_count(&self) -> usize {
            *self.flushes.lock().unwrap()
        }
    }

    #[async_trait]
    impl ItemWriter for RecordingWriter {
        fn name(&self) -> &str {
            "recording"
        }

        async fn write(&self, items: &[Item]) -> Result<usize, WriterError> {
            let mut calls = self.calls.lock().unwrap();
            let attempt = calls.len() + 1;
            let mut fail_on_call = self.fail_on_call.lock().unwrap();
            if *fail_on_call == Some(attempt) {
                *fail_on_call = None;
                return Err(WriterError::Rejected {
                    accepted: 0,
                    reason: format!("scripted failure on call {}", attempt),
                });
            }
            calls.push(items.to_vec());
            Ok(items.len())
        }

        async fn flush(&self) -> Result<(), WriterError> {
            *self.flushes.lock().unwrap() += 1;
            Ok(())
        }
    }
}
