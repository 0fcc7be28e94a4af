// Writer that accepts and drops everything (writer = "none")
use async_trait::async_trait;
use quarry_core::domain::Item;
use quarry_core::port::{ItemWriter, WriterError};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct DiscardWriter {
    discarded: AtomicU64,
}

impl DiscardWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ItemWriter for DiscardWriter {
    fn name(&self) -> &str {
        "none"
    }

    async fn write(&self, items: &[Item]) -> Result<usize, WriterError> {
        self.discarded.fetch_add(items.len() as u64, Ordering::Relaxed);
        Ok(items.len())
    }

    async fn flush(&self) -> Result<(), WriterError> {
        Ok(())
    }
}
