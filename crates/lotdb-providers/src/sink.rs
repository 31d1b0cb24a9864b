//! Where collected sale records go.

use async_trait::async_trait;
use lotdb_core::{CollectionJob, Provider};

use crate::error::SinkError;
use crate::types::SaleRecord;

/// Destination for normalized sale records. Called once per fetched page,
/// before that page's checkpoint is saved; an error leaves the cursor
/// where it was so the page is fetched again.
#[async_trait]
pub trait SaleSink: Send + Sync {
    async fn store(
        &self,
        job: &CollectionJob,
        provider: Provider,
        records: &[SaleRecord],
    ) -> Result<(), SinkError>;
}

/// Logs page sizes and discards the records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl SaleSink for TracingSink {
    async fn store(
        &self,
        job: &CollectionJob,
        provider: Provider,
        records: &[SaleRecord],
    ) -> Result<(), SinkError> {
        tracing::info!(
            job_id = %job.id,
            %provider,
            records = records.len(),
            "sale records collected"
        );
        Ok(())
    }
}

/// Keeps every record in memory for assertions in tests.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Default)]
pub struct MemorySink {
    records: std::sync::Mutex<Vec<SaleRecord>>,
}

#[cfg(any(test, feature = "test-util"))]
impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn records(&self) -> Vec<SaleRecord> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl SaleSink for MemorySink {
    async fn store(
        &self,
        _job: &CollectionJob,
        _provider: Provider,
        records: &[SaleRecord],
    ) -> Result<(), SinkError> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .extend_from_slice(records);
        Ok(())
    }
}
