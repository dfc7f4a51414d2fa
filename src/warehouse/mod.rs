//! Warehouse boundary
//!
//! The pipeline only needs one capability from the warehouse: submit a set
//! of keyed rows and learn which of them were rejected. [`WarehouseClient`]
//! captures that; [`bigquery::BigQueryClient`] implements it over the
//! BigQuery streaming REST API.

pub mod bigquery;
pub mod writer;

pub use bigquery::{BigQueryClient, BigQuerySettings};
pub use writer::{BatchWriter, WriteOutcome};

use async_trait::async_trait;

use crate::error::WriteError;
use crate::transform::WarehouseRow;

/// One row the warehouse refused, by position in the submitted slice
#[derive(Debug, Clone, PartialEq)]
pub struct RowRejection {
    /// Index into the submitted rows
    pub index: usize,
    /// Warehouse supplied reason
    pub reason: String,
}

/// Result of a submission the warehouse processed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertResponse {
    /// Rows that were not written; empty on full success
    pub rejected: Vec<RowRejection>,
}

impl InsertResponse {
    /// Whether every submitted row was accepted
    pub fn is_success(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Row insertion capability
#[async_trait]
pub trait WarehouseClient: Send + Sync {
    /// Submit rows. `Err` means nothing is known to be written.
    async fn insert_rows(&self, rows: &[WarehouseRow]) -> Result<InsertResponse, WriteError>;
}
