//! Dead-letter quarantine for rows the warehouse never accepted

use async_trait::async_trait;
use object_store::{
    gcp::GoogleCloudStorageBuilder, local::LocalFileSystem, path::Path, Attribute, Attributes,
    ObjectStore, PutOptions, PutPayload,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::QuarantineError;
use crate::transform::WarehouseRow;

/// Content type of dead-letter objects
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Where quarantined rows were written
#[derive(Debug, Clone, PartialEq)]
pub struct QuarantineReceipt {
    /// Object location inside the store
    pub location: String,
    /// Rows persisted
    pub rows: usize,
}

/// Durable destination for rows that could not be written
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Persist every row or fail. A failure means the rows are lost.
    async fn quarantine(&self, rows: &[WarehouseRow]) -> Result<QuarantineReceipt, QuarantineError>;
}

/// Dead-letter destination settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeadLetterSettings {
    /// GCS bucket; empty disables quarantine unless `local_path` is set
    pub bucket: String,
    /// Object name prefix
    pub prefix: String,
    /// Write to a local directory instead of GCS
    pub local_path: Option<PathBuf>,
}

impl Default for DeadLetterSettings {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            prefix: "dlq".to_string(),
            local_path: None,
        }
    }
}

impl DeadLetterSettings {
    /// Whether any destination is configured
    pub fn is_enabled(&self) -> bool {
        !self.bucket.is_empty() || self.local_path.is_some()
    }
}

/// Build the sink described by `settings`
pub fn build_sink(settings: &DeadLetterSettings) -> Result<Arc<dyn DeadLetterSink>, object_store::Error> {
    if let Some(path) = &settings.local_path {
        std::fs::create_dir_all(path).map_err(|e| object_store::Error::Generic {
            store: "LocalFileSystem",
            source: Box::new(e),
        })?;
        let store = LocalFileSystem::new_with_prefix(path)?;
        info!("Dead-letter rows go to local directory {}", path.display());
        return Ok(Arc::new(ObjectStoreDeadLetterSink::new(
            Arc::new(store),
            &settings.prefix,
        )));
    }

    if settings.bucket.is_empty() {
        error!("No dead-letter bucket configured: rows that fail all write attempts will be lost");
        return Ok(Arc::new(DisabledDeadLetterSink));
    }

    let store = GoogleCloudStorageBuilder::from_env()
        .with_bucket_name(&settings.bucket)
        .build()?;
    info!(
        "Dead-letter rows go to gs://{}/{}",
        settings.bucket, settings.prefix
    );
    Ok(Arc::new(
        ObjectStoreDeadLetterSink::new(Arc::new(store), &settings.prefix)
            .with_content_type(NDJSON_CONTENT_TYPE),
    ))
}

/// Writes one NDJSON object per quarantine call
#[derive(Debug, Clone)]
pub struct ObjectStoreDeadLetterSink {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    content_type: Option<&'static str>,
}

impl ObjectStoreDeadLetterSink {
    /// Create a sink writing under `prefix`
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str) -> Self {
        Self {
            store,
            prefix: prefix.trim_matches('/').to_string(),
            content_type: None,
        }
    }

    /// Tag objects with a content type (not every store supports attributes)
    pub fn with_content_type(mut self, content_type: &'static str) -> Self {
        self.content_type = Some(content_type);
        self
    }

    fn object_path(&self) -> Path {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let name = format!("failed_{}_{}.ndjson", millis, Uuid::new_v4().simple());
        if self.prefix.is_empty() {
            Path::from(name)
        } else {
            Path::from(format!("{}/{}", self.prefix, name))
        }
    }
}

/// One JSON object per row, newline terminated
pub fn encode_ndjson(rows: &[WarehouseRow]) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = Vec::with_capacity(rows.len() * 256);
    for row in rows {
        serde_json::to_writer(&mut out, &row.content)?;
        out.push(b'\n');
    }
    Ok(out)
}

#[async_trait]
impl DeadLetterSink for ObjectStoreDeadLetterSink {
    async fn quarantine(&self, rows: &[WarehouseRow]) -> Result<QuarantineReceipt, QuarantineError> {
        let path = self.object_path();
        if rows.is_empty() {
            return Ok(QuarantineReceipt {
                location: path.to_string(),
                rows: 0,
            });
        }

        let body = encode_ndjson(rows)?;
        let mut attributes = Attributes::new();
        if let Some(content_type) = self.content_type {
            attributes.insert(Attribute::ContentType, content_type.into());
        }
        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store
            .put_opts(&path, PutPayload::from(body), options)
            .await
            .map_err(|source| QuarantineError::Store {
                path: path.to_string(),
                source,
            })?;

        debug!("Quarantined {} rows to {}", rows.len(), path);
        Ok(QuarantineReceipt {
            location: path.to_string(),
            rows: rows.len(),
        })
    }
}

/// Sink used when no destination is configured. Never persists.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledDeadLetterSink;

#[async_trait]
impl DeadLetterSink for DisabledDeadLetterSink {
    async fn quarantine(&self, rows: &[WarehouseRow]) -> Result<QuarantineReceipt, QuarantineError> {
        error!(
            "Dead-letter sink disabled, {} rows cannot be quarantined",
            rows.len()
        );
        Err(QuarantineError::Disabled { rows: rows.len() })
    }
}
