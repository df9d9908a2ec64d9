// MongoDB backend - persists data point batches to a collection
//
// This module is responsible for:
// 1. Verifying the MongoDB connection when the pipeline starts
// 2. Optionally creating the recommended time-series index
// 3. Inserting each batch as one document per data point

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::Backend;
use crate::config::MongoConfig;
use crate::error::BoxError;
use crate::point::{DataPoint, FieldValue};

/// MongoDB storage backend
///
/// Every data point becomes one document in the configured collection.
///
/// # Document Structure
/// ```json
/// {
///   "name": "memory",
///   "tags": { "node": "1111-1111" },
///   "fields": { "used_mb": 8192, "used_percent": 50.0 },
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
pub struct MongoBackend {
    /// MongoDB client for database operations
    client: Client,

    /// Database name where data points are stored
    database_name: String,

    /// Collection receiving the documents
    collection_name: String,

    /// Whether to create indexes on initialize
    create_indexes: bool,

    healthy: AtomicBool,
}

impl MongoBackend {
    /// Creates a new MongoBackend instance
    ///
    /// The backend reports unhealthy until `initialize` has verified the connection.
    ///
    /// # Arguments
    /// * `client` - MongoDB client (may be shared with the settings source)
    /// * `config` - Database, collection and index settings
    pub fn new(client: &Client, config: &MongoConfig) -> Self {
        MongoBackend {
            client: client.clone(),
            database_name: config.database.clone(),
            collection_name: config.collection.clone(),
            create_indexes: config.create_indexes,
            healthy: AtomicBool::new(false),
        }
    }

    fn collection(&self) -> Collection<Document> {
        self.client
            .database(&self.database_name)
            .collection(&self.collection_name)
    }

    /// Creates recommended indexes for the data point collection
    ///
    /// # Recommended Indexes
    /// - `name` + `timestamp` (compound) - For querying one series over time
    pub async fn create_indexes(&self) -> Result<(), BoxError> {
        info!("Creating indexes for collection '{}'", self.collection_name);

        let index = IndexModel::builder()
            .keys(doc! {
                "name": 1,
                "timestamp": -1  // Descending for most recent first
            })
            .options(
                IndexOptions::builder()
                    .name("name_timestamp_idx".to_string())
                    .build(),
            )
            .build();

        match self.collection().create_index(index, None).await {
            Ok(_) => {
                info!(
                    "Successfully created indexes for collection '{}'",
                    self.collection_name
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to create indexes for collection '{}': {}",
                    self.collection_name, e
                );
                Err(Box::new(e))
            }
        }
    }
}

#[async_trait]
impl Backend for MongoBackend {
    fn name(&self) -> &str {
        "mongodb"
    }

    async fn initialize(&self, scope: &CancellationToken) -> Result<(), BoxError> {
        let database = self.client.database(&self.database_name);
        tokio::select! {
            biased;
            _ = scope.cancelled() => return Err("mongodb initialize cancelled".into()),
            result = database.run_command(doc! { "ping": 1 }, None) => result?,
        };

        if self.create_indexes {
            tokio::select! {
                biased;
                _ = scope.cancelled() => return Err("mongodb index creation cancelled".into()),
                result = self.create_indexes() => result?,
            };
        }

        self.healthy.store(true, Ordering::SeqCst);
        info!(
            database = %self.database_name,
            collection = %self.collection_name,
            "mongodb backend initialized"
        );
        Ok(())
    }

    async fn write(&self, scope: &CancellationToken, batch: &[DataPoint]) -> Result<(), BoxError> {
        let documents: Vec<Document> = batch.iter().map(point_to_document).collect();

        debug!(
            "Storing {} data point(s) to collection '{}'",
            documents.len(),
            self.collection_name
        );

        let collection = self.collection();
        let result = tokio::select! {
            biased;
            _ = scope.cancelled() => return Err("mongodb write cancelled".into()),
            result = collection.insert_many(documents, None) => result?,
        };

        debug!(
            "Stored {} document(s) in collection '{}'",
            result.inserted_ids.len(),
            self.collection_name
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), BoxError> {
        self.healthy.store(false, Ordering::SeqCst);
        info!("mongodb backend closed");
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

/// Converts a data point into the stored document layout
fn point_to_document(point: &DataPoint) -> Document {
    let tags: Document = point
        .tag_set()
        .iter()
        .map(|(k, v)| (k.clone(), Bson::String(v.clone())))
        .collect();

    let fields: Document = point
        .field_set()
        .iter()
        .map(|(k, v)| (k.clone(), field_to_bson(v)))
        .collect();

    doc! {
        "name": point.name(),
        "tags": tags,
        "fields": fields,
        "timestamp": point.timestamp(),
    }
}

fn field_to_bson(value: &FieldValue) -> Bson {
    match value {
        FieldValue::Float(v) => Bson::Double(*v),
        FieldValue::Int(v) => Bson::Int64(*v),
        // BSON has no unsigned type; values beyond i64 fall back to a double
        FieldValue::UInt(v) => i64::try_from(*v)
            .map(Bson::Int64)
            .unwrap_or(Bson::Double(*v as f64)),
        FieldValue::Bool(v) => Bson::Boolean(*v),
        FieldValue::Str(v) => Bson::String(v.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;
    use tokio::time::timeout;

    async fn unreachable_backend() -> MongoBackend {
        // Nothing listens on port 1; the driver connects lazily
        let client = Client::with_uri_str("mongodb://127.0.0.1:1/?serverSelectionTimeoutMS=30000")
            .await
            .unwrap();
        MongoBackend::new(&client, &MongoConfig::default())
    }

    #[tokio::test]
    async fn test_initialize_stops_on_cancelled_scope() {
        let backend = unreachable_backend().await;
        let scope = CancellationToken::new();
        scope.cancel();

        let result = timeout(Duration::from_secs(1), backend.initialize(&scope))
            .await
            .expect("initialize should return promptly once cancelled");
        assert!(result.is_err());
        assert!(!backend.is_healthy());
    }

    #[tokio::test]
    async fn test_write_stops_on_cancelled_scope() {
        let backend = unreachable_backend().await;
        let scope = CancellationToken::new();
        let canceller = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let batch = vec![DataPoint::new("cpu").field("usage", 1i64)];
        let result = timeout(Duration::from_secs(2), backend.write(&scope, &batch))
            .await
            .expect("write should return promptly once cancelled");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("cancelled"), "unexpected error: {err}");
    }

    #[test]
    fn test_point_to_document() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let point = DataPoint::new("memory")
            .tag("node", "1111-1111")
            .field("used_mb", 8192i64)
            .field("used_percent", 50.0)
            .field("huge", u64::MAX)
            .field("swapping", false)
            .at(ts);

        let document = point_to_document(&point);

        assert_eq!(document.get_str("name").unwrap(), "memory");
        assert_eq!(
            document.get_document("tags").unwrap().get_str("node").unwrap(),
            "1111-1111"
        );

        let fields = document.get_document("fields").unwrap();
        assert_eq!(fields.get_i64("used_mb").unwrap(), 8192);
        assert_eq!(fields.get_f64("used_percent").unwrap(), 50.0);
        assert_eq!(fields.get_f64("huge").unwrap(), u64::MAX as f64);
        assert!(!fields.get_bool("swapping").unwrap());

        let stored = document.get_datetime("timestamp").unwrap();
        assert_eq!(stored.timestamp_millis(), ts.timestamp_millis());
    }
}
