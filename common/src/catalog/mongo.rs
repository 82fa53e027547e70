// MongoDB catalog backend
//
// Change streams stand in for the changefeed contract: collections are
// created with pre- and post-images enabled so every record carries
// `old_val` alongside `new_val`.

use crate::catalog::condition::Condition;
use crate::catalog::{Catalog, Change, ChangeStream};
use crate::errors::CatalogError;
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use mongodb::change_stream::event::{ChangeStreamEvent, OperationType};
use mongodb::error::ErrorKind;
use mongodb::options::{
    ChangeStreamOptions, ChangeStreamPreAndPostImages, CreateCollectionOptions,
    FullDocumentBeforeChangeType, FullDocumentType,
};
use mongodb::Client;
use serde_json::Value;
use tracing::{info, instrument, warn};

const NAMESPACE_EXISTS: i32 = 48;

pub struct MongoCatalog {
    client: Client,
    default_db: String,
}

impl MongoCatalog {
    /// Connect to a single catalog address and verify it answers a
    /// ping, so discovery can move on to the next candidate on failure.
    #[instrument(skip_all, fields(address = %address))]
    pub async fn connect(address: &str, database: &str) -> Result<Self, CatalogError> {
        let uri = if address.contains("://") {
            address.to_string()
        } else {
            format!("mongodb://{address}")
        };

        let client = Client::with_uri_str(&uri)
            .await
            .map_err(|e| CatalogError::Connection(e.to_string()))?;

        client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| CatalogError::Connection(e.to_string()))?;

        info!("Connected to catalog");

        Ok(Self {
            client,
            default_db: database.to_string(),
        })
    }

    fn json_to_document(record: &Value) -> Result<Document, CatalogError> {
        bson::to_document(record).map_err(|e| CatalogError::WriteFailed(e.to_string()))
    }

    fn document_to_json(doc: &Document) -> Result<Value, CatalogError> {
        serde_json::to_value(doc).map_err(|e| CatalogError::ReadFailed(e.to_string()))
    }

    fn event_to_change(event: ChangeStreamEvent<Document>) -> Option<Result<Change, CatalogError>> {
        match event.operation_type {
            OperationType::Insert
            | OperationType::Update
            | OperationType::Replace
            | OperationType::Delete => {}
            OperationType::Drop | OperationType::DropDatabase | OperationType::Invalidate => {
                return Some(Err(CatalogError::StreamFailed(
                    "watched table was dropped".to_string(),
                )));
            }
            _ => return None,
        }

        let new_val = match event.full_document.as_ref().map(Self::document_to_json) {
            Some(Ok(value)) => Some(value),
            Some(Err(e)) => return Some(Err(e)),
            None => None,
        };

        let old_val = match event
            .full_document_before_change
            .as_ref()
            .map(Self::document_to_json)
        {
            Some(Ok(value)) => Some(value),
            Some(Err(e)) => return Some(Err(e)),
            // Pre-image missing (table predates image retention): fall
            // back to the document key so deletions still carry an id.
            None => event.document_key.as_ref().map(|key| {
                let id = match key.get("_id") {
                    Some(Bson::String(s)) => s.clone(),
                    Some(Bson::ObjectId(oid)) => oid.to_hex(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                serde_json::json!({ "id": id })
            }),
        };

        if old_val.is_none() && new_val.is_none() {
            return None;
        }
        Some(Ok(Change { old_val, new_val }))
    }
}

#[async_trait]
impl Catalog for MongoCatalog {
    async fn ensure_table(&self, table: &str) -> Result<(), CatalogError> {
        let options = CreateCollectionOptions::builder()
            .change_stream_pre_and_post_images(
                ChangeStreamPreAndPostImages::builder().enabled(true).build(),
            )
            .build();

        match self
            .client
            .database(&self.default_db)
            .create_collection(table, options)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => match *e.kind {
                ErrorKind::Command(ref command) if command.code == NAMESPACE_EXISTS => Ok(()),
                _ => Err(CatalogError::TableCreation(e.to_string())),
            },
        }
    }

    async fn snapshot(&self, table: &str) -> Result<Vec<Value>, CatalogError> {
        let cursor = self
            .client
            .database(&self.default_db)
            .collection::<Document>(table)
            .find(None, None)
            .await
            .map_err(|e| CatalogError::ReadFailed(e.to_string()))?;

        let docs: Vec<Document> = cursor
            .try_collect()
            .await
            .map_err(|e| CatalogError::ReadFailed(e.to_string()))?;

        docs.iter().map(Self::document_to_json).collect()
    }

    async fn watch(&self, table: &str) -> Result<ChangeStream, CatalogError> {
        let options = ChangeStreamOptions::builder()
            .full_document(Some(FullDocumentType::UpdateLookup))
            .full_document_before_change(Some(FullDocumentBeforeChangeType::WhenAvailable))
            .build();

        let stream = self
            .client
            .database(&self.default_db)
            .collection::<Document>(table)
            .watch([], options)
            .await
            .map_err(|e| CatalogError::StreamFailed(e.to_string()))?;

        let mapped = stream.filter_map(|event| async move {
            match event {
                Ok(event) => Self::event_to_change(event),
                Err(e) => Some(Err(CatalogError::StreamFailed(e.to_string()))),
            }
        });

        Ok(Box::pin(mapped))
    }

    async fn insert(&self, db: &str, table: &str, record: Value) -> Result<(), CatalogError> {
        let doc = Self::json_to_document(&record)?;
        self.client
            .database(db)
            .collection::<Document>(table)
            .insert_one(doc, None)
            .await
            .map_err(|e| CatalogError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    async fn update_where(
        &self,
        db: &str,
        table: &str,
        condition: &Condition,
        change: Value,
    ) -> Result<u64, CatalogError> {
        let filter = condition.to_bson(Utc::now());
        let patch = Self::json_to_document(&change)?;
        let result = self
            .client
            .database(db)
            .collection::<Document>(table)
            .update_many(filter, doc! { "$set": patch }, None)
            .await
            .map_err(|e| CatalogError::WriteFailed(e.to_string()))?;
        Ok(result.modified_count)
    }

    async fn delete_where(
        &self,
        db: &str,
        table: &str,
        condition: &Condition,
    ) -> Result<u64, CatalogError> {
        let filter = condition.to_bson(Utc::now());
        let result = self
            .client
            .database(db)
            .collection::<Document>(table)
            .delete_many(filter, None)
            .await
            .map_err(|e| CatalogError::WriteFailed(e.to_string()))?;

        if result.deleted_count > 0 {
            info!(db, table, deleted = result.deleted_count, "Deleted rows");
        }
        Ok(result.deleted_count)
    }

    async fn find_where(
        &self,
        db: &str,
        table: &str,
        condition: &Condition,
    ) -> Result<Vec<Value>, CatalogError> {
        let filter = condition.to_bson(Utc::now());
        let cursor = self
            .client
            .database(db)
            .collection::<Document>(table)
            .find(filter, None)
            .await
            .map_err(|e| {
                warn!(db, table, error = %e, "Filtered read failed");
                CatalogError::ReadFailed(e.to_string())
            })?;

        let docs: Vec<Document> = cursor
            .try_collect()
            .await
            .map_err(|e| CatalogError::ReadFailed(e.to_string()))?;

        docs.iter().map(Self::document_to_json).collect()
    }
}
