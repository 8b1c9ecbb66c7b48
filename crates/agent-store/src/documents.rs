//! MongoDB Document Source
//!
//! Backs the query and traffic-analytics tools with a live database.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::Database;
use serde_json::{Map, Value};

use agent_tools::source::{Accumulator, Aggregation, GroupKey, SortOrder, GROUP_KEY};
use agent_tools::{DocumentSource, SourceError};

use crate::error::StoreError;

/// Read-only view of one MongoDB database
pub struct MongoDocumentSource {
    db: Database,
    hidden: Vec<String>,
}

impl MongoDocumentSource {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            hidden: Vec::new(),
        }
    }

    /// Keep a collection out of listings and queries
    pub fn hiding(mut self, collection: impl Into<String>) -> Self {
        self.hidden.push(collection.into());
        self
    }

    fn is_visible(&self, name: &str) -> bool {
        !name.starts_with("system.") && !self.hidden.iter().any(|h| h == name)
    }

    async fn ensure_collection(&self, collection: &str) -> agent_tools::Result<()> {
        if self.list_collections().await?.iter().any(|name| name == collection) {
            Ok(())
        } else {
            Err(SourceError::CollectionNotFound(collection.to_string()))
        }
    }
}

/// Encode a JSON filter as a BSON query document
pub fn filter_document(filter: &Map<String, Value>) -> Result<Document, SourceError> {
    bson::to_document(filter).map_err(|e| SourceError::InvalidFilter(e.to_string()))
}

/// Render a stored document as relaxed extended JSON
pub fn document_json(document: Document) -> Value {
    Bson::Document(document).into_relaxed_extjson()
}

fn field_ref(path: &str) -> String {
    format!("${path}")
}

/// Translate an aggregation into a `$match`/`$group`/`$sort`/`$limit` pipeline
pub fn aggregation_pipeline(aggregation: &Aggregation) -> Result<Vec<Document>, SourceError> {
    let group_id = match &aggregation.group_by {
        GroupKey::All => Bson::Null,
        GroupKey::Field(path) => Bson::String(field_ref(path)),
        GroupKey::HourOf(path) => Bson::Document(doc! {
            "$hour": { "$convert": { "input": field_ref(path), "to": "date", "onError": Bson::Null, "onNull": Bson::Null } }
        }),
    };

    let mut group = doc! { "_id": group_id };
    for metric in &aggregation.metrics {
        let reduction = match &metric.accumulator {
            Accumulator::Avg(path) => doc! { "$avg": field_ref(path) },
            Accumulator::Sum(path) => doc! { "$sum": field_ref(path) },
            Accumulator::Min(path) => doc! { "$min": field_ref(path) },
            Accumulator::Max(path) => doc! { "$max": field_ref(path) },
            Accumulator::Count => doc! { "$sum": 1 },
        };
        group.insert(metric.name.clone(), reduction);
    }

    let mut pipeline = vec![doc! { "$match": filter_document(&aggregation.filter)? }, doc! { "$group": group }];
    if let Some((field, order)) = &aggregation.sort {
        let direction = match order {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        };
        let mut sort = Document::new();
        sort.insert(field.clone(), direction);
        sort.insert("_id", 1);
        pipeline.push(doc! { "$sort": sort });
    }
    if let Some(limit) = aggregation.limit {
        pipeline.push(doc! { "$limit": i64::try_from(limit).unwrap_or(i64::MAX) });
    }
    Ok(pipeline)
}

/// Render a `$group` output row with its `_id` moved to the group key field
pub fn group_row(mut row: Document) -> Value {
    let key = row.remove("_id").unwrap_or(Bson::Null);
    let mut value = document_json(row);
    if let Value::Object(fields) = &mut value {
        fields.insert(GROUP_KEY.to_string(), key.into_relaxed_extjson());
    }
    value
}

#[async_trait]
impl DocumentSource for MongoDocumentSource {
    async fn list_collections(&self) -> agent_tools::Result<Vec<String>> {
        let mut names = self
            .db
            .list_collection_names()
            .await
            .map_err(StoreError::from)?;
        names.retain(|name| self.is_visible(name));
        names.sort();
        Ok(names)
    }

    async fn find(&self, collection: &str, filter: &Map<String, Value>, limit: usize) -> agent_tools::Result<Vec<Value>> {
        self.ensure_collection(collection).await?;

        let query = filter_document(filter)?;
        let documents: Vec<Document> = self
            .db
            .collection::<Document>(collection)
            .find(query)
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .await
            .map_err(StoreError::from)?
            .try_collect()
            .await
            .map_err(StoreError::from)?;

        tracing::debug!(collection, returned = documents.len(), "MongoDB find");
        Ok(documents.into_iter().map(document_json).collect())
    }

    async fn aggregate(&self, collection: &str, aggregation: &Aggregation) -> agent_tools::Result<Vec<Value>> {
        self.ensure_collection(collection).await?;

        let pipeline = aggregation_pipeline(aggregation)?;
        let rows: Vec<Document> = self
            .db
            .collection::<Document>(collection)
            .aggregate(pipeline)
            .await
            .map_err(StoreError::from)?
            .try_collect()
            .await
            .map_err(StoreError::from)?;

        tracing::debug!(collection, groups = rows.len(), "MongoDB aggregate");
        Ok(rows.into_iter().map(group_row).collect())
    }

    async fn distinct(&self, collection: &str, path: &str, filter: &Map<String, Value>) -> agent_tools::Result<Vec<Value>> {
        self.ensure_collection(collection).await?;

        let values = self
            .db
            .collection::<Document>(collection)
            .distinct(path, filter_document(filter)?)
            .await
            .map_err(StoreError::from)?;
        Ok(values.into_iter().map(Bson::into_relaxed_extjson).collect())
    }

    async fn health_check(&self) -> bool {
        self.db.run_command(bson::doc! { "ping": 1 }).await.is_ok()
    }

    fn name(&self) -> &str {
        "mongodb"
    }
}
