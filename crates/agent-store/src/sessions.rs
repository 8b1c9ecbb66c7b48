//! MongoDB Session Store
//!
//! One document per session:
//!
//! ```text
//! { _id: <session id>, messages: [Message, ...], created_at, updated_at }
//! ```
//!
//! Appends are a single `$push` with upsert, so each append is atomic on the
//! server. Ordering across appends comes from the per-session lock held by
//! `ConversationStore`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{self, doc};
use mongodb::options::ReturnDocument;
use mongodb::{Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};

use agent_core::{Message, Result as CoreResult, Session, SessionId, SessionStore, SessionSummary};

use crate::error::{Result, StoreError};

pub const SESSIONS_COLLECTION: &str = "sessions";

#[derive(Debug, Serialize, Deserialize)]
struct SessionDocument {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    messages: Vec<Message>,
    created_at: bson::DateTime,
    updated_at: bson::DateTime,
}

impl SessionDocument {
    fn into_session(self) -> Result<Session> {
        let Self {
            id,
            messages,
            created_at,
            updated_at,
        } = self;
        Session::from_parts(
            SessionId::from_string(id.clone()),
            messages,
            to_chrono(created_at),
            to_chrono(updated_at),
        )
        .map_err(|e| StoreError::Corrupt {
            id,
            detail: e.to_string(),
        })
    }
}

fn to_chrono(at: bson::DateTime) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or_default()
}

/// MongoDB-backed [`SessionStore`]
pub struct MongoSessionStore {
    db: Database,
    sessions: Collection<SessionDocument>,
}

impl MongoSessionStore {
    /// Sessions are stored in the `sessions` collection by default.
    pub fn new(db: &Database) -> Self {
        Self::with_collection(db, SESSIONS_COLLECTION)
    }

    pub fn with_collection(db: &Database, collection: &str) -> Self {
        Self {
            db: db.clone(),
            sessions: db.collection(collection),
        }
    }

    /// Ensure the listing index exists (idempotent).
    pub async fn ensure_indexes(&self) -> Result<()> {
        let index = IndexModel::builder().keys(doc! { "updated_at": -1 }).build();
        self.sessions.create_index(index).await?;
        Ok(())
    }

    async fn load_document(&self, id: &SessionId) -> Result<Session> {
        let now = bson::DateTime::now();
        let document = self
            .sessions
            .find_one_and_update(
                doc! { "_id": id.as_str() },
                doc! { "$setOnInsert": { "messages": [], "created_at": now, "updated_at": now } },
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await?;

        match document {
            Some(document) => document.into_session(),
            None => Ok(Session::new(id.clone())),
        }
    }

    async fn push_message(&self, id: &SessionId, message: &Message) -> Result<()> {
        let entry = bson::to_bson(message)?;
        let now = bson::DateTime::now();
        self.sessions
            .update_one(
                doc! { "_id": id.as_str() },
                doc! {
                    "$push": { "messages": entry },
                    "$set": { "updated_at": now },
                    "$setOnInsert": { "created_at": now },
                },
            )
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn messages(&self, id: &SessionId) -> Result<Vec<Message>> {
        let document = self.sessions.find_one(doc! { "_id": id.as_str() }).await?;
        Ok(document.map(|d| d.messages).unwrap_or_default())
    }

    async fn remove(&self, id: &SessionId) -> Result<()> {
        self.sessions.delete_one(doc! { "_id": id.as_str() }).await?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let documents: Vec<SessionDocument> = self
            .sessions
            .find(doc! {})
            .sort(doc! { "updated_at": -1 })
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .await?
            .try_collect()
            .await?;

        Ok(documents
            .into_iter()
            .filter_map(|document| match document.into_session() {
                Ok(session) => Some(session.summary()),
                Err(err) => {
                    tracing::warn!(error = %err, "Skipping unreadable session document");
                    None
                }
            })
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        self.db.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MongoSessionStore {
    async fn load(&self, id: &SessionId) -> CoreResult<Session> {
        Ok(self.load_document(id).await?)
    }

    async fn append(&self, id: &SessionId, message: &Message) -> CoreResult<()> {
        Ok(self.push_message(id, message).await?)
    }

    async fn snapshot(&self, id: &SessionId) -> CoreResult<Vec<Message>> {
        Ok(self.messages(id).await?)
    }

    async fn delete(&self, id: &SessionId) -> CoreResult<()> {
        Ok(self.remove(id).await?)
    }

    async fn list(&self, limit: usize) -> CoreResult<Vec<SessionSummary>> {
        Ok(self.recent(limit).await?)
    }

    async fn health_check(&self) -> CoreResult<bool> {
        match self.ping().await {
            Ok(()) => Ok(true),
            Err(err) => {
                tracing::warn!(error = %err, "MongoDB ping failed");
                Ok(false)
            }
        }
    }
}
