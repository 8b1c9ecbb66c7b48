//! # agent-store
//!
//! MongoDB persistence for the agent.
//!
//! ```text
//! ┌──────────────────────────── agent_db ────────────────────────────┐
//! │  sessions          ◄── MongoSessionStore   (conversation state)  │
//! │  lane_data, ...    ◄── MongoDocumentSource (query tools)         │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod documents;
pub mod error;
pub mod sessions;

pub use documents::MongoDocumentSource;
pub use error::{Result, StoreError};
pub use sessions::{MongoSessionStore, SESSIONS_COLLECTION};

use mongodb::{Client, Database};

/// MongoDB connection settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

impl MongoConfig {
    pub const DEFAULT_DATABASE: &'static str = "agent_db";

    /// Read `MONGODB_URI` / `MONGODB_DATABASE`; `None` when no URI is set
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>> {
        let Some(uri) = lookup("MONGODB_URI").filter(|uri| !uri.trim().is_empty()) else {
            return Ok(None);
        };
        let database = lookup("MONGODB_DATABASE").unwrap_or_else(|| Self::DEFAULT_DATABASE.to_string());
        if database.trim().is_empty() {
            return Err(StoreError::Config("MONGODB_DATABASE must not be empty".into()));
        }
        Ok(Some(Self { uri, database }))
    }

    /// Open a client and select the database
    pub async fn connect(&self) -> Result<Database> {
        let client = Client::with_uri_str(&self.uri).await?;
        tracing::info!(database = %self.database, "Connected to MongoDB");
        Ok(client.database(&self.database))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_unset_uri_means_in_memory() {
        assert_eq!(MongoConfig::from_lookup(lookup(&[])).unwrap(), None);
        assert_eq!(MongoConfig::from_lookup(lookup(&[("MONGODB_URI", " ")])).unwrap(), None);
    }

    #[test]
    fn test_database_default_and_override() {
        let config = MongoConfig::from_lookup(lookup(&[("MONGODB_URI", "mongodb://localhost:27017")]))
            .unwrap()
            .unwrap();
        assert_eq!(config.database, "agent_db");

        let config = MongoConfig::from_lookup(lookup(&[
            ("MONGODB_URI", "mongodb://db:27017"),
            ("MONGODB_DATABASE", "traffic"),
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(config.database, "traffic");

        let err = MongoConfig::from_lookup(lookup(&[("MONGODB_URI", "mongodb://db"), ("MONGODB_DATABASE", "")]))
            .unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }
}
