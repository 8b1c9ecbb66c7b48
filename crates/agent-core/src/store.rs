//! Conversation State Store
//!
//! [`SessionStore`] is the persistence contract. [`ConversationStore`] wraps
//! any backend with a per-session lock table so that a whole
//! load → append → append … sequence for one session runs single-writer,
//! while different sessions proceed independently.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::error::Result;
use crate::message::Message;
use crate::retry::RetryPolicy;
use crate::session::{Session, SessionId, SessionSummary};

/// Session store trait for persistence
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session, creating an empty one if it does not exist
    async fn load(&self, id: &SessionId) -> Result<Session>;

    /// Append one message to the session's history
    async fn append(&self, id: &SessionId, message: &Message) -> Result<()>;

    /// Copy of the session's messages in append order (empty if unknown)
    async fn snapshot(&self, id: &SessionId) -> Result<Vec<Message>>;

    /// Delete a session
    async fn delete(&self, id: &SessionId) -> Result<()>;

    /// Most recently updated sessions first
    async fn list(&self, limit: usize) -> Result<Vec<SessionSummary>>;

    /// Check the backing store is reachable
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// In-memory session store (for development/testing)
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &SessionId) -> Result<Session> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions
            .entry(id.clone())
            .or_insert_with(|| Session::new(id.clone()))
            .clone())
    }

    async fn append(&self, id: &SessionId, message: &Message) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(id.clone())
            .or_insert_with(|| Session::new(id.clone()))
            .push(message.clone())
    }

    async fn snapshot(&self, id: &SessionId) -> Result<Vec<Message>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(id)
            .map(|s| s.messages().to_vec())
            .unwrap_or_default())
    }

    async fn delete(&self, id: &SessionId) -> Result<()> {
        self.sessions.write().await.remove(id);
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        let sessions = self.sessions.read().await;
        let mut result: Vec<SessionSummary> = sessions.values().map(Session::summary).collect();

        // Sort by updated_at descending
        result.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        result.truncate(limit);

        Ok(result)
    }
}

type LockTable = Arc<DashMap<SessionId, Arc<Mutex<()>>>>;

fn release(locks: &LockTable, id: &SessionId) {
    // only the table still references the mutex: nobody holds or awaits it
    locks.remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
}

/// Serializing front for any [`SessionStore`]
#[derive(Clone)]
pub struct ConversationStore {
    backend: Arc<dyn SessionStore>,
    locks: LockTable,
    retry: RetryPolicy,
}

impl ConversationStore {
    pub fn new(backend: Arc<dyn SessionStore>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            locks: Arc::new(DashMap::new()),
            retry,
        }
    }

    pub fn backend(&self) -> &Arc<dyn SessionStore> {
        &self.backend
    }

    /// Lock the session and load it (creating it if missing)
    pub async fn open(&self, id: SessionId) -> Result<SessionHandle> {
        let lock = self
            .locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        let guard = lock.lock_owned().await;

        let backend = &self.backend;
        let id_ref = &id;
        let loaded = self.retry.run("store.load", move || backend.load(id_ref)).await;

        match loaded {
            Ok(session) => Ok(SessionHandle {
                session,
                backend: self.backend.clone(),
                retry: self.retry.clone(),
                locks: self.locks.clone(),
                guard: Some(guard),
            }),
            Err(err) => {
                drop(guard);
                release(&self.locks, &id);
                Err(err)
            }
        }
    }

    /// Read-only copy of a session's messages
    pub async fn snapshot(&self, id: &SessionId) -> Result<Vec<Message>> {
        let backend = &self.backend;
        self.retry.run("store.snapshot", move || backend.snapshot(id)).await
    }

    /// Delete a session, waiting for any in-flight run on it to finish
    pub async fn delete(&self, id: &SessionId) -> Result<()> {
        let handle = self.open(id.clone()).await?;
        let backend = &self.backend;
        let result = self.retry.run("store.delete", move || backend.delete(id)).await;
        drop(handle);
        result
    }

    pub async fn list(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        let backend = &self.backend;
        self.retry.run("store.list", move || backend.list(limit)).await
    }

    /// Number of sessions currently locked or awaited
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }
}

/// Exclusive access to one session for the lifetime of the handle
pub struct SessionHandle {
    session: Session,
    backend: Arc<dyn SessionStore>,
    retry: RetryPolicy,
    locks: LockTable,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SessionHandle {
    pub fn id(&self) -> &SessionId {
        &self.session.id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn messages(&self) -> &[Message] {
        self.session.messages()
    }

    /// Validate, persist, then record the message locally
    pub async fn append(&mut self, message: Message) -> Result<()> {
        self.session.check_append(&message)?;

        let backend = &self.backend;
        let id = &self.session.id;
        let msg = &message;
        self.retry.run("store.append", move || backend.append(id, msg)).await?;

        self.session.push(message)
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        drop(self.guard.take());
        release(&self.locks, &self.session.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::tool::{ToolCallRequest, ToolCallResult};
    use serde_json::json;
    use std::time::Duration;

    fn store() -> ConversationStore {
        ConversationStore::new(Arc::new(MemorySessionStore::new()), RetryPolicy::none())
    }

    #[tokio::test]
    async fn test_load_missing_creates_empty_session() {
        let store = store();
        let handle = store.open(SessionId::from_string("fresh")).await.unwrap();
        assert!(handle.session().is_empty());
        assert_eq!(handle.id().as_str(), "fresh");
    }

    #[tokio::test]
    async fn test_append_and_snapshot_order() {
        let store = store();
        let id = SessionId::from_string("s1");
        let call = ToolCallRequest::new("call_1", "datetime", json!({}));

        {
            let mut handle = store.open(id.clone()).await.unwrap();
            handle.append(Message::user("hi")).await.unwrap();
            handle.append(Message::tool_request("", call.clone())).await.unwrap();
            handle
                .append(Message::tool_result(ToolCallResult::success(&call, json!("noon"))))
                .await
                .unwrap();
        }

        let snapshot = store.snapshot(&id).await.unwrap();
        let roles: Vec<String> = snapshot.iter().map(|m| m.role.to_string()).collect();
        assert_eq!(roles, ["user", "assistant", "tool"]);
        assert_eq!(store.active_locks(), 0);
    }

    #[tokio::test]
    async fn test_integrity_violation_is_not_persisted() {
        let store = store();
        let id = SessionId::new();
        let mut handle = store.open(id.clone()).await.unwrap();

        let orphan = ToolCallResult::success(&ToolCallRequest::new("ghost", "x", json!({})), json!(1));
        let err = handle.append(Message::tool_result(orphan)).await.unwrap_err();
        assert!(matches!(err, AgentError::SessionIntegrity(_)));
        drop(handle);

        assert!(store.snapshot(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_session_writers_do_not_interleave() {
        let store = store();
        let id = SessionId::from_string("shared");

        let mut tasks = Vec::new();
        for writer in ["a", "b"] {
            let store = store.clone();
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                let mut handle = store.open(id).await.unwrap();
                for n in 0..3 {
                    handle.append(Message::user(format!("{writer}{n}"))).await.unwrap();
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let contents: Vec<String> = store
            .snapshot(&id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents.len(), 6);
        let first = &contents[0][..1];
        assert!(contents[..3].iter().all(|c| c.starts_with(first)));
        assert!(contents[3..].iter().all(|c| !c.starts_with(first)));
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let store = store();
        for name in ["one", "two"] {
            let mut handle = store.open(SessionId::from_string(name)).await.unwrap();
            handle.append(Message::user(name)).await.unwrap();
        }

        assert_eq!(store.list(10).await.unwrap().len(), 2);
        assert_eq!(store.list(1).await.unwrap().len(), 1);

        store.delete(&SessionId::from_string("one")).await.unwrap();
        let remaining = store.list(10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id.as_str(), "two");
    }
}
