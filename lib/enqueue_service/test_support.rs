use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Notify;

use super::types::{SinkError, StoreError};
use super::{BacklogSink, SessionStore};
use crate::session_state::{
    BacklogOperation, EnqueueingSession, IdentifierRecord, SessionStateError,
};

/// Scripted in-memory session store.
///
/// Entity instances are fixed at construction as identifier lists in scan
/// order; sessions live in a guarded map. Fetch delay and one-shot
/// failures let tests pin interleaving and abort behavior.
pub(super) struct MemorySessionStore {
    sessions: Mutex<BTreeMap<String, EnqueueingSession>>,
    instances: HashMap<String, Vec<String>>,
    identifying: HashMap<String, String>,
    fetch_delay: Mutex<Option<Duration>>,
    fetch_started: Notify,
    fail_next_fetch: AtomicBool,
    fail_next_save: AtomicBool,
}

impl MemorySessionStore {
    pub(super) fn new(entities: Vec<(&str, &str, Vec<&str>)>) -> Self {
        let mut instances = HashMap::new();
        let mut identifying = HashMap::new();
        for (entity_type, id_property, ids) in entities {
            instances.insert(
                entity_type.to_string(),
                ids.into_iter().map(str::to_string).collect(),
            );
            identifying.insert(entity_type.to_string(), id_property.to_string());
        }
        Self {
            sessions: Mutex::new(BTreeMap::new()),
            instances,
            identifying,
            fetch_delay: Mutex::new(None),
            fetch_started: Notify::new(),
            fail_next_fetch: AtomicBool::new(false),
            fail_next_save: AtomicBool::new(false),
        }
    }

    pub(super) fn session(&self, entity_type: &str) -> Option<EnqueueingSession> {
        self.sessions
            .lock()
            .expect("sessions mutex poisoned")
            .get(entity_type)
            .cloned()
    }

    pub(super) fn session_count(&self) -> usize {
        self.sessions.lock().expect("sessions mutex poisoned").len()
    }

    pub(super) fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().expect("fetch_delay mutex poisoned") = Some(delay);
    }

    pub(super) fn fail_next_fetch(&self) {
        self.fail_next_fetch.store(true, Ordering::SeqCst);
    }

    pub(super) fn fail_next_save(&self) {
        self.fail_next_save.store(true, Ordering::SeqCst);
    }

    /// Resolves once an identifier fetch has entered the store.
    pub(super) async fn wait_fetch_started(&self) {
        self.fetch_started.notified().await;
    }
}

impl SessionStore for MemorySessionStore {
    fn find_session<'a>(
        &'a self,
        entity_type: &'a str,
    ) -> BoxFuture<'a, Result<Option<EnqueueingSession>, StoreError>> {
        Box::pin(async move { Ok(self.session(entity_type)) })
    }

    fn save_session<'a>(
        &'a self,
        session: &'a EnqueueingSession,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            if self.fail_next_save.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Connection(
                    "scripted save failure".to_string(),
                ));
            }
            self.sessions
                .lock()
                .expect("sessions mutex poisoned")
                .insert(session.entity_type.clone(), session.clone());
            Ok(())
        })
    }

    fn delete_session<'a>(
        &'a self,
        entity_type: &'a str,
    ) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            Ok(self
                .sessions
                .lock()
                .expect("sessions mutex poisoned")
                .remove(entity_type)
                .is_some())
        })
    }

    fn first_active_session<'a>(
        &'a self,
    ) -> BoxFuture<'a, Result<Option<EnqueueingSession>, StoreError>> {
        Box::pin(async move {
            Ok(self
                .sessions
                .lock()
                .expect("sessions mutex poisoned")
                .values()
                .find(|session| session.status == crate::session_state::SessionStatus::Active)
                .cloned())
        })
    }

    fn list_identifiers<'a>(
        &'a self,
        entity_type: &'a str,
        ordering_property: &'a str,
        after: Option<&'a str>,
        limit: i64,
    ) -> BoxFuture<'a, Result<Vec<IdentifierRecord>, StoreError>> {
        Box::pin(async move {
            self.fetch_started.notify_one();

            let delay = *self.fetch_delay.lock().expect("fetch_delay mutex poisoned");
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if self.fail_next_fetch.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Connection(
                    "scripted fetch failure".to_string(),
                ));
            }

            if limit <= 0 {
                return Err(StoreError::State(SessionStateError::InvalidInput(format!(
                    "limit must be > 0, got {limit}"
                ))));
            }

            let expected = self
                .identifying
                .get(entity_type)
                .ok_or_else(|| StoreError::UnknownEntityType(entity_type.to_string()))?;
            if expected != ordering_property {
                return Err(StoreError::State(SessionStateError::InvalidInput(format!(
                    "unexpected ordering property `{ordering_property}`"
                ))));
            }

            let ids = self
                .instances
                .get(entity_type)
                .ok_or_else(|| StoreError::UnknownEntityType(entity_type.to_string()))?;

            // Instance lists are in scan order; strictly-greater resumes
            // right past the cursor's position.
            let start = match after {
                None => 0,
                Some(cursor) => ids
                    .iter()
                    .position(|id| id == cursor)
                    .map(|pos| pos + 1)
                    .unwrap_or(ids.len()),
            };

            Ok(ids
                .iter()
                .skip(start)
                .take(limit as usize)
                .map(|id| IdentifierRecord {
                    identifier: id.clone(),
                    ordering_value: id.clone(),
                })
                .collect())
        })
    }

    fn identifying_property<'a>(
        &'a self,
        entity_type: &'a str,
    ) -> BoxFuture<'a, Result<String, StoreError>> {
        Box::pin(async move {
            self.identifying
                .get(entity_type)
                .cloned()
                .ok_or_else(|| StoreError::UnknownEntityType(entity_type.to_string()))
        })
    }
}

/// Recording in-memory backlog sink with scripted append failure.
#[derive(Default)]
pub(super) struct MemoryBacklogSink {
    entries: Mutex<Vec<(String, String, BacklogOperation)>>,
    fail_at_len: Mutex<Option<usize>>,
}

impl MemoryBacklogSink {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Fails the first append attempted once `len` entries are recorded;
    /// earlier entries are kept and the script clears after tripping.
    pub(super) fn fail_when_len_reaches(&self, len: usize) {
        *self.fail_at_len.lock().expect("fail_at_len mutex poisoned") = Some(len);
    }

    pub(super) fn len(&self) -> usize {
        self.entries.lock().expect("entries mutex poisoned").len()
    }

    pub(super) fn identifiers_for(&self, entity_type: &str) -> Vec<String> {
        self.entries
            .lock()
            .expect("entries mutex poisoned")
            .iter()
            .filter(|(recorded_type, _, _)| recorded_type == entity_type)
            .map(|(_, identifier, _)| identifier.clone())
            .collect()
    }

    pub(super) fn operations(&self) -> Vec<BacklogOperation> {
        self.entries
            .lock()
            .expect("entries mutex poisoned")
            .iter()
            .map(|(_, _, operation)| *operation)
            .collect()
    }
}

impl BacklogSink for MemoryBacklogSink {
    fn enqueue<'a>(
        &'a self,
        entity_type: &'a str,
        identifier: &'a str,
        operation: BacklogOperation,
    ) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            let mut entries = self.entries.lock().expect("entries mutex poisoned");

            let mut fail_at_len = self.fail_at_len.lock().expect("fail_at_len mutex poisoned");
            if fail_at_len.is_some_and(|len| entries.len() >= len) {
                *fail_at_len = None;
                return Err(SinkError::Connection(
                    "scripted append failure".to_string(),
                ));
            }
            drop(fail_at_len);

            entries.push((
                entity_type.to_string(),
                identifier.to_string(),
                operation,
            ));
            Ok(())
        })
    }
}
