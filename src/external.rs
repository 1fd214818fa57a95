//! §6 External interfaces: the three collaborators the host application
//! supplies. This crate ships only the trait surface — no concrete
//! Transport/Store/MailOut implementation, since HTTP auth/redirects,
//! local storage, and mail composition are all out of scope (§4 Non-goals).
//!
//! `SyncDriver` (in `sync.rs`) is generic over these three traits rather
//! than using `dyn` objects, since native `async fn` in traits is not
//! object-safe on stable — static dispatch costs nothing here and the host
//! application picks its concrete types once, at construction time.

use crate::calendar::{Event, SelfAttendeeStatus};
use crate::contacts::Contact;
use crate::email::Message;
use crate::error::SyncCoreError;
use crate::models::{ChangeBatch, Collection, LocalId, SyncInterval, SyncKey};

/// Per-collection persisted cursor (§6 "Persisted state").
#[derive(Debug, Clone)]
pub struct PersistedCollectionState {
    pub sync_key: SyncKey,
    pub sync_interval: SyncInterval,
}

/// Provides `post(requestBytes) -> responseBytes`, handling authentication,
/// redirection, and HTTP-status mapping. The core consumes only the
/// response body (§6).
pub trait Transport: Send + Sync {
    async fn post(&self, collection: &Collection, request_bytes: Vec<u8>) -> anyhow::Result<Vec<u8>>;
}

/// Row identity is an opaque 64-bit local id (§6). One method pair per
/// collection's batch shape; everything else is collection-agnostic.
pub trait Store: Send + Sync {
    async fn get_sync_key(&self, collection_id: &str) -> anyhow::Result<Option<PersistedCollectionState>>;
    async fn set_sync_key(&self, collection_id: &str, state: PersistedCollectionState) -> anyhow::Result<()>;

    /// "If the envelope contained Status=3, wipe the collection (delete all
    /// locally-owned rows for that collection's sync scope) and reset key
    /// to 0" (§4.H).
    async fn wipe_collection(&self, collection_id: &str) -> anyhow::Result<()>;

    async fn query(&self, collection: &Collection, selection: &str) -> anyhow::Result<Vec<LocalId>>;

    async fn apply_email_batch(&self, batch: ChangeBatch<Message>) -> Result<Vec<LocalId>, SyncCoreError>;
    async fn apply_contacts_batch(&self, batch: ChangeBatch<Contact>) -> Result<Vec<LocalId>, SyncCoreError>;
    async fn apply_calendar_batch(&self, batch: ChangeBatch<Event>) -> Result<Vec<LocalId>, SyncCoreError>;

    async fn mark_dirty(&self, id: LocalId) -> anyhow::Result<()>;
    async fn clear_dirty(&self, id: LocalId) -> anyhow::Result<()>;
}

/// What kind of meeting-invite email to compose, independent of the
/// calendar-module enum that decided it applies — kept separate so this
/// trait doesn't force every host application to depend on `calendar`'s
/// internal event representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailOutFlag {
    Invite,
    Reply(SelfAttendeeStatus),
    CancelAttendee { email: String },
    CancelAll,
}

/// Accepts `(event-id, flag, client-id, account)` and independently
/// composes and queues the outgoing invite/reply/cancel email (§6).
pub trait MailOut: Send + Sync {
    async fn enqueue(
        &self,
        event_id: LocalId,
        flag: MailOutFlag,
        client_id: Option<String>,
        account: &str,
    ) -> anyhow::Result<()>;
}

#[cfg(feature = "test-util")]
pub mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory `Store`/`Transport`/`MailOut` triple for the integration
    /// tests: deterministic, no I/O, atomic within the `Mutex`.
    #[derive(Default)]
    pub struct MemoryStore {
        pub states: Mutex<HashMap<String, PersistedCollectionState>>,
        pub next_id: Mutex<i64>,
        pub wiped: Mutex<Vec<String>>,
        pub dirty: Mutex<Vec<LocalId>>,
    }

    impl MemoryStore {
        fn alloc_ids(&self, n: usize) -> Vec<LocalId> {
            let mut next = self.next_id.lock().unwrap();
            let start = *next;
            *next += n as i64;
            (0..n as i64).map(|i| LocalId(start + i)).collect()
        }
    }

    impl Store for MemoryStore {
        async fn get_sync_key(&self, collection_id: &str) -> anyhow::Result<Option<PersistedCollectionState>> {
            Ok(self.states.lock().unwrap().get(collection_id).cloned())
        }

        async fn set_sync_key(&self, collection_id: &str, state: PersistedCollectionState) -> anyhow::Result<()> {
            self.states.lock().unwrap().insert(collection_id.to_string(), state);
            Ok(())
        }

        async fn wipe_collection(&self, collection_id: &str) -> anyhow::Result<()> {
            self.wiped.lock().unwrap().push(collection_id.to_string());
            Ok(())
        }

        async fn query(&self, _collection: &Collection, _selection: &str) -> anyhow::Result<Vec<LocalId>> {
            Ok(Vec::new())
        }

        async fn apply_email_batch(&self, batch: ChangeBatch<Message>) -> Result<Vec<LocalId>, SyncCoreError> {
            Ok(self.alloc_ids(batch.len()))
        }

        async fn apply_contacts_batch(&self, batch: ChangeBatch<Contact>) -> Result<Vec<LocalId>, SyncCoreError> {
            Ok(self.alloc_ids(batch.len()))
        }

        async fn apply_calendar_batch(&self, batch: ChangeBatch<Event>) -> Result<Vec<LocalId>, SyncCoreError> {
            Ok(self.alloc_ids(batch.len()))
        }

        async fn mark_dirty(&self, id: LocalId) -> anyhow::Result<()> {
            self.dirty.lock().unwrap().push(id);
            Ok(())
        }

        async fn clear_dirty(&self, id: LocalId) -> anyhow::Result<()> {
            self.dirty.lock().unwrap().retain(|d| *d != id);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct ScriptedTransport {
        pub responses: Mutex<std::collections::VecDeque<Vec<u8>>>,
        pub requests_seen: Mutex<Vec<Vec<u8>>>,
    }

    impl Transport for ScriptedTransport {
        async fn post(&self, _collection: &Collection, request_bytes: Vec<u8>) -> anyhow::Result<Vec<u8>> {
            self.requests_seen.lock().unwrap().push(request_bytes);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("scripted transport ran out of responses"))
        }
    }

    #[derive(Default)]
    pub struct RecordingMailOut {
        pub enqueued: Mutex<Vec<(LocalId, MailOutFlag)>>,
    }

    impl MailOut for RecordingMailOut {
        async fn enqueue(
            &self,
            event_id: LocalId,
            flag: MailOutFlag,
            _client_id: Option<String>,
            _account: &str,
        ) -> anyhow::Result<()> {
            self.enqueued.lock().unwrap().push((event_id, flag));
            Ok(())
        }
    }
}
