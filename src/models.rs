//! Component-free shared data model: §3 of the spec minus the
//! calendar-specific `Event`/`Exception`/`Attendee` types, which live in
//! `calendar.rs` next to the code that builds and consumes them.

use std::fmt;

/// An opaque 64-bit local row id assigned by the Store collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub i64);

/// Server-issued opaque cursor for a collection. `"0"` is the reserved
/// initial value; a non-`"0"` key only becomes authoritative once the
/// server acknowledges the payload that carried it (§3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncKey(String);

impl SyncKey {
    pub fn initial() -> Self {
        SyncKey("0".to_string())
    }

    pub fn from_str(s: impl Into<String>) -> Self {
        SyncKey(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_initial(&self) -> bool {
        self.0 == "0"
    }
}

impl Default for SyncKey {
    fn default() -> Self {
        SyncKey::initial()
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A collection's poll cadence. `Push` auto-becomes `Ping` after the first
/// successful sync that yielded any sync-key (§3 transition rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncInterval {
    Push,
    Ping,
    Minutes(u32),
}

impl SyncInterval {
    pub fn after_first_success_with_key(self) -> Self {
        match self {
            SyncInterval::Push => SyncInterval::Ping,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionClass {
    Email,
    Contacts,
    Calendar,
}

impl CollectionClass {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            CollectionClass::Email => "Email",
            CollectionClass::Contacts => "Contacts",
            CollectionClass::Calendar => "Calendar",
        }
    }
}

/// A (server-id, type, sync-key, sync-interval, local-folder-id) record.
#[derive(Debug, Clone)]
pub struct Collection {
    pub server_id: String,
    pub class: CollectionClass,
    pub sync_key: SyncKey,
    pub sync_interval: SyncInterval,
    pub local_folder_id: LocalId,
}

impl Collection {
    pub fn new(server_id: impl Into<String>, class: CollectionClass, local_folder_id: LocalId) -> Self {
        Collection {
            server_id: server_id.into(),
            class,
            sync_key: SyncKey::initial(),
            sync_interval: SyncInterval::Push,
            local_folder_id,
        }
    }
}

/// Either a concrete already-committed row, or a pointer to the insert op
/// at the given index within the same `ChangeBatch`, resolved by the
/// executor against the ordered result list the Store returns from
/// `applyBatch` (§4.H "Back-references").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentRef {
    Existing(LocalId),
    Pending(usize),
}

/// A tagged union {Add, Change, Delete, Fetch} (§3 "Change Record").
/// Add/Change carry a server-id and, only for adds awaiting server
/// acknowledgement, a client-id. Delete and Fetch carry only the server-id.
#[derive(Debug, Clone)]
pub enum ChangeRecord<T> {
    Add {
        client_id: Option<String>,
        server_id: Option<String>,
        data: T,
    },
    Change {
        server_id: String,
        data: T,
    },
    Delete {
        server_id: String,
    },
    Fetch {
        server_id: String,
    },
}

impl<T> ChangeRecord<T> {
    pub fn server_id(&self) -> Option<&str> {
        match self {
            ChangeRecord::Add { server_id, .. } => server_id.as_deref(),
            ChangeRecord::Change { server_id, .. } => Some(server_id),
            ChangeRecord::Delete { server_id } => Some(server_id),
            ChangeRecord::Fetch { server_id } => Some(server_id),
        }
    }
}

/// An ordered sequence of operations against the local store, built by a
/// parser during one commandsParser pass, executed atomically at commit.
/// Push order is preserved; the index returned by `push` is a valid
/// `ParentRef::Pending` for any later op added to the same batch.
#[derive(Debug, Clone)]
pub struct ChangeBatch<T> {
    pub ops: Vec<ChangeRecord<T>>,
}

impl<T> Default for ChangeBatch<T> {
    fn default() -> Self {
        ChangeBatch { ops: Vec::new() }
    }
}

impl<T> ChangeBatch<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an op and returns its index, usable as a positional
    /// back-reference by subsequent ops in the same batch.
    pub fn push(&mut self, record: ChangeRecord<T>) -> usize {
        self.ops.push(record);
        self.ops.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_key_initial_lifecycle() {
        let k = SyncKey::initial();
        assert!(k.is_initial());
        let k2 = SyncKey::from_str("{abc}");
        assert!(!k2.is_initial());
        assert_eq!(k2.as_str(), "{abc}");
    }

    #[test]
    fn push_auto_becomes_ping_after_first_success() {
        assert_eq!(SyncInterval::Push.after_first_success_with_key(), SyncInterval::Ping);
        assert_eq!(
            SyncInterval::Minutes(15).after_first_success_with_key(),
            SyncInterval::Minutes(15)
        );
    }

    #[test]
    fn batch_push_returns_stable_index_for_back_refs() {
        let mut batch: ChangeBatch<&str> = ChangeBatch::new();
        let parent_idx = batch.push(ChangeRecord::Add {
            client_id: Some("c1".into()),
            server_id: None,
            data: "event",
        });
        let child_ref = ParentRef::Pending(parent_idx);
        batch.push(ChangeRecord::Add {
            client_id: None,
            server_id: None,
            data: "attendee",
        });
        assert_eq!(parent_idx, 0);
        assert_eq!(child_ref, ParentRef::Pending(0));
        assert_eq!(batch.len(), 2);
    }
}
