//! WBXML codec plus the per-collection Sync protocol state machine and
//! reconciliation engine for Exchange ActiveSync: decodes incoming
//! token-stream change payloads into typed domain records, generates
//! outgoing change payloads from locally dirtied records, enforces the
//! sync-key protocol and recovers from protocol faults, and reconciles
//! two-way edits including recurring-event exceptions and meeting-invite
//! side-effects.
//!
//! Transport, local storage, and mail composition are supplied by the
//! host application through the traits in `external`; this crate ships no
//! concrete implementation of any of them.

pub mod calendar;
pub mod cancel;
pub mod config;
pub mod contacts;
pub mod email;
pub mod error;
pub mod external;
pub mod models;
pub mod reconcile;
pub mod rrule_engine;
pub mod sync;
pub mod token_table;
pub mod wbxml;

pub use cancel::CancelToken;
pub use error::{Result, SyncCoreError};
pub use models::{ChangeBatch, ChangeRecord, Collection, CollectionClass, LocalId, ParentRef, SyncInterval, SyncKey};

/// Installs a fmt subscriber for the duration of the test process, gated on
/// `RUST_LOG` (default `warn`). Safe to call from every test: subsequent
/// calls after the first are no-ops.
#[cfg(test)]
pub(crate) fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}
