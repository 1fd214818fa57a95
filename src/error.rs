//! Error taxonomy for the sync core, per the error handling design.
//!
//! Field-level parse errors inside a known element are swallowed by the
//! collection parsers (skip the field, keep going) — only structural
//! failures surface as one of the variants below.

use thiserror::Error;

/// The five dispositions a sync cycle can end in.
#[derive(Debug, Error)]
pub enum SyncCoreError {
    /// Malformed WBXML: unexpected byte, unterminated string, depth underflow.
    /// Aborts the current sync; the sync-key is not advanced.
    #[error("decode error: {0}")]
    Decode(String),

    /// Well-formed WBXML but the wrong element shape (unexpected root,
    /// missing mandatory child). Same disposition as `Decode`.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server's numeric `<Status>` for this collection.
    #[error("server status {0}")]
    ServerStatus(u32),

    /// The store's `applyBatch` failed; the batch is discarded and the
    /// sync-key is not advanced.
    #[error("store error: {0}")]
    Store(String),

    /// Cooperative abort via `stop()`. No state change.
    #[error("cancelled")]
    Cancelled,
}

impl SyncCoreError {
    /// True when the caller should leave the persisted sync-key untouched.
    pub fn blocks_key_advance(&self) -> bool {
        true // every variant in this enum blocks advancement; only a clean commit advances it
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        SyncCoreError::Decode(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        SyncCoreError::Protocol(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, SyncCoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_blocks_key_advance() {
        let errs = vec![
            SyncCoreError::decode("x"),
            SyncCoreError::protocol("x"),
            SyncCoreError::ServerStatus(8),
            SyncCoreError::Store("boom".into()),
            SyncCoreError::Cancelled,
        ];
        for e in errs {
            assert!(e.blocks_key_advance());
        }
    }
}
