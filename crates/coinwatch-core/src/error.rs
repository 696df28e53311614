//! Error types for the synchronization pipeline.

use thiserror::Error;

/// Errors that can occur while following the chain.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Chain source error: {0}")]
    Source(String),

    #[error("Chain source request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Chain changed under the scan at block {height}")]
    ChainMoved { height: u32 },

    #[error(
        "No common ancestor within {depth} blocks below height {tip}; \
         a rescan from below the fork is required"
    )]
    Desync { tip: u32, depth: usize },

    #[error("Ledger invariant violated for coin {outpoint}: {reason}")]
    Inconsistent { outpoint: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl SyncError {
    /// Returns `true` if the error is transient: the pass is abandoned without
    /// touching the ledger and retried on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Source(_) | Self::Timeout { .. } | Self::ChainMoved { .. }
        )
    }

    /// Returns `true` if the poll loop must stop.
    pub fn is_fatal(&self) -> bool {
        !self.is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(SyncError::Source("connection refused".into()).is_transient());
        assert!(SyncError::Timeout { ms: 100 }.is_transient());
        assert!(SyncError::ChainMoved { height: 7 }.is_transient());
        assert!(SyncError::Desync { tip: 10, depth: 5 }.is_fatal());
        assert!(SyncError::Storage("disk full".into()).is_fatal());
        assert!(SyncError::Inconsistent {
            outpoint: "aa:0".into(),
            reason: "spent before deposit".into(),
        }
        .is_fatal());
    }

    #[test]
    fn desync_message_names_remedy() {
        let msg = SyncError::Desync { tip: 120, depth: 6 }.to_string();
        assert!(msg.contains("120"));
        assert!(msg.contains("rescan"));
    }
}
