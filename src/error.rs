// =============================================================================
// Error taxonomy for the sync engine
// =============================================================================
//
// Errors are classified by how the engine reacts to them, not by their origin:
//   - TransientFetch: the feed misbehaved after bounded retries; the series
//     moves to Failed and the scheduler retries it on the next tick.
//   - Persistence:    a store read/write failed; bootstrap falls back to the
//     exchange path and the writer skips the sink for one cycle.
//   - Configuration:  unknown pair/period; surfaces as an empty result at the
//     query boundary, never as a crash.
// =============================================================================

/// Classified failure of a sync or replication operation.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Feed/network hiccup that persisted through the bounded retry budget.
    #[error("transient fetch error after {attempts} attempts: {source}")]
    TransientFetch {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// Store read or write failure.
    #[error("persistence error: {0}")]
    Persistence(#[source] anyhow::Error),

    /// Unknown pair, period, exchange, or sink kind.
    #[error("configuration error: {0}")]
    Configuration(String),
}
