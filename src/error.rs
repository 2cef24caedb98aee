// Error taxonomy: the conditions callers actually branch on.
//
// Most of the crate returns anyhow::Result. The variants here are attached
// to those errors (anyhow::Error::new / .context) so the ingestion loop and
// the command handlers can tell a benign duplicate insert from a dead store
// by downcasting through the chain.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    /// The timeline feed failed mid-sequence.
    #[error("timeline fetch failed: {0}")]
    FetchFailed(String),

    /// A single item could not be classified, admitted or persisted.
    #[error("failed to process {url}: {reason}")]
    ItemProcessing { url: String, reason: String },

    /// A relay record with this content id already exists.
    #[error("relay record {0} already exists")]
    DuplicateKey(String),

    /// The outbound transport rejected a job.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// The durable store could not be reached.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Too many consecutive item or fetch errors within one pass.
    #[error("error budget exceeded after {0} consecutive errors")]
    ErrorBudgetExceeded(u32),
}

/// Every `RelayError` attached to `err`, either as a source in the chain
/// or as a context layer.
fn relay_errors(err: &anyhow::Error) -> impl Iterator<Item = &RelayError> {
    err.downcast_ref::<RelayError>()
        .into_iter()
        .chain(err.chain().filter_map(|e| e.downcast_ref::<RelayError>()))
}

/// True if the error carries a `DuplicateKey`.
pub fn is_duplicate_key(err: &anyhow::Error) -> bool {
    relay_errors(err).any(|e| matches!(e, RelayError::DuplicateKey(_)))
}

/// True if the error carries a `StoreUnavailable`.
pub fn is_store_unavailable(err: &anyhow::Error) -> bool {
    relay_errors(err).any(|e| matches!(e, RelayError::StoreUnavailable(_)))
}
