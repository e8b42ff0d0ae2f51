//! Datastore error taxonomy.
//!
//! Readiness failures (`Connection`, `IndexCreation`) are settled once and
//! handed to every caller, so the error is `Clone` and carries rendered
//! causes rather than source errors.

/// Errors surfaced by the datastore.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DatastoreError {
    /// Connecting to the store or preparing the collection failed.
    #[error("Connection error! {0}")]
    Connection(String),
    /// Building the `sid` index on a freshly created collection failed.
    #[error("Error while creating index! {0}")]
    IndexCreation(String),
    /// Writing a snapshot failed.
    #[error("insert failed: {0}")]
    Insert(String),
    /// Reading snapshots failed.
    #[error("query failed: {0}")]
    Query(String),
    /// The source identifier was empty.
    #[error("source identifier must not be empty")]
    InvalidSource,
    /// The datastore configuration is invalid.
    #[error("invalid datastore config: {0}")]
    Config(String),
}

impl DatastoreError {
    /// Whether this error poisons the datastore instance for good.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::IndexCreation(_))
    }
}

/// Render an `anyhow` error with its whole cause chain.
pub(crate) fn describe(err: &anyhow::Error) -> String {
    format!("{err:#}")
}
