use thiserror::Error;

/// Failure reported by a rule implementation.
///
/// The engine rolls back the enclosing block transaction on any of these;
/// nothing the rules did before failing becomes visible.
#[derive(Debug, Error)]
pub enum RulesError {
    /// The rules rejected the block or move data.
    #[error("rules rejected input: {0}")]
    Rejected(String),

    /// The state blob could not be decoded by the rules.
    #[error("malformed game state: {0}")]
    BadState(String),

    /// The undo blob did not match the block being detached.
    #[error("malformed undo data: {0}")]
    BadUndo(String),

    /// Failure in the rules' own backing store (table-storage variant).
    #[error("rules storage operation failed: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl RulesError {
    /// Wraps an arbitrary error from the rules' backing store.
    pub fn backend<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        RulesError::Backend(Box::new(err))
    }
}
