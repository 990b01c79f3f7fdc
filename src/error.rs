use thiserror::Error;

/// Failures at the store boundary. `NotFound` is only an error where the
/// contract says so (single-attachment deletion); chat loads treat absence
/// as an empty result instead.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    #[error("storage i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Failures surfaced by `Orchestrator::submit` itself. Terminal turn states
/// (completed, cancelled, stream failure) are outcomes, not errors.
#[derive(Debug, Error)]
pub enum TurnError {
    /// A second submission arrived while a stream was in flight.
    #[error("a turn is already in flight")]
    TurnInFlight,

    /// The pre-turn persist of the user message failed; no stream was
    /// attempted.
    #[error("failed to persist user turn: {0}")]
    PersistUserTurn(#[source] StoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
