use thiserror::Error;

/// Engine error taxonomy.
///
/// `Store` and `Transport` are caught and logged at the component boundary
/// that issued the call; the UI only ever sees `Validation` (rejected input,
/// returned synchronously) and the non-blocking send-failure warning carried
/// on the update stream.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Local persistence failure.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Remote read/write/subscribe failure. Treated as "no data this pass".
    #[error("transport error: {0}")]
    Transport(String),

    /// Rejected input: empty body, missing identifiers.
    #[error("validation error: {0}")]
    Validation(String),

    /// The engine actor has terminated and can no longer answer queries.
    #[error("engine is shut down")]
    Shutdown,
}

impl EngineError {
    pub fn transport(msg: impl Into<String>) -> Self {
        EngineError::Transport(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }
}
