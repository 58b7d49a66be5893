/// Domain-level error type shared by all core components.
///
/// The api crate maps these onto HTTP responses: `NotFound` -> 404,
/// `InvalidState` -> 409, `Validation` -> 400, `Internal` -> 500.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Shorthand for a session-scoped `NotFound`.
    pub fn session_not_found(id: &str) -> Self {
        CoreError::NotFound {
            entity: "Session",
            id: id.to_string(),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Internal(err.to_string())
    }
}
