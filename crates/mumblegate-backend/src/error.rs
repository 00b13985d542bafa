//! Error types for the backend layer.

/// Errors a [`BackendAuthenticator`](crate::BackendAuthenticator) can
/// report.
///
/// Only [`AuthRefused`](Self::AuthRefused) is a normal outcome; the rest
/// mean the backend could not answer. An unknown user is not an error at
/// all, it's `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The user exists and the password is wrong.
    #[error("credentials rejected")]
    AuthRefused,

    /// The user database (or another resource the backend depends on)
    /// could not be reached or returned garbage.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend's settings are invalid.
    #[error("invalid backend configuration: {0}")]
    Config(String),

    /// No backend is registered under this kind name.
    #[error("unknown backend kind {0:?}")]
    UnknownKind(String),
}

impl BackendError {
    /// Whether this error means "could not answer", as opposed to a
    /// definitive refusal.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }
}

/// Errors from a database connection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DbError {
    /// Could not open a connection.
    #[error("database connect failed: {0}")]
    Connect(String),

    /// The connection died while in use. It must not be reused.
    #[error("database connection lost: {0}")]
    ConnectionLost(String),

    /// The statement failed but the connection is still usable.
    #[error("query failed: {0}")]
    Query(String),

    /// A result column had an unexpected type or was missing.
    #[error("unexpected value in column {index}: {reason}")]
    Column { index: usize, reason: String },
}

impl DbError {
    /// Whether the error concerns the connection itself rather than the
    /// statement. Fatal errors discard the connection and are worth one
    /// retry on a fresh one.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DbError::Connect(_) | DbError::ConnectionLost(_))
    }
}

impl From<DbError> for BackendError {
    fn from(err: DbError) -> Self {
        BackendError::Unavailable(err.to_string())
    }
}
