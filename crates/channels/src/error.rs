use std::error::Error as StdError;

/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed channel errors shared across channel traits.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input payload or parameter is invalid.
    #[error("invalid channel input: {message}")]
    InvalidInput { message: String },

    /// A requested session is not configured.
    #[error("unknown channel session: {session}")]
    UnknownSession { session: String },

    /// Operation is currently unavailable (no driver, client not running).
    #[error("channel operation unavailable: {message}")]
    Unavailable { message: String },

    /// The external client could not start because a previous instance still
    /// holds an OS-level lock or process for this session. Retryable after
    /// cleanup.
    #[error("channel resources busy: {message}")]
    ResourceBusy { message: String },

    /// Wrapped source error from an external dependency.
    #[error("channel operation failed: {context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unavailable(message: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unknown_session(session: impl std::fmt::Display) -> Self {
        Self::UnknownSession {
            session: session.to_string(),
        }
    }

    #[must_use]
    pub fn resource_busy(message: impl std::fmt::Display) -> Self {
        Self::ResourceBusy {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether a retry after lock/orphan cleanup may succeed.
    pub fn is_resource_busy(&self) -> bool {
        matches!(self, Self::ResourceBusy { .. })
    }
}
