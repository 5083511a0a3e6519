use thiserror::Error;

use switchboard_channels::Error as ChannelError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown session: {session}")]
    UnknownSession { session: String },

    #[error("session already exists: {session}")]
    AlreadyExists { session: String },

    #[error("session is not connected: {session}")]
    NotConnected { session: String },

    /// A stale lock or orphaned process kept the client from starting, and
    /// the bounded retries with cleanup did not clear it.
    #[error("session resources busy: {message}")]
    ResourceBusy { message: String },

    /// The client failed to start for a reason cleanup cannot fix.
    #[error("client launch failed: {message}")]
    Launch { message: String },

    #[error("unavailable: {message}")]
    Unavailable { message: String },

    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error(transparent)]
    Channel(ChannelError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn unknown_session(session: impl Into<String>) -> Self {
        Self::UnknownSession {
            session: session.into(),
        }
    }

    #[must_use]
    pub fn not_connected(session: impl Into<String>) -> Self {
        Self::NotConnected {
            session: session.into(),
        }
    }

    #[must_use]
    pub fn resource_busy(message: impl Into<String>) -> Self {
        Self::ResourceBusy {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn launch(message: impl Into<String>) -> Self {
        Self::Launch {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

impl From<ChannelError> for Error {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::UnknownSession { session } => Self::UnknownSession { session },
            ChannelError::ResourceBusy { message } => Self::ResourceBusy { message },
            ChannelError::Unavailable { message } => Self::Unavailable { message },
            ChannelError::InvalidInput { message } => Self::InvalidInput { message },
            other => Self::Channel(other),
        }
    }
}

impl From<Error> for ChannelError {
    fn from(err: Error) -> Self {
        match err {
            Error::UnknownSession { session } => Self::UnknownSession { session },
            Error::ResourceBusy { message } => Self::ResourceBusy { message },
            Error::InvalidInput { message } => Self::InvalidInput { message },
            Error::Channel(inner) => inner,
            ref e @ (Error::NotConnected { .. } | Error::Unavailable { .. }) => Self::unavailable(e),
            other => Self::external("session registry", other),
        }
    }
}

impl switchboard_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

switchboard_common::impl_context!();

pub type Result<T> = std::result::Result<T, Error>;
