use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] switchboard_conversations::Error),

    #[error(transparent)]
    Channel(#[from] switchboard_channels::Error),

    #[error("bot handler {handler_id} failed: {message}")]
    Bot { handler_id: String, message: String },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn bot(handler_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Bot {
            handler_id: handler_id.into(),
            message: message.into(),
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
