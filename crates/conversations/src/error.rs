use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Another open conversation for the same contact and channel kind was
    /// written first. Callers re-read and reuse it.
    #[error("open conversation already exists for {contact_id} on {channel_kind}")]
    Duplicate {
        contact_id: String,
        channel_kind: String,
    },

    /// The operator does not hold an unexpired offer for the conversation, or
    /// the conversation was assigned meanwhile.
    #[error("operator {operator_id} does not hold the offer for conversation {conversation_id}")]
    OfferNotHeld {
        conversation_id: String,
        operator_id: String,
    },

    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn conversation_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "conversation",
            id: id.into(),
        }
    }

    #[must_use]
    pub fn operator_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "operator",
            id: id.into(),
        }
    }

    #[must_use]
    pub fn offer_not_held(conversation_id: impl Into<String>, operator_id: impl Into<String>) -> Self {
        Self::OfferNotHeld {
            conversation_id: conversation_id.into(),
            operator_id: operator_id.into(),
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

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl switchboard_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

switchboard_common::impl_context!();

pub type Result<T> = std::result::Result<T, Error>;
