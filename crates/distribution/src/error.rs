use thiserror::Error;

use switchboard_conversations::Error as StoreError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_not_found())
    }

    pub fn is_offer_not_held(&self) -> bool {
        matches!(self, Self::Store(StoreError::OfferNotHeld { .. }))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
