//! Error taxonomy for the entitlement core.

use crate::models::TransactionStatus;
use service_core::error::AppError;
use thiserror::Error;

pub type Result<T, E = EntitlementError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum EntitlementError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid transaction transition from {from} to {to}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),
}

impl EntitlementError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        EntitlementError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EntitlementError::NotFound { .. })
    }
}

impl From<mongodb::error::Error> for EntitlementError {
    fn from(err: mongodb::error::Error) -> Self {
        EntitlementError::Store(anyhow::Error::new(err))
    }
}

impl From<mongodb::bson::ser::Error> for EntitlementError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        EntitlementError::Store(anyhow::Error::new(err))
    }
}

impl From<validator::ValidationErrors> for EntitlementError {
    fn from(err: validator::ValidationErrors) -> Self {
        EntitlementError::InvalidInput(err.to_string())
    }
}

impl From<EntitlementError> for AppError {
    fn from(err: EntitlementError) -> Self {
        match err {
            EntitlementError::NotFound { .. } => AppError::NotFound(anyhow::Error::new(err)),
            EntitlementError::InvalidTransition { .. } | EntitlementError::Conflict(_) => {
                AppError::Conflict(anyhow::Error::new(err))
            }
            EntitlementError::InvalidInput(_) => AppError::BadRequest(anyhow::Error::new(err)),
            EntitlementError::Store(source) => AppError::DatabaseError(source),
        }
    }
}
