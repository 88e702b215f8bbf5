// Central Error Type for the Application

use crate::domain::{LocationId, TicketNumber};
use crate::port::StoreError;
use thiserror::Error;

/// Application-level error type.
///
/// Store and transport failures are translated into these kinds at the
/// operation boundary; no adapter error crosses the public contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("No identity bound")]
    NotAuthenticated,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Holder already has ticket {number} at location {location_id}")]
    AlreadyQueued {
        location_id: LocationId,
        number: TicketNumber,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Allocation conflict at location {location_id} after {attempts} attempts")]
    AllocationConflict {
        location_id: LocationId,
        attempts: u32,
    },

    #[error("Store write failed: {0}")]
    StoreWriteFailed(String),

    #[error("Store read failed: {0}")]
    StoreReadFailed(String),

    #[error("Outcome indeterminate: {0}")]
    Indeterminate(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Translate a failed write acknowledgement
    pub fn from_write(err: StoreError) -> Self {
        AppError::StoreWriteFailed(err.to_string())
    }

    /// Translate a failed read
    pub fn from_read(err: StoreError) -> Self {
        AppError::StoreReadFailed(err.to_string())
    }

    /// Message shown to the person using the queue
    pub fn user_message(&self) -> String {
        match self {
            AppError::NotAuthenticated => "User not authenticated".to_string(),
            AppError::NotFound(what) => format!("{what} not found"),
            AppError::AlreadyQueued { number, .. } => {
                format!("You already have a number for this queue (#{number})")
            }
            AppError::Unauthorized(_) => {
                "Only the location manager can do that".to_string()
            }
            AppError::AllocationConflict { .. } => {
                "The queue is busy, please try again".to_string()
            }
            AppError::StoreWriteFailed(_) => "Could not save your change".to_string(),
            AppError::StoreReadFailed(_) => "Could not load queue data".to_string(),
            AppError::Indeterminate(_) => {
                "Your request may not have completed, please check the queue".to_string()
            }
            AppError::Validation(msg) => msg.clone(),
            AppError::Domain(e) => e.to_string(),
            AppError::Internal(_) => "Something went wrong".to_string(),
        }
    }
}
