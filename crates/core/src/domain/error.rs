// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Location name must not be empty")]
    EmptyLocationName,

    #[error("Location name is too long ({0} characters, max 120)")]
    LocationNameTooLong(usize),

    #[error("Auto-serve time out of range: {0} minutes")]
    AutoServeTimeOutOfRange(u32),

    #[error("Invalid ticket number: {0}")]
    InvalidTicketNumber(u64),

    #[error("Ticket numbers exhausted at location {0}")]
    TicketSequenceExhausted(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
