//! RPC Error Types
//!
//! Maps application errors to JSON-RPC error codes. The message is the
//! user-facing text; `data` carries the error kind and the technical detail.

use jsonrpsee::types::ErrorObjectOwned;
use serde_json::json;
use ticketline_core::error::AppError;

/// RPC Error Codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const NOT_AUTHENTICATED: i32 = 4010;
    pub const UNAUTHORIZED: i32 = 4030;
    pub const ALREADY_QUEUED: i32 = 4090;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const STORE_WRITE_ERROR: i32 = 5001;
    pub const STORE_READ_ERROR: i32 = 5003;
    pub const INDETERMINATE: i32 = 5004;
}

fn kind(err: &AppError) -> (i32, &'static str) {
    match err {
        AppError::NotAuthenticated => (code::NOT_AUTHENTICATED, "not_authenticated"),
        AppError::NotFound(_) => (code::NOT_FOUND, "not_found"),
        AppError::AlreadyQueued { .. } => (code::ALREADY_QUEUED, "already_queued"),
        AppError::Unauthorized(_) => (code::UNAUTHORIZED, "unauthorized"),
        AppError::AllocationConflict { .. } => (code::CONFLICT, "allocation_conflict"),
        AppError::StoreWriteFailed(_) => (code::STORE_WRITE_ERROR, "store_write_failed"),
        AppError::StoreReadFailed(_) => (code::STORE_READ_ERROR, "store_read_failed"),
        AppError::Indeterminate(_) => (code::INDETERMINATE, "indeterminate"),
        AppError::Validation(_) | AppError::Domain(_) => (code::VALIDATION_ERROR, "validation"),
        AppError::Internal(_) => (code::INTERNAL_ERROR, "internal"),
    }
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    let (code, kind) = kind(&err);
    ErrorObjectOwned::owned(
        code,
        err.user_message(),
        Some(json!({ "kind": kind, "detail": err.to_string() })),
    )
}
