//! Notification transport adapters
//!
//! - [`HttpPushTransport`]: hands each message to a push relay over HTTP
//! - [`LogOnlyTransport`]: writes the message to the log and reports success

mod http;
mod log_only;

pub use http::HttpPushTransport;
pub use log_only::LogOnlyTransport;
