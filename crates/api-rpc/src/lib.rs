//! JSON-RPC API Layer
//!
//! Exposes the queue operations of one client as a JSON-RPC 2.0 service,
//! plus a live location-view subscription.

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use server::{RpcServer, RpcServerConfig};
