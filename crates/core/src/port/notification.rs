// Notification Transport Port
//
// Best-effort, fire-and-forget push delivery.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque delivery endpoint registered by its owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointDescriptor(pub String);

impl EndpointDescriptor {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub body: String,
}

impl PushMessage {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }

    /// Message sent to the holder of the next number after a serve
    pub fn almost_your_turn(served: u64) -> Self {
        Self::new(format!(
            "It's almost your turn! Number {served} has been served."
        ))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("endpoint rejected delivery: {0}")]
    Rejected(String),

    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn deliver(
        &self,
        endpoint: &EndpointDescriptor,
        message: &PushMessage,
    ) -> Result<(), DeliveryError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every delivery attempt; can be told to fail or stall
    #[derive(Default)]
    pub struct RecordingTransport {
        attempts: Mutex<Vec<(EndpointDescriptor, PushMessage)>>,
        failure: Mutex<Option<DeliveryError>>,
        delay: Mutex<Option<Duration>>,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing(err: DeliveryError) -> Self {
            let transport = Self::default();
            *transport.failure.lock().unwrap() = Some(err);
            transport
        }

        pub fn stalling(delay: Duration) -> Self {
            let transport = Self::default();
            *transport.delay.lock().unwrap() = Some(delay);
            transport
        }

        pub fn attempts(&self) -> Vec<(EndpointDescriptor, PushMessage)> {
            self.attempts.lock().unwrap().clone()
        }

        pub fn attempt_count(&self) -> usize {
            self.attempts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl NotificationTransport for RecordingTransport {
        async fn deliver(
            &self,
            endpoint: &EndpointDescriptor,
            message: &PushMessage,
        ) -> Result<(), DeliveryError> {
            self.attempts
                .lock()
                .unwrap()
                .push((endpoint.clone(), message.clone()));

            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            match self.failure.lock().unwrap().clone() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }
}
