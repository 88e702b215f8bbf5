// Log-Only Transport Implementation

use async_trait::async_trait;
use ticketline_core::port::{DeliveryError, EndpointDescriptor, NotificationTransport, PushMessage};
use tracing::info;

/// Transport for deployments without a push relay
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyTransport;

impl LogOnlyTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationTransport for LogOnlyTransport {
    async fn deliver(
        &self,
        endpoint: &EndpointDescriptor,
        message: &PushMessage,
    ) -> Result<(), DeliveryError> {
        info!(
            endpoint_len = endpoint.as_str().len(),
            body = %message.body,
            "Push notification (log only)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_always_succeeds() {
        let transport = LogOnlyTransport::new();
        let res = transport
            .deliver(
                &EndpointDescriptor::new("anything"),
                &PushMessage::almost_your_turn(3),
            )
            .await;
        assert!(res.is_ok());
    }
}
