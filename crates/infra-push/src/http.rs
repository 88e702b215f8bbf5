// HTTP Push Relay Transport Implementation

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use ticketline_core::port::{DeliveryError, EndpointDescriptor, NotificationTransport, PushMessage};
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Body accepted by the relay's send endpoint
#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    subscription: Value,
    message: &'a str,
}

/// Posts `{subscription, message}` to a push relay
#[derive(Debug, Clone)]
pub struct HttpPushTransport {
    client: reqwest::Client,
    relay_url: String,
}

impl HttpPushTransport {
    pub fn new(relay_url: impl Into<String>) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DeliveryError::Unavailable(e.to_string()))?;
        Ok(Self::with_client(client, relay_url))
    }

    pub fn with_client(client: reqwest::Client, relay_url: impl Into<String>) -> Self {
        Self {
            client,
            relay_url: relay_url.into(),
        }
    }

    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }
}

/// Endpoints are usually serialized browser subscriptions; anything else
/// is forwarded as a plain string.
fn subscription_value(endpoint: &EndpointDescriptor) -> Result<Value, DeliveryError> {
    let raw = endpoint.as_str().trim();
    if raw.is_empty() {
        return Err(DeliveryError::InvalidEndpoint("empty endpoint".to_string()));
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => Ok(value),
        _ => Ok(Value::String(raw.to_string())),
    }
}

fn map_reqwest_error(err: reqwest::Error) -> DeliveryError {
    if err.is_builder() {
        DeliveryError::InvalidEndpoint(err.to_string())
    } else {
        DeliveryError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl NotificationTransport for HttpPushTransport {
    async fn deliver(
        &self,
        endpoint: &EndpointDescriptor,
        message: &PushMessage,
    ) -> Result<(), DeliveryError> {
        let body = SendRequest {
            subscription: subscription_value(endpoint)?,
            message: &message.body,
        };

        let response = self
            .client
            .post(&self.relay_url)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "Push relay accepted message");
            return Ok(());
        }

        let detail = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            Err(DeliveryError::Unavailable(format!("{status}: {detail}")))
        } else {
            Err(DeliveryError::Rejected(format!("{status}: {detail}")))
        }
    }
}
