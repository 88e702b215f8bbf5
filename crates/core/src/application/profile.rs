// Profile Service - display names and notification endpoints

use crate::domain::{layout, Identity};
use crate::error::{AppError, Result};
use crate::port::{EndpointDescriptor, IdentityProvider, ReplicatedStore};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Per-identity data stored in the owner's private namespace.
///
/// Only the bound identity writes its own profile; anyone may read it.
pub struct ProfileService {
    store: Arc<dyn ReplicatedStore>,
    identity: Arc<dyn IdentityProvider>,
}

impl ProfileService {
    pub fn new(store: Arc<dyn ReplicatedStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { store, identity }
    }

    pub async fn set_display_name(&self, name: &str) -> Result<()> {
        let me = super::require_identity(self.identity.as_ref())?;
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation(
                "Display name must not be empty".to_string(),
            ));
        }
        self.store
            .put(&layout::display_name(&me), Value::String(name.to_string()))
            .await
            .map_err(AppError::from_write)
    }

    pub async fn display_name(&self, identity: &Identity) -> Result<Option<String>> {
        let node = self
            .store
            .once(&layout::display_name(identity))
            .await
            .map_err(AppError::from_read)?;
        Ok(match node {
            Some(Value::String(name)) if !name.trim().is_empty() => Some(name),
            _ => None,
        })
    }

    /// Register where "your number is next" pushes go for the current identity
    pub async fn register_endpoint(&self, endpoint: EndpointDescriptor) -> Result<()> {
        let me = super::require_identity(self.identity.as_ref())?;
        if endpoint.as_str().trim().is_empty() {
            return Err(AppError::Validation(
                "Notification endpoint must not be empty".to_string(),
            ));
        }
        self.store
            .put(&layout::push_endpoint(&me), Value::String(endpoint.0))
            .await
            .map_err(AppError::from_write)?;
        info!(holder = me.short(), "Notification endpoint registered");
        Ok(())
    }

    pub async fn clear_endpoint(&self) -> Result<()> {
        let me = super::require_identity(self.identity.as_ref())?;
        self.store
            .put(&layout::push_endpoint(&me), Value::Null)
            .await
            .map_err(AppError::from_write)?;
        info!(holder = me.short(), "Notification endpoint cleared");
        Ok(())
    }

    pub async fn endpoint_of(&self, identity: &Identity) -> Result<Option<EndpointDescriptor>> {
        let node = self
            .store
            .once(&layout::push_endpoint(identity))
            .await
            .map_err(AppError::from_read)?;
        Ok(match node {
            Some(Value::String(raw)) if !raw.is_empty() => Some(EndpointDescriptor(raw)),
            // legacy records stored the subscription object itself
            Some(obj @ Value::Object(_)) => Some(EndpointDescriptor(obj.to_string())),
            _ => None,
        })
    }
}
