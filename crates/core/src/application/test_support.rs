//! Shared fixtures for application tests

use super::{QueueConfig, QueueDeps, QueueServices};
use crate::domain::{Identity, LocationId, TicketNumber};
use crate::port::id_provider::mocks::SequentialIds;
use crate::port::notification::mocks::RecordingTransport;
use crate::port::replicated_store::mocks::InMemoryStore;
use crate::port::time_provider::mocks::ManualClock;
use crate::port::{EndpointDescriptor, SessionIdentity};
use std::sync::Arc;

pub const T0: i64 = 1_700_000_000_000;

/// One client stack over an in-memory store
pub struct Harness {
    pub services: QueueServices,
    pub store: Arc<InMemoryStore>,
    pub session: Arc<SessionIdentity>,
    pub clock: Arc<ManualClock>,
    pub transport: Arc<RecordingTransport>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(
            Arc::new(InMemoryStore::new()),
            Arc::new(RecordingTransport::new()),
            QueueConfig::default(),
        )
    }

    pub fn with_transport(transport: Arc<RecordingTransport>) -> Self {
        Self::build(
            Arc::new(InMemoryStore::new()),
            transport,
            QueueConfig::default(),
        )
    }

    /// Another client sharing `store`
    pub fn on_store(store: Arc<InMemoryStore>) -> Self {
        Self::on_store_with(store, QueueConfig::default())
    }

    pub fn on_store_with(store: Arc<InMemoryStore>, config: QueueConfig) -> Self {
        Self::build(store, Arc::new(RecordingTransport::new()), config)
    }

    fn build(
        store: Arc<InMemoryStore>,
        transport: Arc<RecordingTransport>,
        config: QueueConfig,
    ) -> Self {
        let session = Arc::new(SessionIdentity::new());
        let clock = Arc::new(ManualClock::at(T0));
        let deps = QueueDeps {
            store: store.clone(),
            identity: session.clone(),
            transport: transport.clone(),
            time_provider: clock.clone(),
            id_provider: Arc::new(SequentialIds::new(format!(
                "loc{}",
                uuid::Uuid::new_v4().simple()
            ))),
        };
        Self {
            services: QueueServices::new(deps, config),
            store,
            session,
            clock,
            transport,
        }
    }

    pub fn act_as(&self, public_id: &str) {
        self.session.bind(Identity::new(public_id));
    }

    /// Create a location as `manager`; leaves `manager` bound
    pub async fn location_managed_by(&self, manager: &str, auto_serve_time: u32) -> LocationId {
        self.act_as(manager);
        self.services
            .registry
            .create_location("Test Location", Some(auto_serve_time))
            .await
            .unwrap()
    }

    /// Take a number as `holder`; leaves `holder` bound
    pub async fn take_as(&self, holder: &str, location_id: &str) -> TicketNumber {
        self.act_as(holder);
        self.services.allocator.take_number(location_id).await.unwrap()
    }

    pub async fn register_endpoint(&self, holder: &str, endpoint: &str) {
        self.act_as(holder);
        self.services
            .profile
            .register_endpoint(EndpointDescriptor::new(endpoint))
            .await
            .unwrap();
    }
}
