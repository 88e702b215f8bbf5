//! Client stacks sharing one SQLite file

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use ticketline_core::application::{QueueConfig, QueueDeps, QueueServices};
use ticketline_core::domain::{Identity, LocationId, TicketNumber};
use ticketline_core::port::id_provider::UuidProvider;
use ticketline_core::port::notification::mocks::RecordingTransport;
use ticketline_core::port::time_provider::mocks::ManualClock;
use ticketline_core::port::{EndpointDescriptor, SessionIdentity};
use ticketline_infra_sqlite::{database_url, SqliteStore};

pub const T0: i64 = 1_700_000_000_000;

/// Database file removed on drop
pub struct SharedDb {
    pub path: PathBuf,
    pub clock: Arc<ManualClock>,
}

impl SharedDb {
    pub fn new() -> Self {
        Self {
            path: std::env::temp_dir().join(format!("ticketline-it-{}.db", uuid::Uuid::new_v4())),
            clock: Arc::new(ManualClock::at(T0)),
        }
    }

    pub async fn client(&self) -> Client {
        self.client_with(QueueConfig::default()).await
    }

    /// A fresh client process over the same file
    pub async fn client_with(&self, config: QueueConfig) -> Client {
        let store = Arc::new(
            SqliteStore::connect(&database_url(&self.path), self.clock.clone())
                .await
                .unwrap(),
        );
        let session = Arc::new(SessionIdentity::new());
        let transport = Arc::new(RecordingTransport::new());
        let deps = QueueDeps {
            store: store.clone(),
            identity: session.clone(),
            transport: transport.clone(),
            time_provider: self.clock.clone(),
            id_provider: Arc::new(UuidProvider),
        };
        Client {
            services: Arc::new(QueueServices::new(deps, config)),
            store,
            session,
            transport,
        }
    }
}

impl Drop for SharedDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut path = self.path.clone().into_os_string();
            path.push(suffix);
            let _ = std::fs::remove_file(path);
        }
    }
}

pub struct Client {
    pub services: Arc<QueueServices>,
    pub store: Arc<SqliteStore>,
    pub session: Arc<SessionIdentity>,
    pub transport: Arc<RecordingTransport>,
}

impl Client {
    pub fn act_as(&self, public_id: &str) {
        self.session.bind(Identity::new(public_id));
    }

    pub async fn open_location(&self, manager: &str, auto_serve_time: u32) -> LocationId {
        self.act_as(manager);
        self.services
            .registry
            .create_location("Post Office", Some(auto_serve_time))
            .await
            .unwrap()
    }

    pub async fn take_as(&self, holder: &str, location_id: &str) -> TicketNumber {
        self.act_as(holder);
        self.services
            .allocator
            .take_number(location_id)
            .await
            .unwrap()
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
