//! JSON-RPC Server
//!
//! Serves one client's queue operations over JSON-RPC 2.0 (HTTP and
//! WebSocket on the same port). Subscriptions need WebSocket.

use crate::handler::RpcHandler;
use crate::types::{
    BindIdentityRequest, CreateLocationRequest, ListLocationsRequest, LocationRequest,
    RegisterEndpointRequest, RenameLocationRequest, ServeRequest, SetAutoServeRequest,
    SetNameRequest,
};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use ticketline_core::application::QueueServices;
use ticketline_core::port::SessionIdentity;
use tracing::info;

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9630;
const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(15);

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
    /// Bound on how long take/relinquish may keep a caller waiting
    pub op_timeout: Duration,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

/// Register a method taking typed params
macro_rules! method {
    ($module:expr, $handler:expr, $name:literal, $req:ty, $call:ident) => {{
        let handler = $handler.clone();
        $module
            .register_async_method($name, move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: $req = params.parse()?;
                    handler.$call(req).await
                }
            })
            .map_err(|e| e.to_string())?;
    }};
    ($module:expr, $handler:expr, $name:literal, $call:ident) => {{
        let handler = $handler.clone();
        $module
            .register_async_method($name, move |_, _, _| {
                let handler = handler.clone();
                async move { handler.$call().await }
            })
            .map_err(|e| e.to_string())?;
    }};
}

impl RpcServer {
    pub fn new(
        config: RpcServerConfig,
        services: Arc<QueueServices>,
        session: Arc<SessionIdentity>,
    ) -> Self {
        let handler = Arc::new(RpcHandler::new(services, session, config.op_timeout));
        Self { config, handler }
    }

    /// Every method and subscription this server exposes
    pub fn module(&self) -> Result<RpcModule<()>, String> {
        let mut module = RpcModule::new(());
        let h = &self.handler;

        method!(module, h, "identity.bind.v1", BindIdentityRequest, bind_identity);
        method!(module, h, "identity.leave.v1", leave_identity);
        method!(module, h, "identity.show.v1", show_identity);
        method!(module, h, "profile.set_name.v1", SetNameRequest, set_display_name);
        method!(module, h, "push.register.v1", RegisterEndpointRequest, register_endpoint);
        method!(module, h, "push.clear.v1", clear_endpoint);

        method!(module, h, "location.create.v1", CreateLocationRequest, create_location);
        method!(module, h, "location.get.v1", LocationRequest, get_location);
        method!(module, h, "location.rename.v1", RenameLocationRequest, rename_location);
        method!(module, h, "location.set_auto_serve.v1", SetAutoServeRequest, set_auto_serve);

        // `mine` is optional, so params may be omitted entirely
        let handler = h.clone();
        module
            .register_async_method("location.list.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: ListLocationsRequest = match params.as_str() {
                        Some(_) => params.parse()?,
                        None => ListLocationsRequest::default(),
                    };
                    handler.list_locations(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        method!(module, h, "ticket.take.v1", LocationRequest, take_number);
        method!(module, h, "ticket.relinquish.v1", LocationRequest, relinquish_number);
        method!(module, h, "ticket.serve.v1", ServeRequest, serve_number);
        method!(module, h, "ticket.status.v1", LocationRequest, ticket_status);
        method!(module, h, "queue.entries.v1", LocationRequest, queue_entries);

        method!(module, h, "expiry.start.v1", LocationRequest, start_expiry);
        method!(module, h, "expiry.stop.v1", LocationRequest, stop_expiry);
        method!(module, h, "expiry.sweep.v1", LocationRequest, sweep_expired);

        let handler = h.clone();
        module
            .register_subscription(
                "location.watch.v1",
                "location.view.v1",
                "location.unwatch.v1",
                move |params, pending, _, _| {
                    let handler = handler.clone();
                    async move {
                        let req: LocationRequest = match params.parse() {
                            Ok(req) => req,
                            Err(e) => {
                                pending.reject(e).await;
                                return Ok(());
                            }
                        };
                        handler.watch_location(req, pending).await
                    }
                },
            )
            .map_err(|e| e.to_string())?;

        Ok(module)
    }

    /// Start the JSON-RPC server; returns the bound address and its handle
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!(
            host = %self.config.host,
            port = %self.config.port,
            "Starting JSON-RPC server"
        );

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        let module = self.module()?;
        let handle = server.start(module);

        info!(addr = %local_addr, "JSON-RPC server started");
        Ok((local_addr, handle))
    }
}
