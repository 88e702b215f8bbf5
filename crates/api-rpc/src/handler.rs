//! RPC Method Handlers
//!
//! Implements each JSON-RPC method on top of one client's queue services.

use crate::error::to_rpc_error;
use crate::types::{
    AckResponse, BindIdentityRequest, CreateLocationRequest, CreateLocationResponse,
    ExpiryResponse, IdentityResponse, ListLocationsRequest, LocationRequest, LocationSummary,
    RegisterEndpointRequest, RelinquishResponse, RenameLocationRequest, ServeRequest,
    ServeResponse, SetAutoServeRequest, SetNameRequest, SweepResponse, TakeResponse,
};
use jsonrpsee::core::SubscriptionResult;
use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::{PendingSubscriptionSink, SubscriptionMessage};
use std::sync::Arc;
use std::time::Duration;
use ticketline_core::application::{CancelToken, FeedObserver, QueueServices, QueueView};
use ticketline_core::domain::{Identity, QueueEntry};
use ticketline_core::error::AppError;
use ticketline_core::port::{EndpointDescriptor, IdentityProvider, SessionIdentity};
use tokio::sync::mpsc;
use tracing::{debug, info};

type RpcResult<T> = Result<T, ErrorObjectOwned>;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    services: Arc<QueueServices>,
    session: Arc<SessionIdentity>,
    /// Caller-facing bound on take/relinquish
    op_timeout: Duration,
}

impl RpcHandler {
    pub fn new(
        services: Arc<QueueServices>,
        session: Arc<SessionIdentity>,
        op_timeout: Duration,
    ) -> Self {
        Self {
            services,
            session,
            op_timeout,
        }
    }

    async fn identity_response(&self) -> RpcResult<IdentityResponse> {
        let Some(identity) = self.session.current_identity() else {
            return Ok(IdentityResponse {
                public_id: None,
                display_name: None,
            });
        };
        let display_name = self
            .services
            .profile
            .display_name(&identity)
            .await
            .map_err(to_rpc_error)?;
        Ok(IdentityResponse {
            public_id: Some(identity.public_id),
            display_name,
        })
    }

    /// identity.bind.v1
    pub async fn bind_identity(&self, req: BindIdentityRequest) -> RpcResult<IdentityResponse> {
        let public_id = req.public_id.trim();
        if public_id.is_empty() {
            return Err(to_rpc_error(AppError::Validation(
                "Public id must not be empty".to_string(),
            )));
        }
        let identity = Identity::new(public_id);
        info!(identity = %identity.short(), "Identity bound");
        self.session.bind(identity);
        self.identity_response().await
    }

    /// identity.leave.v1
    pub async fn leave_identity(&self) -> RpcResult<IdentityResponse> {
        if let Some(previous) = self.session.leave() {
            info!(identity = %previous.short(), "Identity released");
        }
        self.identity_response().await
    }

    /// identity.show.v1
    pub async fn show_identity(&self) -> RpcResult<IdentityResponse> {
        self.identity_response().await
    }

    /// profile.set_name.v1
    pub async fn set_display_name(&self, req: SetNameRequest) -> RpcResult<AckResponse> {
        self.services
            .profile
            .set_display_name(&req.name)
            .await
            .map_err(to_rpc_error)?;
        Ok(AckResponse { ok: true })
    }

    /// push.register.v1
    pub async fn register_endpoint(&self, req: RegisterEndpointRequest) -> RpcResult<AckResponse> {
        self.services
            .profile
            .register_endpoint(EndpointDescriptor::new(req.endpoint))
            .await
            .map_err(to_rpc_error)?;
        Ok(AckResponse { ok: true })
    }

    /// push.clear.v1
    pub async fn clear_endpoint(&self) -> RpcResult<AckResponse> {
        self.services
            .profile
            .clear_endpoint()
            .await
            .map_err(to_rpc_error)?;
        Ok(AckResponse { ok: true })
    }

    /// location.create.v1
    pub async fn create_location(
        &self,
        req: CreateLocationRequest,
    ) -> RpcResult<CreateLocationResponse> {
        let location_id = self
            .services
            .registry
            .create_location(&req.name, req.auto_serve_time)
            .await
            .map_err(to_rpc_error)?;
        Ok(CreateLocationResponse { location_id })
    }

    /// location.get.v1
    pub async fn get_location(&self, req: LocationRequest) -> RpcResult<LocationSummary> {
        let location = self
            .services
            .registry
            .get_location(&req.location_id)
            .await
            .map_err(to_rpc_error)?;
        let mine = self
            .session
            .current_identity()
            .is_some_and(|me| location.is_managed_by(&me));
        Ok(LocationSummary::from_location(&location, mine))
    }

    /// location.rename.v1
    pub async fn rename_location(&self, req: RenameLocationRequest) -> RpcResult<AckResponse> {
        self.services
            .registry
            .update_name(&req.location_id, &req.name)
            .await
            .map_err(to_rpc_error)?;
        Ok(AckResponse { ok: true })
    }

    /// location.set_auto_serve.v1
    ///
    /// Turning auto-serve off also stops a running expiry timer.
    pub async fn set_auto_serve(&self, req: SetAutoServeRequest) -> RpcResult<AckResponse> {
        self.services
            .registry
            .update_auto_serve_time(&req.location_id, req.minutes)
            .await
            .map_err(to_rpc_error)?;
        if req.minutes == 0 && self.services.expiry.stop(&req.location_id) {
            debug!(location_id = %req.location_id, "Expiry timer stopped with auto-serve");
        }
        Ok(AckResponse { ok: true })
    }

    /// location.list.v1
    pub async fn list_locations(
        &self,
        req: ListLocationsRequest,
    ) -> RpcResult<Vec<LocationSummary>> {
        let me = self.session.current_identity();
        let locations = if req.mine {
            self.services.registry.my_locations().await
        } else {
            self.services.registry.all_locations().await
        }
        .map_err(to_rpc_error)?;

        Ok(locations
            .iter()
            .map(|location| {
                let mine = me.as_ref().is_some_and(|me| location.is_managed_by(me));
                LocationSummary::from_location(location, mine)
            })
            .collect())
    }

    /// ticket.take.v1
    pub async fn take_number(&self, req: LocationRequest) -> RpcResult<TakeResponse> {
        let number = self
            .services
            .allocator
            .take_number_until(&req.location_id, CancelToken::cancel_after(self.op_timeout))
            .await
            .map_err(to_rpc_error)?;
        Ok(TakeResponse {
            location_id: req.location_id,
            number,
        })
    }

    /// ticket.relinquish.v1
    pub async fn relinquish_number(&self, req: LocationRequest) -> RpcResult<RelinquishResponse> {
        let number = self
            .services
            .allocator
            .relinquish_number_until(&req.location_id, CancelToken::cancel_after(self.op_timeout))
            .await
            .map_err(to_rpc_error)?;
        Ok(RelinquishResponse {
            location_id: req.location_id,
            number,
        })
    }

    /// ticket.serve.v1
    pub async fn serve_number(&self, req: ServeRequest) -> RpcResult<ServeResponse> {
        let outcome = self
            .services
            .allocator
            .mark_served(&req.location_id, req.number)
            .await
            .map_err(to_rpc_error)?;
        Ok(ServeResponse {
            location_id: req.location_id,
            number: req.number,
            outcome,
        })
    }

    /// ticket.status.v1
    pub async fn ticket_status(&self, req: LocationRequest) -> RpcResult<QueueView> {
        self.services
            .feed
            .current_view(&req.location_id)
            .await
            .map_err(to_rpc_error)
    }

    /// queue.entries.v1
    pub async fn queue_entries(&self, req: LocationRequest) -> RpcResult<Vec<QueueEntry>> {
        self.services
            .registry
            .queue_entries(&req.location_id)
            .await
            .map_err(to_rpc_error)
    }

    /// expiry.start.v1
    pub async fn start_expiry(&self, req: LocationRequest) -> RpcResult<ExpiryResponse> {
        self.services
            .expiry
            .start(&req.location_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(ExpiryResponse {
            running: self.services.expiry.is_running(&req.location_id),
            location_id: req.location_id,
        })
    }

    /// expiry.stop.v1
    pub async fn stop_expiry(&self, req: LocationRequest) -> RpcResult<ExpiryResponse> {
        self.services
            .registry
            .require_manager(&req.location_id)
            .await
            .map_err(to_rpc_error)?;
        self.services.expiry.stop(&req.location_id);
        Ok(ExpiryResponse {
            location_id: req.location_id,
            running: false,
        })
    }

    /// expiry.sweep.v1
    pub async fn sweep_expired(&self, req: LocationRequest) -> RpcResult<SweepResponse> {
        let report = self
            .services
            .expiry
            .sweep(&req.location_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(SweepResponse {
            location_id: req.location_id,
            report,
        })
    }

    /// location.watch.v1
    ///
    /// Streams a `location.view.v1` notification for every changed view until
    /// the client unsubscribes or disconnects.
    pub async fn watch_location(
        &self,
        req: LocationRequest,
        pending: PendingSubscriptionSink,
    ) -> SubscriptionResult {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = match self
            .services
            .feed
            .subscribe(&req.location_id, Arc::new(ViewForwarder(tx)))
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                pending.reject(to_rpc_error(e)).await;
                return Ok(());
            }
        };

        let sink = pending.accept().await?;
        debug!(location_id = %req.location_id, "Location watch opened");

        loop {
            tokio::select! {
                view = rx.recv() => {
                    let Some(view) = view else { break };
                    let message = SubscriptionMessage::from_json(&view)?;
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
                _ = sink.closed() => break,
            }
        }

        subscription.unsubscribe();
        debug!(location_id = %req.location_id, "Location watch closed");
        Ok(())
    }
}

struct ViewForwarder(mpsc::UnboundedSender<QueueView>);

impl FeedObserver for ViewForwarder {
    fn on_view(&self, view: QueueView) {
        // receiver gone means the watch already closed
        let _ = self.0.send(view);
    }
}
