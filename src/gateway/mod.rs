//! # Realtime Gateway
//!
//! Terminates porter WebSocket connections, authenticates them through the
//! platform's [`ConnectionAuthenticator`], registers presence, fans offer
//! lifecycle events out point-to-point by porter ID, and relays
//! accept/decline requests into the [`OfferManager`] with synchronous
//! responses.
//!
//! A disconnect (explicit close or heartbeat timeout) only removes the
//! presence entry; it never mutates offer state. A disconnected porter's
//! pending offer simply expires on its own TTL.

pub mod auth;
pub mod connections;
pub mod messages;

pub use auth::{ConnectionAuthenticator, StaticCredentialAuthenticator};
pub use connections::ConnectionRegistry;
pub use messages::{AckStatus, ClientMessage, ServerMessage};

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatch::DispatchBroadcaster;
use crate::error::{DispatchError, Result};
use crate::events::{OfferEventMessage, OfferTopic};
use crate::offers::OfferManager;
use crate::presence::{ConnectionId, PresenceRegistry};

/// Shared state behind every gateway connection.
pub struct GatewayState {
    manager: OfferManager,
    presence: Arc<dyn PresenceRegistry>,
    broadcaster: Arc<DispatchBroadcaster>,
    connections: ConnectionRegistry,
    authenticator: Arc<dyn ConnectionAuthenticator>,
    /// Deadline for the pre-auth hello; a socket that stays silent past it
    /// is dropped so unauthenticated connections cannot pile up.
    hello_timeout: Duration,
}

/// The realtime gateway server.
#[derive(Clone)]
pub struct RealtimeGateway {
    state: Arc<GatewayState>,
}

impl RealtimeGateway {
    pub fn new(
        manager: OfferManager,
        presence: Arc<dyn PresenceRegistry>,
        broadcaster: Arc<DispatchBroadcaster>,
        authenticator: Arc<dyn ConnectionAuthenticator>,
        hello_timeout: Duration,
    ) -> Self {
        Self {
            state: Arc::new(GatewayState {
                manager,
                presence,
                broadcaster,
                connections: ConnectionRegistry::new(),
                authenticator,
                hello_timeout,
            }),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Subscribe to the local event plane and deliver frames to addressed
    /// porters until shutdown.
    pub fn spawn_event_fanout(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let state = self.state.clone();
        let mut rx = state.manager.publisher().subscribe();
        tokio::spawn(async move {
            info!("gateway event fan-out started");
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    received = rx.recv() => match received {
                        Ok(event) => deliver_event(&state, &event).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "gateway fan-out lagged; clients resync from store");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            info!("gateway event fan-out stopped");
        })
    }

    pub async fn serve(&self, bind_address: &str, shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(bind_address)
            .await
            .map_err(|e| DispatchError::Gateway {
                message: format!("failed to bind {bind_address}: {e}"),
            })?;
        info!(bind_address, "realtime gateway listening");

        let fanout = self.spawn_event_fanout(shutdown.clone());
        let mut shutdown_signal = shutdown;
        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown_signal.changed().await;
            })
            .await
            .map_err(|e| DispatchError::Gateway {
                message: format!("gateway server error: {e}"),
            });
        fanout.abort();
        result
    }
}

/// Map a lifecycle event onto the client wire contract and deliver it to
/// the addressed porter's connections. Expired offers surface to the porter
/// as `offer.revoked`: from their side the offer is simply gone.
async fn deliver_event(state: &GatewayState, event: &OfferEventMessage) {
    let frame = match event.topic {
        OfferTopic::Created => match state.manager.get_offer(event.offer_id).await {
            Ok(Some(offer)) => ServerMessage::OfferNew {
                offer_id: offer.offer_id,
                job_id: offer.job_id,
                // Job details (addresses, cargo) belong to the order system;
                // clients fetch them through its read API.
                details: serde_json::json!({}),
                expires_at: offer.expires_at,
            },
            Ok(None) => return,
            Err(err) => {
                warn!(offer_id = %event.offer_id, error = %err, "offer lookup failed during fan-out");
                return;
            }
        },
        OfferTopic::Accepted => ServerMessage::OfferAssigned {
            offer_id: event.offer_id,
            job_id: event.job_id,
        },
        OfferTopic::Revoked | OfferTopic::Expired => ServerMessage::OfferRevoked {
            offer_id: event.offer_id,
        },
    };

    let delivered = state.connections.send_to_porter(event.porter_id, &frame);
    if delivered == 0 {
        // Not connected to this gateway instance; a replica may hold them.
        debug!(porter_id = %event.porter_id, topic = %event.topic, "no local connection for event");
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let hello = tokio::time::timeout(
        state.hello_timeout,
        await_hello(&state, &mut ws_rx, &mut ws_tx),
    )
    .await;
    let porter_id = match hello {
        Ok(Some(porter_id)) => porter_id,
        Ok(None) => return,
        Err(_) => {
            debug!("connection closed before authenticating in time");
            return;
        }
    };

    let connection: ConnectionId = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    state.connections.register(porter_id, connection, tx.clone());
    if let Err(err) = state.presence.register(porter_id, connection).await {
        warn!(porter_id = %porter_id, error = %err, "presence registration failed");
        state.connections.remove(porter_id, connection);
        return;
    }
    info!(porter_id = %porter_id, connection = %connection, "porter session established");

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&message) else {
                continue;
            };
            if ws_tx.send(WsMessage::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = ws_rx.next().await {
        match frame {
            WsMessage::Text(text) => {
                handle_client_frame(&state, porter_id, text.as_str(), &tx).await;
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    // Disconnect cleanup: presence only, never offer state.
    state.connections.remove(porter_id, connection);
    if let Err(err) = state.presence.deregister(porter_id, connection).await {
        warn!(porter_id = %porter_id, error = %err, "presence deregistration failed");
    }
    writer.abort();
    info!(porter_id = %porter_id, connection = %connection, "porter session closed");
}

/// The first frame must be an authenticated `porter.hello`.
async fn await_hello(
    state: &GatewayState,
    ws_rx: &mut SplitStream<WebSocket>,
    ws_tx: &mut SplitSink<WebSocket, WsMessage>,
) -> Option<Uuid> {
    while let Some(Ok(frame)) = ws_rx.next().await {
        let WsMessage::Text(text) = frame else {
            continue;
        };
        match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(ClientMessage::Hello {
                porter_id,
                credential,
            }) => {
                match state.authenticator.authenticate(porter_id, &credential).await {
                    Ok(true) => return Some(porter_id),
                    Ok(false) => {
                        send_error(ws_tx, "authentication failed").await;
                        return None;
                    }
                    Err(err) => {
                        warn!(porter_id = %porter_id, error = %err, "authenticator failure");
                        send_error(ws_tx, "authentication unavailable").await;
                        return None;
                    }
                }
            }
            _ => {
                send_error(ws_tx, "expected porter.hello").await;
                return None;
            }
        }
    }
    None
}

async fn send_error(ws_tx: &mut SplitSink<WebSocket, WsMessage>, message: &str) {
    let frame = ServerMessage::Error {
        message: message.to_string(),
    };
    if let Ok(json) = serde_json::to_string(&frame) {
        let _ = ws_tx.send(WsMessage::Text(json.into())).await;
    }
}

async fn handle_client_frame(
    state: &GatewayState,
    porter_id: Uuid,
    text: &str,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(err) => {
            let _ = tx.send(ServerMessage::Error {
                message: format!("malformed frame: {err}"),
            });
            return;
        }
    };

    match message {
        ClientMessage::Hello { .. } => {
            let _ = tx.send(ServerMessage::Error {
                message: "already authenticated".to_string(),
            });
        }
        ClientMessage::Heartbeat => {
            match state.presence.heartbeat(porter_id).await {
                Ok(true) => {}
                Ok(false) => debug!(porter_id = %porter_id, "heartbeat for unknown presence entry"),
                Err(err) => warn!(porter_id = %porter_id, error = %err, "heartbeat failed"),
            }
        }
        ClientMessage::AcceptOffer { offer_id } => {
            let response = match state.manager.accept_offer(offer_id, porter_id).await {
                Ok(assignment) => {
                    state.broadcaster.forget_job(assignment.job_id);
                    ServerMessage::Ack {
                        status: AckStatus::Ok,
                    }
                }
                Err(err) => race_aware_response(porter_id, offer_id, err),
            };
            let _ = tx.send(response);
        }
        ClientMessage::DeclineOffer { offer_id } => {
            let response = match state.manager.decline_offer(offer_id, porter_id).await {
                Ok(outcome) => {
                    // A decline that kills the round opens the next one.
                    if let Some(err) = state.broadcaster.handle_decline(&outcome).await {
                        if let DispatchError::DispatchExhausted { rounds, .. } = err {
                            warn!(
                                job_id = %outcome.offer.job_id,
                                rounds,
                                "dispatch exhausted, escalating"
                            );
                            state.broadcaster.forget_job(outcome.offer.job_id);
                        }
                    }
                    ServerMessage::Ack {
                        status: AckStatus::Ok,
                    }
                }
                Err(err) => race_aware_response(porter_id, offer_id, err),
            };
            let _ = tx.send(response);
        }
    }
}

/// Losing a race is a routine outcome answered with an ack status; anything
/// else is an error frame and gets logged.
fn race_aware_response(porter_id: Uuid, offer_id: Uuid, err: DispatchError) -> ServerMessage {
    match AckStatus::from_error(&err) {
        Some(status) => ServerMessage::Ack { status },
        None => {
            warn!(porter_id = %porter_id, offer_id = %offer_id, error = %err, "offer request failed");
            ServerMessage::Error {
                message: err.to_string(),
            }
        }
    }
}
