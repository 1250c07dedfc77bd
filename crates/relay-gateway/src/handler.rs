//! One axum WS connection end to end: upgrade, identity extraction, the
//! per-frame enforcement pipeline, and dispatch of subscribe/unsubscribe/
//! publish/ping. Grounded on the same split-socket + `tokio::select!` shape
//! used for dashboard push elsewhere in the workspace, generalized from a
//! one-way feed to full bidirectional messaging.

use crate::enforcement::{audit, authorize_channel, ConnectionRateLimiter};
use crate::frames::{ClientFrame, ServerFrame};
use crate::router::{dispatch_to_local, LocalSocket};
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use relay_common::error::Error;
use relay_domain::{AuditRecord, Event};
use relay_domain::audit::AuditSeverity;
use relay_domain::Session;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::RwLock;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: String,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> axum::response::Response {
    let identity = match relay_common::auth::verify_jwt(&query.token, &state.auth_config.jwt_secret) {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, "websocket upgrade rejected: bad token");
            return (axum::http::StatusCode::UNAUTHORIZED, axum::Json(e.to_frame(None))).into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState, identity: relay_common::auth::IdentityContext) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();

    let session = Session::new(
        identity.org_id,
        identity.user_id.clone(),
        state.server_id,
        "websocket".into(),
    );
    if let Err(e) = state.connections.register_session(&session).await {
        warn!(error = %e, "failed to register session");
        return;
    }

    let local_socket = std::sync::Arc::new(LocalSocket {
        org_id: identity.org_id,
        channels: RwLock::new(HashSet::new()),
        sender: tx.clone(),
    });
    state.local_sockets.insert(session.id, local_socket.clone());
    relay_common::metrics::CONNECTIONS_ACTIVE
        .with_label_values(&[&state.server_id.to_string()])
        .inc();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&frame) else { continue };
            if ws_sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let mut connection_limiter = ConnectionRateLimiter::new(
        state.rate_limits.per_connection_window_secs,
        state.rate_limits.per_connection_max,
    );
    let mut consecutive_unauthenticated = 0u32;

    while let Some(Ok(msg)) = ws_receiver.next().await {
        let Message::Text(text) = msg else {
            if matches!(msg, Message::Close(_)) {
                break;
            }
            continue;
        };

        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                let err = Error::Invalid { reason: e.to_string() };
                let _ = tx.send(ServerFrame::error(&err, None));
                continue;
            }
        };

        if !connection_limiter.check() {
            let err = Error::RateLimited {
                retry_after_secs: state.rate_limits.per_connection_window_secs,
            };
            relay_common::metrics::RATE_LIMIT_TRIPS_TOTAL
                .with_label_values(&["per_connection"])
                .inc();
            let _ = tx.send(ServerFrame::error(&err, correlation_of(&frame)));
            continue;
        }

        match process_frame(&state, &identity, &session, &local_socket, frame).await {
            Ok(Some(response)) => {
                let _ = tx.send(response);
            }
            Ok(None) => {}
            Err(err) => {
                if matches!(err, Error::Unauthenticated { .. }) {
                    consecutive_unauthenticated += 1;
                } else {
                    consecutive_unauthenticated = 0;
                }
                let _ = tx.send(ServerFrame::error(&err, None));
                if consecutive_unauthenticated >= 3 || err.closes_connection() {
                    break;
                }
            }
        }
    }

    state.local_sockets.remove(&session.id);
    relay_common::metrics::CONNECTIONS_ACTIVE
        .with_label_values(&[&state.server_id.to_string()])
        .dec();
    if let Err(e) = state.connections.unregister_session(&session).await {
        warn!(error = %e, "failed to unregister session on disconnect");
    }
    writer.abort();
    info!(session_id = %session.id, "connection closed");
}

fn correlation_of(frame: &ClientFrame) -> Option<uuid::Uuid> {
    match frame {
        ClientFrame::Subscribe { correlation_id, .. }
        | ClientFrame::Unsubscribe { correlation_id, .. }
        | ClientFrame::Publish { correlation_id, .. }
        | ClientFrame::Ping { correlation_id } => *correlation_id,
    }
}

async fn process_frame(
    state: &AppState,
    identity: &relay_common::auth::IdentityContext,
    session: &Session,
    local_socket: &std::sync::Arc<LocalSocket>,
    frame: ClientFrame,
) -> Result<Option<ServerFrame>, Error> {
    match frame {
        ClientFrame::Ping { correlation_id } => Ok(Some(ServerFrame::Pong { correlation_id })),

        ClientFrame::Subscribe {
            channels,
            correlation_id,
            ..
        } => {
            if !identity.has_permission("channels:subscribe") {
                return Err(Error::Forbidden {
                    reason: "missing channels:subscribe permission".into(),
                });
            }
            let mut authorized = Vec::with_capacity(channels.len());
            for raw in &channels {
                if let Err(e) = authorize_channel(raw, identity.org_id) {
                    audit(
                        &state.audit_sink,
                        AuditRecord::new(identity.org_id, &identity.user_id, "UNAUTHORIZED_CHANNEL", raw, AuditSeverity::Warning),
                    );
                    return Err(e);
                }
                authorized.push(raw.clone());
            }
            let snapshot = {
                let mut guard = local_socket.channels.write().unwrap();
                for c in &authorized {
                    guard.insert(c.clone());
                }
                guard.clone()
            };
            state
                .connections
                .update_session_channels(session.id, &snapshot)
                .await?;
            audit(
                &state.audit_sink,
                AuditRecord::new(identity.org_id, &identity.user_id, "subscribe", authorized.join(","), AuditSeverity::Info),
            );
            Ok(Some(ServerFrame::Subscribed {
                channels: authorized,
                correlation_id,
            }))
        }

        ClientFrame::Unsubscribe {
            channels,
            correlation_id,
        } => {
            let snapshot = {
                let mut guard = local_socket.channels.write().unwrap();
                for c in &channels {
                    guard.remove(c);
                }
                guard.clone()
            };
            state
                .connections
                .update_session_channels(session.id, &snapshot)
                .await?;
            audit(
                &state.audit_sink,
                AuditRecord::new(identity.org_id, &identity.user_id, "unsubscribe", channels.join(","), AuditSeverity::Info),
            );
            Ok(Some(ServerFrame::Unsubscribed {
                channels,
                correlation_id,
            }))
        }

        ClientFrame::Publish {
            channel,
            event_type,
            payload,
            correlation_id,
            ..
        } => {
            if !identity.has_permission("events:publish") {
                return Err(Error::Forbidden {
                    reason: "missing events:publish permission".into(),
                });
            }
            if let Err(e) = authorize_channel(&channel, identity.org_id) {
                audit(
                    &state.audit_sink,
                    AuditRecord::new(identity.org_id, &identity.user_id, "UNAUTHORIZED_CHANNEL", &channel, AuditSeverity::Warning),
                );
                return Err(e);
            }

            if !state.tenant_rate_limiter.check(identity.org_id).await {
                relay_common::metrics::RATE_LIMIT_TRIPS_TOTAL
                    .with_label_values(&["per_tenant"])
                    .inc();
                audit(
                    &state.audit_sink,
                    AuditRecord::new(identity.org_id, &identity.user_id, "rate_limited", &channel, AuditSeverity::Warning),
                );
                return Err(Error::RateLimited {
                    retry_after_secs: state.rate_limits.per_tenant_window_secs,
                });
            }

            if let Err(e) = state
                .quota
                .check_event_quota(identity.org_id, state.tenant_defaults.max_events_per_hour as i64)
                .await
            {
                relay_common::metrics::QUOTA_TRIPS_TOTAL
                    .with_label_values(&["max_events_per_hour"])
                    .inc();
                audit(
                    &state.audit_sink,
                    AuditRecord::new(identity.org_id, &identity.user_id, "quota_exceeded", &channel, AuditSeverity::Warning),
                );
                return Err(e);
            }

            let event = Event::new(
                identity.org_id,
                channel.clone(),
                event_type,
                payload,
                identity.user_id.clone(),
                correlation_id,
            );
            let event_id = state.event_stream.append(event.clone()).await?;
            relay_common::metrics::EVENTS_APPENDED_TOTAL
                .with_label_values(&[&identity.org_id.to_string()])
                .inc();

            let mut frame = relay_domain::event::EventFrame::from(event);
            frame.id = event_id.clone();

            dispatch_to_local(&state.local_sockets, identity.org_id, &channel, &frame);
            if let Err(e) = state.router.broadcast(identity.org_id, &channel, frame).await {
                warn!(error = %e, "router broadcast failed, local delivery already happened");
            }

            audit(
                &state.audit_sink,
                AuditRecord::new(identity.org_id, &identity.user_id, "publish", &channel, AuditSeverity::Info),
            );

            Ok(Some(ServerFrame::Ack {
                event_id,
                correlation_id,
            }))
        }
    }
}
