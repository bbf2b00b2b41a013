//! # WebSocket Client Gateway
//!
//! Handles real-time transcription connections. Each client connects to
//! `/ws`, receives a `CONNECTED` envelope carrying its assigned session
//! id, then streams `REALTIME_TRANSCRIBE` messages with base64 audio
//! payloads. Transcription results flow back through the dispatch glue as
//! JSON envelopes on the same connection.
//!
//! ## Actor Model:
//! Each WebSocket connection is an independent Actix actor. The gateway
//! only parses envelopes and publishes audio events — buffering, job
//! lifecycle, and result routing live behind the event bus.

use crate::events::{topics, Event, EventBus};
use crate::protocol::{InboundMessage, OutboundMessage, SendOutbound};
use crate::session::registry::SessionRegistry;
use crate::state::AppState;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How often the server pings idle connections.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long without any client traffic before the connection is dropped.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// WebSocket actor for one client connection.
pub struct TranscribeWebSocket {
    /// Session id assigned to this connection at accept time.
    session_id: String,

    /// Every session id this connection registered (the assigned one,
    /// plus any client-supplied ids registered implicitly). All of them
    /// are torn down when the connection stops.
    owned_sessions: HashSet<String>,

    registry: Arc<SessionRegistry>,
    bus: EventBus,
    app_state: AppState,

    /// Last time we heard from the client.
    last_heartbeat: Instant,
}

impl TranscribeWebSocket {
    pub fn new(registry: Arc<SessionRegistry>, bus: EventBus, app_state: AppState) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            owned_sessions: HashSet::new(),
            registry,
            bus,
            app_state,
            last_heartbeat: Instant::now(),
        }
    }

    /// Register a session owned by this connection, idempotently.
    ///
    /// The original protocol lets clients address messages to a session id
    /// the server has not seen; first contact registers it against this
    /// connection.
    fn register_session(&mut self, session_id: &str, ctx: &mut ws::WebsocketContext<Self>) -> bool {
        match self
            .registry
            .register(session_id, ctx.address().recipient())
        {
            Ok(_) => {
                self.owned_sessions.insert(session_id.to_string());
                true
            }
            Err(err) => {
                warn!("Failed to register session {}: {}", session_id, err);
                ctx.text(OutboundMessage::error(&err.to_string(), None).to_json());
                false
            }
        }
    }

    /// Handle one parsed inbound envelope.
    fn handle_message(&mut self, message: InboundMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match message {
            InboundMessage::RealtimeTranscribe {
                session_id,
                message,
            } => {
                if !self.owned_sessions.contains(&session_id)
                    && !self.register_session(&session_id, ctx)
                {
                    return;
                }

                self.bus.publish(
                    topics::AUDIO_RECEIVED,
                    &Event::AudioReceived {
                        session_id,
                        audio_data: message,
                    },
                );
            }
        }
    }
}

impl Actor for TranscribeWebSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Called when the WebSocket connection starts.
    fn started(&mut self, ctx: &mut Self::Context) {
        info!("WebSocket connection started, session {}", self.session_id);
        self.app_state.update_metrics(|m| m.connections_total += 1);

        // Handshake first: the client needs its session id before it can
        // address audio messages.
        ctx.text(OutboundMessage::connected(&self.session_id).to_json());

        let session_id = self.session_id.clone();
        if !self.register_session(&session_id, ctx) {
            // Session limit reached; the error envelope has been sent.
            ctx.stop();
            return;
        }

        // Heartbeat: ping on an interval, drop clients that go silent.
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(
                    "Heartbeat timeout for session {}, closing connection",
                    act.session_id
                );
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    /// Called when the WebSocket connection stops: tear down every session
    /// this connection owns so their channels release any pending pull.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        for session_id in &self.owned_sessions {
            self.registry.unregister(session_id);
        }
        info!("WebSocket connection stopped, session {}", self.session_id);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for TranscribeWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                match serde_json::from_str::<InboundMessage>(&text) {
                    Ok(message) => self.handle_message(message, ctx),
                    Err(err) => {
                        // Malformed envelope: log and drop, connection
                        // remains open.
                        warn!(
                            "Dropping malformed message on session {}: {}",
                            self.session_id, err
                        );
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                // The protocol is JSON text frames with base64 payloads.
                warn!("Dropping unexpected binary frame on session {}", self.session_id);
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!("WebSocket closed by client: {:?}", reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Dropping unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// Deliver an outbound envelope to this connection.
impl Handler<SendOutbound> for TranscribeWebSocket {
    type Result = ();

    fn handle(&mut self, msg: SendOutbound, ctx: &mut Self::Context) {
        ctx.text(msg.0.to_json());
    }
}

/// WebSocket endpoint handler: upgrades the HTTP request and hands the
/// connection to a [`TranscribeWebSocket`] actor.
pub async fn transcribe_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
    registry: web::Data<SessionRegistry>,
    bus: web::Data<EventBus>,
) -> ActixResult<HttpResponse> {
    debug!(
        "New WebSocket connection request from {:?}",
        req.connection_info().peer_addr()
    );

    let websocket = TranscribeWebSocket::new(
        registry.clone().into_inner(),
        bus.get_ref().clone(),
        app_state.get_ref().clone(),
    );

    ws::start(websocket, &req, stream)
}
