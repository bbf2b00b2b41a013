//! # Transcription Service
//!
//! The streaming recognition adapter plus the dispatch glue, wired
//! together over the event bus:
//!
//! - **audio intake**: subscribes to the audio topic, decodes payloads,
//!   pushes frames onto the owning session's channel, and starts at most
//!   one recognition job per session;
//! - **recognition job**: one spawned task per active session that feeds
//!   the engine from the frame channel and publishes normalized transcript
//!   events tagged with the session id;
//! - **dispatch glue**: subscribes to the partial/final/error topics and
//!   forwards formatted envelopes to the owning connection, silently
//!   dropping events whose session is already gone.

use crate::events::{topics, Event, EventBus, Subscription};
use crate::protocol::{OutboundMessage, SendOutbound};
use crate::session::channel::AudioFrame;
use crate::session::registry::{Session, SessionRegistry};
use crate::state::AppState;
use crate::transcription::engine::{EngineStream, FrameFeed, RecognitionEngine, StreamConfig};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::StreamExt;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Browser capture pipelines prefix base64 payloads with a data-URL
/// marker; it must be stripped before decoding.
const PCM_DATA_URL_PREFIX: &str = "data:audio/pcm;base64,";

/// Stable, non-leaking error messages surfaced to clients.
const ENGINE_ERROR_MESSAGE: &str = "transcription engine error";
const DECODE_ERROR_MESSAGE: &str = "Error processing audio data";

/// Decode a base64 audio payload, stripping the optional data-URL prefix.
pub fn decode_audio_payload(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let trimmed = payload.strip_prefix(PCM_DATA_URL_PREFIX).unwrap_or(payload);
    BASE64.decode(trimmed)
}

/// Collapse a single space immediately preceding a terminal punctuation
/// mark, so engines that emit punctuation as separate space-joined tokens
/// read naturally ("hello . world" → "hello. world").
pub fn normalize_spacing(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '.' | ',' | '!' | '?') && out.ends_with(' ') {
            out.pop();
        }
        out.push(c);
    }
    out
}

/// Clears the session's job slot when a recognition job task exits, on
/// every path out of the task including early returns.
struct JobGuard {
    registry: Arc<SessionRegistry>,
    session: Arc<Session>,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.registry.finish_job(&self.session);
    }
}

/// Owns the lifetime of recognition jobs and the event-bus subscriptions
/// that bridge sessions to the engine and back to their connections.
pub struct TranscriptionService {
    bus: EventBus,
    registry: Arc<SessionRegistry>,
    engine: Arc<dyn RecognitionEngine>,
    stream_config: StreamConfig,
    app_state: AppState,
    /// Held for the service's lifetime; disposing them detaches the
    /// service from the bus.
    subscriptions: Mutex<Vec<Subscription>>,
}

impl TranscriptionService {
    pub fn new(
        bus: EventBus,
        registry: Arc<SessionRegistry>,
        engine: Arc<dyn RecognitionEngine>,
        stream_config: StreamConfig,
        app_state: AppState,
    ) -> Self {
        Self {
            bus,
            registry,
            engine,
            stream_config,
            app_state,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Register all bus subscriptions. Called once at composition time.
    pub fn setup_subscriptions(service: &Arc<Self>) {
        let mut subscriptions = service.subscriptions.lock().unwrap();

        let audio_service = service.clone();
        subscriptions.push(service.bus.subscribe(topics::AUDIO_RECEIVED, move |event| {
            if let Event::AudioReceived {
                session_id,
                audio_data,
            } = event
            {
                Self::handle_audio(&audio_service, session_id, audio_data);
            }
            Ok(())
        }));

        // Dispatch glue: partial/final/error events all resolve the owning
        // connection the same way.
        for topic in [
            topics::TRANSCRIPTION_PARTIAL,
            topics::TRANSCRIPTION_RESULT,
            topics::TRANSCRIPTION_ERROR,
        ] {
            let dispatch_service = service.clone();
            subscriptions.push(service.bus.subscribe(topic, move |event| {
                dispatch_service.dispatch(event);
                Ok(())
            }));
        }

        info!("Transcription service subscriptions registered");
    }

    /// Handle one inbound audio payload for a session.
    ///
    /// Decode failures substitute an empty frame and publish a
    /// session-scoped error event rather than blocking the pipeline or
    /// propagating an error to the caller.
    fn handle_audio(service: &Arc<Self>, session_id: &str, audio_data: &str) {
        let Some(session) = service.registry.get_session(session_id) else {
            // Session already unregistered; late audio is expected during
            // teardown and dropped.
            debug!("Audio for unknown session {}, dropping", session_id);
            return;
        };

        let frame = match decode_audio_payload(audio_data) {
            Ok(payload) => AudioFrame::new(payload),
            Err(err) => {
                warn!("Audio decode failed for session {}: {}", session_id, err);
                service.app_state.update_metrics(|m| m.decode_failures += 1);
                service.bus.publish(
                    topics::TRANSCRIPTION_ERROR,
                    &Event::Error {
                        session_id: session_id.to_string(),
                        message: DECODE_ERROR_MESSAGE.to_string(),
                    },
                );
                AudioFrame::empty()
            }
        };

        service.app_state.update_metrics(|m| m.frames_received += 1);
        session.channel().push(frame);

        Self::ensure_job(service, session);
    }

    /// Start a recognition job for the session unless one is already
    /// active. The duplicate case is a silent no-op by contract.
    fn ensure_job(service: &Arc<Self>, session: Arc<Session>) {
        if !service.registry.try_start_job(&session) {
            return;
        }

        let service = service.clone();
        tokio::spawn(async move {
            service.run_job(session).await;
        });
    }

    /// One recognition job: feed the engine from the session's channel and
    /// publish its output events until the stream terminates or the
    /// session is torn down.
    async fn run_job(self: Arc<Self>, session: Arc<Session>) {
        let session_id = session.session_id.clone();
        let _guard = JobGuard {
            registry: self.registry.clone(),
            session: session.clone(),
        };

        let channel = session.channel();
        let feed = FrameFeed::new(channel.clone());

        let EngineStream {
            mut events,
            feed_task,
        } = match self.engine.start_stream(&self.stream_config, feed).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!("Failed to start recognition job for {}: {:#}", session_id, err);
                self.publish_engine_error(&session_id);
                return;
            }
        };

        info!("Recognition job streaming for session {}", session_id);

        // The event loop races against channel closure so unregister ends
        // the job even when the engine never terminates its stream.
        loop {
            tokio::select! {
                item = events.next() => match item {
                    Some(Ok(event)) => {
                        let text = normalize_spacing(&event.text);
                        let topic = if event.partial {
                            topics::TRANSCRIPTION_PARTIAL
                        } else {
                            topics::TRANSCRIPTION_RESULT
                        };
                        self.bus.publish(
                            topic,
                            &Event::Transcript {
                                session_id: session_id.clone(),
                                text,
                                partial: event.partial,
                            },
                        );
                    }
                    Some(Err(err)) => {
                        warn!("Engine stream failed for session {}: {:#}", session_id, err);
                        break;
                    }
                    None => break,
                },
                _ = channel.closed() => {
                    debug!("Session {} closed, ending recognition job", session_id);
                    break;
                }
            }
        }

        // The feed must die with the job. Left running it would stay
        // registered as the channel's waiter and steal frames meant for
        // the next job on this session.
        feed_task.abort();

        // Failure and end-of-stream converge here: surface a stable,
        // session-scoped error. If the session is closing, dispatch drops
        // it with the connection already gone.
        self.publish_engine_error(&session_id);
        info!("Recognition job ended for session {}", session_id);
    }

    fn publish_engine_error(&self, session_id: &str) {
        self.bus.publish(
            topics::TRANSCRIPTION_ERROR,
            &Event::Error {
                session_id: session_id.to_string(),
                message: ENGINE_ERROR_MESSAGE.to_string(),
            },
        );
    }

    /// Dispatch glue: forward a transcript or error event to the owning
    /// connection. A missing connection means the session was already
    /// unregistered — expected, dropped silently.
    fn dispatch(&self, event: &Event) {
        let outbound = match event {
            Event::Transcript {
                session_id,
                text,
                partial: true,
            } => OutboundMessage::TranscriptPartial {
                message: text.clone(),
                session_id: session_id.clone(),
            },
            Event::Transcript {
                session_id,
                text,
                partial: false,
            } => OutboundMessage::Transcript {
                message: text.clone(),
                session_id: session_id.clone(),
            },
            Event::Error {
                session_id,
                message,
            } => OutboundMessage::error(message, Some(session_id.clone())),
            Event::AudioReceived { .. } => return,
        };

        match self.registry.resolve_connection(event.session_id()) {
            Some(connection) => {
                connection.do_send(SendOutbound(outbound));
                self.app_state.update_metrics(|m| m.transcripts_dispatched += 1);
            }
            None => {
                debug!(
                    "Dropping event for closed session {}",
                    event.session_id()
                );
                self.app_state.update_metrics(|m| m.dispatch_dropped += 1);
            }
        }
    }
}
