//! # Event Routing
//!
//! Generic topic-based publish/subscribe used to decouple the gateway,
//! the recognition adapter, and the dispatch glue. The router itself has
//! no session awareness — session scoping lives in the event payloads.

pub mod bus;
pub mod topics;

pub use bus::{EventBus, Subscription};

/// The closed set of event payloads carried by the router.
///
/// The transport boundary validates raw JSON into `InboundMessage` before
/// anything is published, so the core never handles dynamically-shaped
/// data — only these variants.
#[derive(Debug, Clone)]
pub enum Event {
    /// A base64 audio payload arrived for a session.
    AudioReceived {
        session_id: String,
        audio_data: String,
    },

    /// The engine produced a partial or final transcript for a session.
    Transcript {
        session_id: String,
        text: String,
        partial: bool,
    },

    /// A session-scoped failure (decode error, engine error).
    Error {
        session_id: String,
        message: String,
    },
}

impl Event {
    /// The session this event belongs to.
    pub fn session_id(&self) -> &str {
        match self {
            Event::AudioReceived { session_id, .. } => session_id,
            Event::Transcript { session_id, .. } => session_id,
            Event::Error { session_id, .. } => session_id,
        }
    }
}
