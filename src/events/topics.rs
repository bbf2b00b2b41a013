//! Topic names used on the event bus.
//!
//! Topics are plain string keys; ordering is only guaranteed within a
//! single topic's subscriber list, never across topics.

/// Raw audio payload arrived from a client connection.
pub const AUDIO_RECEIVED: &str = "transcription.audio.received";

/// Final (utterance-complete) transcription result.
pub const TRANSCRIPTION_RESULT: &str = "transcription.result";

/// In-progress transcription result.
pub const TRANSCRIPTION_PARTIAL: &str = "transcription.partial";

/// Session-scoped failure.
pub const TRANSCRIPTION_ERROR: &str = "transcription.error";
