//! # Streaming Transcription
//!
//! The seam to the external streaming recognition engine and the adapter
//! that bridges session frame channels to engine jobs and routes engine
//! events back onto the bus.

pub mod engine;
pub mod service;

pub use engine::{
    EngineEvent, EngineStream, FrameFeed, RecognitionEngine, StreamConfig, WsRecognitionEngine,
};
pub use service::TranscriptionService;
