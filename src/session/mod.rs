//! # Session Management
//!
//! Per-session state for live transcription: the ordered audio frame
//! channel each session owns, and the registry tracking live sessions and
//! their owning connections.

pub mod channel;
pub mod registry;

pub use channel::{AudioFrame, FrameChannel, Pulled};
pub use registry::{Session, SessionRegistry, SessionState};
