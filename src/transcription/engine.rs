//! # Recognition Engine Seam
//!
//! The streaming engine is an opaque duplex collaborator: it accepts a
//! stream configuration plus a pull-based audio frame feed, and returns a
//! lazy, possibly-infinite sequence of transcript events that terminates
//! on engine-side completion or failure.
//!
//! The [`RecognitionEngine`] trait keeps that collaborator swappable —
//! production uses [`WsRecognitionEngine`] (JSON/binary over WebSocket),
//! tests substitute a scripted engine.

use crate::error::ChannelError;
use crate::session::channel::{AudioFrame, FrameChannel, Pulled};
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use futures_util::stream::{Stream, StreamExt};
use futures_util::SinkExt;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

/// Configuration for one streaming recognition call.
#[derive(Debug, Clone, Serialize)]
pub struct StreamConfig {
    pub language: String,
    pub sample_rate: u32,
    pub encoding: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            sample_rate: 48000,
            encoding: "pcm".to_string(),
        }
    }
}

/// One transcript event emitted by the engine.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EngineEvent {
    /// Transcribed text for the current utterance.
    pub text: String,
    /// True for in-progress results that later events supersede; false
    /// marks an utterance boundary.
    pub partial: bool,
}

/// Lazy sequence of engine output events. An `Err` item is terminal from
/// the consumer's point of view.
pub type EngineEventStream = Pin<Box<dyn Stream<Item = Result<EngineEvent>> + Send>>;

/// One started recognition stream: the engine's output events plus the
/// handle of the task pumping audio frames into the engine.
///
/// The feed task's lifetime is bound to the job consuming `events` —
/// when the job ends it must abort the handle, otherwise the stale feed
/// stays registered on the session's frame channel and steals frames
/// from the next job.
pub struct EngineStream {
    pub events: EngineEventStream,
    pub feed_task: JoinHandle<()>,
}

/// Pull-based audio feed handed to exactly one recognition job.
///
/// Wraps the session's frame channel in its single-consumer role: the
/// feed is moved into the job, which upholds the one-outstanding-pull
/// discipline by construction.
pub struct FrameFeed {
    channel: Arc<FrameChannel>,
}

impl FrameFeed {
    pub fn new(channel: Arc<FrameChannel>) -> Self {
        Self { channel }
    }

    /// Next frame in push order, or `None` once the channel is closed and
    /// drained.
    pub async fn next_frame(&self) -> Result<Option<AudioFrame>, ChannelError> {
        match self.channel.pull().await? {
            Pulled::Frame(frame) => Ok(Some(frame)),
            Pulled::Closed => Ok(None),
        }
    }
}

/// The external streaming speech-recognition engine.
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    /// Start one recognition job: consume `feed` until it terminates and
    /// return the engine's lazy output event stream together with the
    /// feed task driving the audio side.
    async fn start_stream(&self, config: &StreamConfig, feed: FrameFeed)
        -> Result<EngineStream>;
}

/// WebSocket-backed engine client.
///
/// ## Wire Exchange:
/// 1. Connect to the configured endpoint.
/// 2. Send the stream configuration as a JSON text frame.
/// 3. Feed audio as binary frames from the pull-based feed (own task).
/// 4. Surface inbound text frames as [`EngineEvent`]s until the engine
///    closes the socket or fails.
pub struct WsRecognitionEngine {
    endpoint: String,
}

impl WsRecognitionEngine {
    pub fn new(endpoint: String) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl RecognitionEngine for WsRecognitionEngine {
    async fn start_stream(
        &self,
        config: &StreamConfig,
        feed: FrameFeed,
    ) -> Result<EngineStream> {
        let (socket, _response) = connect_async(self.endpoint.as_str())
            .await
            .context("failed to connect to recognition engine")?;
        let (mut sink, source) = socket.split();

        let start = serde_json::to_string(config)?;
        sink.send(Message::Text(start))
            .await
            .context("failed to send stream configuration")?;

        // Feed loop: pull frames in push order and forward them as binary
        // frames. Ends when the session channel closes (drained feed) or
        // the engine side rejects a write.
        let feed_task = tokio::spawn(async move {
            loop {
                match feed.next_frame().await {
                    Ok(Some(frame)) => {
                        if let Err(err) = sink.send(Message::Binary(frame.payload)).await {
                            warn!("Engine rejected audio frame: {}", err);
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("Frame feed terminated, closing engine stream");
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    Err(err) => {
                        // Single-consumer violation; the feed is owned by
                        // this task, so this indicates a defect upstream.
                        warn!("Frame feed contract violation: {}", err);
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        let events = source.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => match serde_json::from_str::<EngineEvent>(&text) {
                    Ok(event) => Some(Ok(event)),
                    Err(err) => {
                        warn!("Unparseable engine event, skipping: {}", err);
                        None
                    }
                },
                Ok(Message::Close(_)) => None,
                Ok(_) => None, // ping/pong/binary frames carry no events
                Err(err) => Some(Err(anyhow::anyhow!("engine stream failed: {}", err))),
            }
        });

        Ok(EngineStream {
            events: Box::pin(events),
            feed_task,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_config_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.encoding, "pcm");
        assert_eq!(config.language, "en-US");
    }

    #[test]
    fn test_engine_event_parsing() {
        let event: EngineEvent =
            serde_json::from_str(r#"{"text":"hello world","partial":false}"#).unwrap();
        assert_eq!(event.text, "hello world");
        assert!(!event.partial);
    }

    #[tokio::test]
    async fn test_frame_feed_terminates_on_close() {
        let channel = Arc::new(FrameChannel::new());
        let feed = FrameFeed::new(channel.clone());

        channel.push(AudioFrame::new(vec![1, 2]));
        channel.close();

        assert_eq!(
            feed.next_frame().await.unwrap(),
            Some(AudioFrame::new(vec![1, 2]))
        );
        assert_eq!(feed.next_frame().await.unwrap(), None);
        assert_eq!(feed.next_frame().await.unwrap(), None);
    }
}
