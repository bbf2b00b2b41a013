//! # Audio Frame Channel
//!
//! Adapts an unbounded sequence of *pushed* audio frames (one per inbound
//! message) into a *pulled* sequence consumed one-at-a-time by a single
//! long-running recognition feed loop, with race-free shutdown.
//!
//! ## Design:
//! The channel holds a FIFO buffer of already-pushed frames plus at most
//! one outstanding "waiting puller" slot (a oneshot sender). A push hands
//! the frame directly to a waiting puller when one exists, skipping the
//! buffer for the common case of a consumer waiting on an empty channel.
//!
//! ## Shutdown Contract:
//! `close()` must always wake a waiting puller with the termination signal
//! within the same call — a puller left suspended after close is a fatal
//! defect, not a recoverable condition. Frames still buffered at close may
//! be drained by later pulls; once drained, pulls return `Closed`.
//!
//! The buffer is unbounded; it is implicitly bounded by the rate audio
//! arrives versus the rate the engine consumes. A production hardening
//! would cap it and define an overflow policy (drop-oldest or
//! block-producer).

use crate::error::ChannelError;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::{oneshot, Notify};
use tracing::debug;

/// One decoded unit of audio payload submitted by a session.
///
/// An empty payload stands in for a decode failure upstream — it keeps the
/// pipeline moving instead of blocking it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub payload: Vec<u8>,
}

impl AudioFrame {
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    /// The substitute frame used when a payload fails to decode.
    pub fn empty() -> Self {
        Self { payload: Vec::new() }
    }
}

/// What a `pull()` resolved to.
#[derive(Debug, PartialEq, Eq)]
pub enum Pulled {
    /// The oldest available frame, in exact push order.
    Frame(AudioFrame),
    /// The channel is closed and fully drained; no further frames will
    /// ever be produced.
    Closed,
}

/// State guarded by the channel mutex.
struct ChannelState {
    buffer: VecDeque<AudioFrame>,
    /// At most one outstanding puller. `None` when nobody is waiting.
    waiter: Option<oneshot::Sender<Pulled>>,
    closed: bool,
}

/// Single-producer-side, single-consumer ordered frame handoff.
///
/// ## Ordering Invariant:
/// The consumer observes frames in the exact order `push` was called,
/// with no reordering and no duplication. Loss occurs only for frames
/// still buffered when `close()` happens and never drained.
pub struct FrameChannel {
    state: Mutex<ChannelState>,
    /// Wakes `closed()` observers; separate from the waiter slot so any
    /// number of tasks can watch for shutdown without holding a pull.
    close_notify: Notify,
}

impl FrameChannel {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState {
                buffer: VecDeque::new(),
                waiter: None,
                closed: false,
            }),
            close_notify: Notify::new(),
        }
    }

    /// Submit a frame to the channel.
    ///
    /// Hands the frame directly to a live waiting puller when one exists,
    /// otherwise appends to the FIFO buffer. Pushes after `close()` are
    /// dropped with a log line — never an error back to the caller, since
    /// late frames during teardown are expected.
    pub fn push(&self, frame: AudioFrame) {
        let mut state = self.state.lock().unwrap();

        if state.closed {
            debug!("Dropping frame pushed after channel close");
            return;
        }

        if let Some(waiter) = state.waiter.take() {
            // The puller's future may have been cancelled between
            // registering and receiving; recover the frame into the
            // buffer so nothing is lost.
            if let Err(Pulled::Frame(frame)) = waiter.send(Pulled::Frame(frame)) {
                state.buffer.push_back(frame);
            }
        } else {
            state.buffer.push_back(frame);
        }
    }

    /// Take the next frame, suspending until one is pushed or the channel
    /// is closed.
    ///
    /// ## Single-Consumer Discipline:
    /// At most one `pull()` may be outstanding at a time. A second
    /// concurrent pull while a live waiter exists fails fast with
    /// [`ChannelError::PullInProgress`] rather than silently deadlocking.
    /// A waiter whose pull future was dropped does not count — its slot is
    /// reclaimed by the next pull.
    pub async fn pull(&self) -> Result<Pulled, ChannelError> {
        let receiver = {
            let mut state = self.state.lock().unwrap();

            // Buffered frames drain first, even after close.
            if let Some(frame) = state.buffer.pop_front() {
                return Ok(Pulled::Frame(frame));
            }

            if state.closed {
                return Ok(Pulled::Closed);
            }

            // A live waiter means a second concurrent pull: contract
            // violation. A dead waiter (cancelled pull) is reclaimed.
            if state.waiter.as_ref().is_some_and(|w| !w.is_closed()) {
                return Err(ChannelError::PullInProgress);
            }

            let (sender, receiver) = oneshot::channel();
            state.waiter = Some(sender);
            receiver
        };

        match receiver.await {
            Ok(pulled) => Ok(pulled),
            // Sender dropped without a value: the channel itself was torn
            // down. Treat as termination.
            Err(_) => Ok(Pulled::Closed),
        }
    }

    /// Close the channel. Idempotent.
    ///
    /// Any currently waiting puller is woken with [`Pulled::Closed`]
    /// before this call returns — this is the critical correctness
    /// requirement for clean session teardown.
    pub fn close(&self) {
        {
            let mut state = self.state.lock().unwrap();

            if state.closed {
                return;
            }
            state.closed = true;

            if let Some(waiter) = state.waiter.take() {
                let _ = waiter.send(Pulled::Closed);
            }
        }

        self.close_notify.notify_waiters();
    }

    /// Resolve once the channel has been closed; immediately if it
    /// already is. Independent of the single-consumer pull discipline,
    /// so a job can race its event loop against session teardown.
    pub async fn closed(&self) {
        loop {
            let notified = self.close_notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    /// Whether `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Number of frames currently buffered (diagnostics and tests).
    pub fn buffered_len(&self) -> usize {
        self.state.lock().unwrap().buffer.len()
    }
}

impl Default for FrameChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn frame(tag: u8) -> AudioFrame {
        AudioFrame::new(vec![tag])
    }

    #[tokio::test]
    async fn test_fifo_order_exactly_once() {
        let channel = FrameChannel::new();

        for tag in 0..5u8 {
            channel.push(frame(tag));
        }

        for tag in 0..5u8 {
            assert_eq!(channel.pull().await.unwrap(), Pulled::Frame(frame(tag)));
        }
        assert_eq!(channel.buffered_len(), 0);
    }

    #[tokio::test]
    async fn test_push_hands_frame_to_waiting_puller() {
        let channel = Arc::new(FrameChannel::new());

        let puller = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.pull().await })
        };

        // Let the puller register its waiter slot before pushing.
        tokio::task::yield_now().await;
        channel.push(frame(7));

        let pulled = timeout(Duration::from_secs(1), puller)
            .await
            .expect("pull must resolve")
            .unwrap()
            .unwrap();
        assert_eq!(pulled, Pulled::Frame(frame(7)));
        // Direct handoff: the frame never touched the buffer.
        assert_eq!(channel.buffered_len(), 0);
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_pull() {
        let channel = Arc::new(FrameChannel::new());

        let puller = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.pull().await })
        };

        tokio::task::yield_now().await;
        channel.close();

        // Must resolve promptly with the termination signal — never hang.
        let pulled = timeout(Duration::from_secs(1), puller)
            .await
            .expect("close must unblock the pending pull")
            .unwrap()
            .unwrap();
        assert_eq!(pulled, Pulled::Closed);
    }

    #[tokio::test]
    async fn test_buffered_frames_drain_after_close() {
        let channel = FrameChannel::new();
        channel.push(frame(1));
        channel.push(frame(2));

        channel.close();

        assert_eq!(channel.pull().await.unwrap(), Pulled::Frame(frame(1)));
        assert_eq!(channel.pull().await.unwrap(), Pulled::Frame(frame(2)));
        assert_eq!(channel.pull().await.unwrap(), Pulled::Closed);
        // Once drained-and-closed, pulls keep returning Closed.
        assert_eq!(channel.pull().await.unwrap(), Pulled::Closed);
    }

    #[tokio::test]
    async fn test_push_after_close_is_dropped() {
        let channel = FrameChannel::new();
        channel.close();
        channel.push(frame(9));

        assert_eq!(channel.buffered_len(), 0);
        assert_eq!(channel.pull().await.unwrap(), Pulled::Closed);
    }

    #[tokio::test]
    async fn test_second_concurrent_pull_fails_fast() {
        let channel = Arc::new(FrameChannel::new());

        let first = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.pull().await })
        };
        tokio::task::yield_now().await;

        // The first pull is suspended on the empty buffer; a second pull
        // must fail immediately instead of deadlocking.
        assert_eq!(
            channel.pull().await.unwrap_err(),
            ChannelError::PullInProgress
        );

        channel.close();
        assert_eq!(first.await.unwrap().unwrap(), Pulled::Closed);
    }

    #[tokio::test]
    async fn test_closed_observer_wakes_on_close() {
        let channel = Arc::new(FrameChannel::new());

        let watcher = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.closed().await })
        };

        tokio::task::yield_now().await;
        channel.close();

        timeout(Duration::from_secs(1), watcher)
            .await
            .expect("closed() must resolve once the channel closes")
            .unwrap();

        // Already-closed channels resolve immediately.
        channel.closed().await;
    }

    #[tokio::test]
    async fn test_cancelled_pull_does_not_wedge_channel() {
        let channel = FrameChannel::new();

        // Poll a pull once so it registers as the waiter, then drop it.
        let mut cancelled = Box::pin(channel.pull());
        assert!(cancelled.as_mut().now_or_never().is_none());
        drop(cancelled);

        // The frame handed to the dead waiter falls back into the buffer.
        channel.push(frame(3));
        assert_eq!(channel.buffered_len(), 1);

        // And a fresh pull reclaims the stale waiter slot.
        assert_eq!(channel.pull().await.unwrap(), Pulled::Frame(frame(3)));
    }
}
