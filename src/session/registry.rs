//! # Session Registry
//!
//! Tracks live transcription sessions, their frame channels, and which
//! connection owns each session. The registry is the single writer of
//! session state and of the one-job-per-session guard; every other
//! component goes through the methods here.
//!
//! ## Session Lifecycle:
//! 1. **Created**: registered, waiting for the first audio frame
//! 2. **Streaming**: a recognition job is consuming the frame channel
//! 3. **Closing**: unregister in progress, channel draining/terminating
//! 4. **Closed**: terminal; no further frames accepted, no further events

use crate::error::{AppError, AppResult};
use crate::protocol::SendOutbound;
use crate::session::channel::FrameChannel;
use actix::Recipient;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Current state of a transcription session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Streaming,
    Closing,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &str {
        match self {
            SessionState::Created => "created",
            SessionState::Streaming => "streaming",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }
}

/// Server-side state for one client's continuous transcription activity.
///
/// ## Ownership:
/// The registry exclusively owns the session and its frame channel; the
/// recognition adapter holds only a shared reference to the channel for
/// the duration of one job. State and the job guard are mutated solely
/// through registry methods.
pub struct Session {
    pub session_id: String,
    state: RwLock<SessionState>,
    channel: Arc<FrameChannel>,
    /// True iff a recognition job is currently running for this session.
    /// At most one job may be active at any instant.
    job_active: AtomicBool,
}

impl Session {
    fn new(session_id: String) -> Self {
        Self {
            session_id,
            state: RwLock::new(SessionState::Created),
            channel: Arc::new(FrameChannel::new()),
            job_active: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap()
    }

    /// The session's exclusively owned frame channel.
    pub fn channel(&self) -> Arc<FrameChannel> {
        self.channel.clone()
    }

    pub fn job_active(&self) -> bool {
        self.job_active.load(Ordering::SeqCst)
    }

    fn set_state(&self, new_state: SessionState) {
        *self.state.write().unwrap() = new_state;
    }
}

/// Tracks live sessions and their owning connections.
///
/// Two maps under separate locks: the session map (registry-owned state)
/// and the session→connection map used by the dispatch glue. Neither lock
/// is ever held across an await point.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    connections: RwLock<HashMap<String, Recipient<SendOutbound>>>,
    max_concurrent_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_concurrent_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
            max_concurrent_sessions,
        }
    }

    /// Create a session in state `Created` and record the mapping
    /// session→connection.
    ///
    /// Idempotent on an existing id: returns the existing session without
    /// resetting it or replacing its connection mapping.
    pub fn register(
        &self,
        session_id: &str,
        connection: Recipient<SendOutbound>,
    ) -> AppResult<Arc<Session>> {
        let mut sessions = self.sessions.write().unwrap();

        if let Some(existing) = sessions.get(session_id) {
            debug!("Session {} already registered, reusing", session_id);
            return Ok(existing.clone());
        }

        if sessions.len() >= self.max_concurrent_sessions {
            return Err(AppError::SessionLimit(self.max_concurrent_sessions));
        }

        let session = Arc::new(Session::new(session_id.to_string()));
        sessions.insert(session_id.to_string(), session.clone());
        drop(sessions);

        self.connections
            .write()
            .unwrap()
            .insert(session_id.to_string(), connection);

        info!("Registered session {}", session_id);
        Ok(session)
    }

    /// Tear down a session: transition to `Closing`, signal its frame
    /// channel to drain-and-terminate (waking any pending pull), then
    /// remove it from the registry and discard the connection mapping.
    ///
    /// Safe to call for an unknown id (no-op) and safe to call while a
    /// recognition job is mid-flight — the job observes the channel close
    /// and terminates its own iteration.
    pub fn unregister(&self, session_id: &str) {
        let session = {
            let mut sessions = self.sessions.write().unwrap();
            let Some(session) = sessions.get(session_id).cloned() else {
                return;
            };

            // `Closing` must be visible before the map entry disappears,
            // so a concurrently finishing job never observes a session
            // that is both absent and still `Streaming`.
            session.set_state(SessionState::Closing);
            session.channel.close();
            sessions.remove(session_id);
            session
        };
        self.connections.write().unwrap().remove(session_id);

        // With no job running there is nobody left to finish the
        // transition; close out here. Otherwise finish_job completes it.
        if !session.job_active() {
            session.set_state(SessionState::Closed);
        }

        info!("Unregistered session {}", session_id);
    }

    /// Look up the connection owning a session, for dispatch purposes.
    pub fn resolve_connection(&self, session_id: &str) -> Option<Recipient<SendOutbound>> {
        self.connections.read().unwrap().get(session_id).cloned()
    }

    pub fn get_session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().unwrap().get(session_id).cloned()
    }

    /// Attempt to claim the session's single job slot.
    ///
    /// Returns true exactly once per idle→active transition; a request
    /// arriving while a job is already active gets false and must be
    /// treated as a silent no-op, never as a second job.
    pub fn try_start_job(&self, session: &Session) -> bool {
        if session.state() == SessionState::Closing || session.state() == SessionState::Closed {
            return false;
        }

        let claimed = session
            .job_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();

        if claimed {
            session.set_state(SessionState::Streaming);
            debug!("Started recognition job for session {}", session.session_id);
        }
        claimed
    }

    /// Release the session's job slot after its recognition job ends.
    ///
    /// If the session is closing (or already gone from the registry) it
    /// finishes `Closed`; otherwise it stays ready to accept a fresh job
    /// on the next audio activity.
    pub fn finish_job(&self, session: &Session) {
        session.job_active.store(false, Ordering::SeqCst);

        let closing = session.state() == SessionState::Closing
            || !self.sessions.read().unwrap().contains_key(&session.session_id);

        if closing {
            session.set_state(SessionState::Closed);
        } else {
            session.set_state(SessionState::Created);
        }
        debug!(
            "Finished recognition job for session {}, now {}",
            session.session_id,
            session.state().as_str()
        );
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::channel::Pulled;
    use actix::{Actor, Context, Handler};

    /// Minimal connection stand-in for registry tests.
    struct NullConnection;

    impl Actor for NullConnection {
        type Context = Context<Self>;
    }

    impl Handler<SendOutbound> for NullConnection {
        type Result = ();
        fn handle(&mut self, _msg: SendOutbound, _ctx: &mut Self::Context) {}
    }

    fn recipient() -> Recipient<SendOutbound> {
        NullConnection.start().recipient()
    }

    #[actix_web::test]
    async fn test_register_is_idempotent() {
        let registry = SessionRegistry::new(4);

        let first = registry.register("S1", recipient()).unwrap();
        registry.try_start_job(&first);

        // Re-registering must return the same session, not reset it.
        let second = registry.register("S1", recipient()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.state(), SessionState::Streaming);
        assert_eq!(registry.active_session_count(), 1);
    }

    #[actix_web::test]
    async fn test_session_limit_enforced() {
        let registry = SessionRegistry::new(1);
        registry.register("S1", recipient()).unwrap();

        match registry.register("S2", recipient()) {
            Err(AppError::SessionLimit(1)) => {}
            other => panic!("expected session limit error, got {:?}", other.map(|_| ())),
        }
    }

    #[actix_web::test]
    async fn test_unregister_closes_channel_and_drops_connection() {
        let registry = SessionRegistry::new(4);
        let session = registry.register("S1", recipient()).unwrap();
        let channel = session.channel();

        registry.unregister("S1");

        assert!(channel.is_closed());
        assert_eq!(channel.pull().await.unwrap(), Pulled::Closed);
        assert!(registry.resolve_connection("S1").is_none());
        assert!(registry.get_session("S1").is_none());
        assert_eq!(session.state(), SessionState::Closed);

        // Unknown/already-removed ids are a no-op; `Closed` is terminal.
        registry.unregister("S1");
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[actix_web::test]
    async fn test_single_job_per_session() {
        let registry = SessionRegistry::new(4);
        let session = registry.register("S1", recipient()).unwrap();

        assert!(registry.try_start_job(&session));
        // Second start while active is a no-op.
        assert!(!registry.try_start_job(&session));
        assert_eq!(session.state(), SessionState::Streaming);

        registry.finish_job(&session);
        assert!(!session.job_active());
        // Session stays usable for a retry on the next audio activity.
        assert_eq!(session.state(), SessionState::Created);
        assert!(registry.try_start_job(&session));
    }

    #[actix_web::test]
    async fn test_finish_job_after_unregister_closes_session() {
        let registry = SessionRegistry::new(4);
        let session = registry.register("S1", recipient()).unwrap();

        assert!(registry.try_start_job(&session));
        registry.unregister("S1");
        assert_eq!(session.state(), SessionState::Closing);

        registry.finish_job(&session);
        assert_eq!(session.state(), SessionState::Closed);
        // No job can ever start on a closed session.
        assert!(!registry.try_start_job(&session));
    }

    #[actix_web::test]
    async fn test_resolve_connection() {
        let registry = SessionRegistry::new(4);
        registry.register("S1", recipient()).unwrap();

        assert!(registry.resolve_connection("S1").is_some());
        assert!(registry.resolve_connection("unknown").is_none());
    }
}
