//! The per-session state machine.
//!
//! A [`Session`] owns the two halves of one paired connection and relays
//! frames between them.  It never reads a socket itself: each attached
//! connection arrives as a [`Link`], and a small *pump* task per connection
//! feeds that link's [`LinkEvent`]s into [`Session::handle_event`].
//!
//! # Locking
//!
//! All mutable state sits behind one `std::sync::Mutex`.  Every critical
//! section is short and synchronous (`try_send` into a bounded queue, flip
//! a field) and the lock is never held across an `.await`, so a blocking mutex
//! is cheaper than an async one here.  Events from the master and the slave
//! race for that lock; whichever wins decides the transition and the other
//! observes the result.
//!
//! # Teardown
//!
//! [`Session::abandon`] is the only teardown path.  It checks for
//! `Destroyed` under the lock before doing anything, so calling it twice, or
//! from both sides at once, releases the directory claim at most once.
//!
//! # Slow peers
//!
//! Relayed frames are never buffered beyond a connection's outbound queue.
//! When a frame finds the receiving side's queue full, that side is dropped
//! as if it had reset, and the sender is asked to close with
//! [`REASON_PEER_TOO_SLOW`].

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use tether_core::{
    encode_control, is_control_frame, ClaimToken, ControlMessage, Frame, SessionId, SessionState,
    SessionSummary,
};

use crate::application::control::Control;
use crate::application::link::{Link, LinkEvent, PeerHandle};

/// Close reason sent to the surviving side after a transport error.
pub const REASON_REMOTE_ERROR: &str = "remote connection error";
/// Close reason sent to the surviving side after an abnormal reset.
pub const REASON_REMOTE_RESET: &str = "remote connection reset";
/// Close reason sent to a side whose peer stopped draining relayed frames.
pub const REASON_PEER_TOO_SLOW: &str = "remote connection too slow";

/// Which side of the pipe a connection plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The interactive client.
    Master,
    /// The agent inside the remote job.
    Slave,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Slave => "slave",
        }
    }

    /// The role on the other end of the pipe.
    pub fn peer(self) -> Role {
        match self {
            Role::Master => Role::Slave,
            Role::Slave => Role::Master,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An attach call that the current state does not allow.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("cannot attach {role}: session is {state}")]
    InvalidState { role: Role, state: SessionState },

    #[error("session already has a slave")]
    SlaveAlreadyAttached,
}

struct Inner {
    state: SessionState,
    master: Option<PeerHandle>,
    slave: Option<PeerHandle>,
    wait_pulse: Option<JoinHandle<()>>,
}

impl Inner {
    fn side(&mut self, role: Role) -> &mut Option<PeerHandle> {
        match role {
            Role::Master => &mut self.master,
            Role::Slave => &mut self.slave,
        }
    }

    fn peer_of(&self, role: Role) -> Option<&PeerHandle> {
        match role {
            Role::Master => self.slave.as_ref(),
            Role::Slave => self.master.as_ref(),
        }
    }

    fn cancel_wait_pulse(&mut self) {
        if let Some(pulse) = self.wait_pulse.take() {
            pulse.abort();
        }
    }
}

/// One paired (or pairing) master/slave connection.
pub struct Session {
    id: SessionId,
    token: ClaimToken,
    created_at: u64,
    control: Weak<Control>,
    wait_pulse_interval: Duration,
    inner: Mutex<Inner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a session in `WaitingForMaster`.
    ///
    /// Only [`Control`] calls this, after its directory claim was granted.
    /// `control` is weak so the registry and its sessions do not keep each
    /// other alive.
    pub(crate) fn new(
        id: SessionId,
        token: ClaimToken,
        control: Weak<Control>,
        wait_pulse_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            token,
            created_at: now_millis(),
            control,
            wait_pulse_interval,
            inner: Mutex::new(Inner {
                state: SessionState::WaitingForMaster,
                master: None,
                slave: None,
                wait_pulse: None,
            }),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn token(&self) -> &ClaimToken {
        &self.token
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn has_slave(&self) -> bool {
        self.lock().slave.is_some()
    }

    /// Read-only snapshot for the diagnostics endpoint.
    pub fn summary(&self) -> SessionSummary {
        let inner = self.lock();
        SessionSummary {
            id: self.id.to_string(),
            state: inner.state,
            has_master: inner.master.is_some(),
            has_slave: inner.slave.is_some(),
            create_time: self.created_at,
        }
    }

    // ── Attach ────────────────────────────────────────────────────────────────

    /// Attaches the master connection and starts the wait pulse.
    ///
    /// Valid only in `WaitingForMaster`.  On rejection the link is asked to
    /// close with the error text and nothing else changes.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidState`] when the session is past that state.
    pub fn attach_master(self: &Arc<Self>, link: Link) -> Result<(), SessionError> {
        let mut inner = self.lock();
        if inner.state != SessionState::WaitingForMaster {
            let err = SessionError::InvalidState {
                role: Role::Master,
                state: inner.state,
            };
            drop(inner);
            link.reject(&err.to_string());
            return Err(err);
        }

        let Link {
            outbound,
            events,
            terminate,
        } = link;
        let mut master = PeerHandle::new(outbound, terminate);
        master.set_pump(self.spawn_pump(Role::Master, events));
        inner.master = Some(master);
        inner.wait_pulse = Some(self.spawn_wait_pulse());
        inner.state = SessionState::WaitingForSlave;

        info!(session_id = %self.id, "master attached; waiting for slave");
        Ok(())
    }

    /// Attaches the slave connection and starts forwarding.
    ///
    /// Valid only in `WaitingForSlave` with no slave yet.  On success the wait
    /// pulse stops and both sides receive a `linked` notification before any
    /// relayed frame.
    ///
    /// # Errors
    ///
    /// [`SessionError::SlaveAlreadyAttached`] or
    /// [`SessionError::InvalidState`]; the existing attachments are untouched
    /// and the new link is asked to close.
    pub fn attach_slave(self: &Arc<Self>, link: Link) -> Result<(), SessionError> {
        let mut inner = self.lock();
        let rejection = if inner.slave.is_some() {
            Some(SessionError::SlaveAlreadyAttached)
        } else if inner.state != SessionState::WaitingForSlave {
            Some(SessionError::InvalidState {
                role: Role::Slave,
                state: inner.state,
            })
        } else {
            None
        };
        if let Some(err) = rejection {
            drop(inner);
            link.reject(&err.to_string());
            return Err(err);
        }

        let Link {
            outbound,
            events,
            terminate,
        } = link;
        let mut slave = PeerHandle::new(outbound, terminate);
        slave.set_pump(self.spawn_pump(Role::Slave, events));
        inner.cancel_wait_pulse();

        // A fresh slave queue is empty; a master with a full one is ended by
        // the first relayed frame.
        let linked = encode_control(&ControlMessage::Linked);
        if let Some(master) = &inner.master {
            let _ = master.send(linked.clone());
        }
        let _ = slave.send(linked);

        inner.slave = Some(slave);
        inner.state = SessionState::Forwarding;

        info!(session_id = %self.id, "slave attached; forwarding");
        Ok(())
    }

    // ── Events ────────────────────────────────────────────────────────────────

    /// Applies one event observed on the `role` connection.
    pub fn handle_event(self: &Arc<Self>, role: Role, event: LinkEvent) {
        match event {
            LinkEvent::Frame(frame) => self.relay(role, frame),
            LinkEvent::Error(err) => {
                warn!(session_id = %self.id, %role, "connection error: {err}");
                self.end_peer(role, REASON_REMOTE_ERROR);
            }
            LinkEvent::Reset => {
                warn!(session_id = %self.id, %role, "connection reset");
                self.end_peer(role, REASON_REMOTE_RESET);
            }
            LinkEvent::End { code, reason } => self.on_end(role, code, &reason),
        }
    }

    fn relay(&self, role: Role, frame: Frame) {
        let mut inner = self.lock();
        let Some(peer) = inner.peer_of(role) else {
            debug!(
                session_id = %self.id,
                %role,
                kind = frame.kind(),
                len = frame.len(),
                control = is_control_frame(&frame),
                "no peer attached; dropping frame"
            );
            return;
        };
        if peer.send(frame).is_ok() {
            return;
        }

        let slow = role.peer();
        warn!(session_id = %self.id, role = %slow, "outbound queue full; dropping connection");
        if let Some(peer) = inner.side(slow).take() {
            peer.terminate();
        }
        drop(inner);
        self.on_end(slow, None, REASON_PEER_TOO_SLOW);
    }

    fn end_peer(&self, role: Role, reason: &str) {
        let inner = self.lock();
        if let Some(peer) = inner.peer_of(role) {
            peer.end(reason);
        }
    }

    fn on_end(&self, role: Role, code: Option<u16>, reason: &str) {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return;
        }
        info!(session_id = %self.id, %role, ?code, reason, "connection ended");

        // The pump that delivered this event is already finishing; just forget
        // the handle.
        inner.side(role).take();
        inner.cancel_wait_pulse();

        let peer_remains = match inner.peer_of(role) {
            Some(peer) => {
                peer.end(reason);
                true
            }
            None => false,
        };

        if peer_remains {
            inner.state = SessionState::Closing;
        } else {
            drop(inner);
            self.abandon();
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    /// Tears the session down: stops the wait pulse, terminates both
    /// connections, and asks [`Control`] to deregister and release the claim.
    ///
    /// Idempotent and legal from every state.
    pub fn abandon(&self) {
        let (master, slave, pulse) = {
            let mut inner = self.lock();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = SessionState::Destroyed;
            (
                inner.master.take(),
                inner.slave.take(),
                inner.wait_pulse.take(),
            )
        };

        if let Some(pulse) = pulse {
            pulse.abort();
        }
        for peer in [master, slave].into_iter().flatten() {
            peer.terminate();
        }

        info!(session_id = %self.id, "session destroyed");
        if let Some(control) = self.control.upgrade() {
            control.destroy_session(&self.id, &self.token);
        }
    }

    // ── Background tasks ──────────────────────────────────────────────────────

    fn spawn_pump(
        self: &Arc<Self>,
        role: Role,
        mut events: UnboundedReceiver<LinkEvent>,
    ) -> AbortHandle {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let last = matches!(event, LinkEvent::End { .. });
                session.handle_event(role, event);
                if last {
                    return;
                }
            }
            // The transport went away without reporting an end.
            session.handle_event(role, LinkEvent::Reset);
            session.handle_event(
                role,
                LinkEvent::End {
                    code: None,
                    reason: String::new(),
                },
            );
        })
        .abort_handle()
    }

    fn spawn_wait_pulse(self: &Arc<Self>) -> JoinHandle<()> {
        let session = Arc::downgrade(self);
        let period = self.wait_pulse_interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(session) = session.upgrade() else {
                    return;
                };
                if !session.pulse_master() {
                    return;
                }
            }
        })
    }

    /// Sends one `wait` to the master.  Returns `false` once pulsing should stop.
    fn pulse_master(&self) -> bool {
        let inner = self.lock();
        match (&inner.state, &inner.master) {
            (SessionState::WaitingForSlave, Some(master)) if inner.slave.is_none() => {
                // A master that is not reading already has pulses queued.
                let _ = master.send(encode_control(&ControlMessage::Wait));
                true
            }
            _ => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
