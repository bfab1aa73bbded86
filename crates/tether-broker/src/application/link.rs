//! Transport-agnostic connection links.
//!
//! The session state machine never touches a socket.  Each attached
//! connection is represented by a [`Link`]: a channel of [`LinkEvent`]s coming
//! *from* the connection, a channel of [`Outbound`] commands going *to* it,
//! and a terminate flag.  The other end, [`LinkRemote`], is driven by a
//! transport adapter (see `infrastructure::ws_link`) or directly by a test.
//!
//! ```text
//!   WebSocket ──▶ adapter ──LinkEvent──▶ Session
//!   WebSocket ◀── adapter ◀──Outbound─── Session
//!   WebSocket  ✕  adapter ◀─terminate─── Session
//! ```
//!
//! The outbound queue holds at most [`OUTBOUND_CAPACITY`] commands.  A send
//! never waits: when the queue is full the frame is refused and the caller
//! decides what to do with a connection that cannot keep up.  Terminate is
//! out of band so it still reaches an adapter whose queue is full or whose
//! socket write is stalled.  Inbound events are drained by a pump that never
//! waits, so that queue stays short without a bound.

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;

use tether_core::Frame;

/// Commands that may sit in one connection's outbound queue.
pub const OUTBOUND_CAPACITY: usize = 128;

/// Something that happened on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A text or binary data frame arrived.
    Frame(Frame),
    /// A transport error was observed.  An `End` follows.
    Error(String),
    /// The connection dropped without a closing handshake.  An `End` follows.
    Reset,
    /// The connection finished.  Always the last event on a link.
    End {
        /// WebSocket close code, when the peer sent one.
        code: Option<u16>,
        /// Human-readable close reason (possibly empty).
        reason: String,
    },
}

/// A command for the transport adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Write the frame verbatim.
    Frame(Frame),
    /// Close gracefully with the given reason.
    End(String),
}

/// The connection's outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("outbound queue is full")]
pub struct QueueFull;

/// The session-facing half of a connection.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::Sender<Outbound>,
    pub events: mpsc::UnboundedReceiver<LinkEvent>,
    pub terminate: watch::Sender<bool>,
}

/// The transport-facing half of a connection.
#[derive(Debug)]
pub struct LinkRemote {
    pub outbound: mpsc::Receiver<Outbound>,
    pub events: mpsc::UnboundedSender<LinkEvent>,
    pub terminate: watch::Receiver<bool>,
}

/// Creates a connected [`Link`] / [`LinkRemote`] pair.
pub fn link() -> (Link, LinkRemote) {
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (terminate_tx, terminate_rx) = watch::channel(false);
    (
        Link {
            outbound: outbound_tx,
            events: events_rx,
            terminate: terminate_tx,
        },
        LinkRemote {
            outbound: outbound_rx,
            events: events_tx,
            terminate: terminate_rx,
        },
    )
}

impl Link {
    /// Asks the connection to close with `reason`, then drops the link.
    ///
    /// Used when a connection is refused after its upgrade already happened.
    pub fn reject(self, reason: &str) {
        let _ = self.outbound.try_send(Outbound::End(reason.to_string()));
    }
}

impl LinkRemote {
    /// Whether the session has asked for this connection to be dropped.
    pub fn is_terminated(&self) -> bool {
        *self.terminate.borrow()
    }

    /// Resolves once the session asks for this connection to be dropped.
    pub async fn terminated(&mut self) {
        wait_for_terminate(&mut self.terminate).await;
    }
}

/// Resolves once `flag` is raised.
///
/// Never resolves if the session lets go of the link without raising it.
pub async fn wait_for_terminate(flag: &mut watch::Receiver<bool>) {
    if flag.wait_for(|dropped| *dropped).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// A session's handle on one attached connection.
///
/// Holds the outbound sender, the terminate flag, and the abort handle of
/// the task pumping that connection's events into the session, so the
/// session can both talk to the connection and stop listening to it.
#[derive(Debug)]
pub struct PeerHandle {
    outbound: mpsc::Sender<Outbound>,
    terminate: watch::Sender<bool>,
    pump: Option<AbortHandle>,
}

impl PeerHandle {
    pub fn new(outbound: mpsc::Sender<Outbound>, terminate: watch::Sender<bool>) -> Self {
        Self {
            outbound,
            terminate,
            pump: None,
        }
    }

    pub(crate) fn set_pump(&mut self, pump: AbortHandle) {
        self.pump = Some(pump);
    }

    /// Queues a frame without waiting.
    ///
    /// A frame for a connection that is already gone is dropped silently.
    ///
    /// # Errors
    ///
    /// [`QueueFull`] when the connection has [`OUTBOUND_CAPACITY`] commands
    /// it has not written yet.
    pub fn send(&self, frame: Frame) -> Result<(), QueueFull> {
        match self.outbound.try_send(Outbound::Frame(frame)) {
            Err(mpsc::error::TrySendError::Full(_)) => Err(QueueFull),
            _ => Ok(()),
        }
    }

    /// Asks the connection to close gracefully.
    ///
    /// A connection too far behind to accept the close is dropped instead.
    pub fn end(&self, reason: &str) {
        if let Err(mpsc::error::TrySendError::Full(_)) =
            self.outbound.try_send(Outbound::End(reason.to_string()))
        {
            self.terminate.send_replace(true);
        }
    }

    /// Stops delivering this connection's events and drops it immediately.
    pub fn terminate(self) {
        if let Some(pump) = &self.pump {
            pump.abort();
        }
        self.terminate.send_replace(true);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn peer_for(link: Link) -> PeerHandle {
        PeerHandle::new(link.outbound, link.terminate)
    }

    #[test]
    fn test_peer_handle_send_reaches_remote() {
        // Arrange
        let (link, mut remote) = link();
        let peer = peer_for(link);

        // Act
        peer.send(Frame::Binary(vec![1, 2, 3])).unwrap();

        // Assert
        assert_eq!(
            remote.outbound.try_recv().unwrap(),
            Outbound::Frame(Frame::Binary(vec![1, 2, 3]))
        );
    }

    #[test]
    fn test_peer_handle_send_after_remote_gone_is_silent() {
        let (link, remote) = link();
        drop(remote);
        let peer = peer_for(link);
        assert_eq!(peer.send(Frame::Text("lost".to_string())), Ok(()));
        peer.end("bye");
    }

    #[test]
    fn test_send_to_full_queue_is_refused_without_growing_it() {
        // Arrange: a remote that never reads
        let (link, mut remote) = link();
        let peer = peer_for(link);
        for i in 0..OUTBOUND_CAPACITY {
            peer.send(Frame::Binary(vec![i as u8])).unwrap();
        }

        // Act
        let result = peer.send(Frame::Binary(vec![0xFF; 1024]));

        // Assert
        assert_eq!(result, Err(QueueFull));
        let mut queued = 0;
        while remote.outbound.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, OUTBOUND_CAPACITY);
    }

    #[test]
    fn test_end_on_full_queue_terminates_instead() {
        let (link, remote) = link();
        let peer = peer_for(link);
        for _ in 0..OUTBOUND_CAPACITY {
            peer.send(Frame::Text("x".into())).unwrap();
        }

        peer.end("bye");

        assert!(remote.is_terminated());
    }

    #[test]
    fn test_end_with_room_does_not_terminate() {
        let (link, mut remote) = link();
        let peer = peer_for(link);
        peer.end("bye");
        assert_eq!(remote.outbound.try_recv().unwrap(), Outbound::End("bye".into()));
        assert!(!remote.is_terminated());
    }

    #[test]
    fn test_terminate_raises_flag() {
        let (link, remote) = link();
        let peer = peer_for(link);
        peer.terminate();
        assert!(remote.is_terminated());
    }

    #[tokio::test]
    async fn test_terminated_resolves_after_terminate() {
        let (link, mut remote) = link();
        peer_for(link).terminate();
        tokio::time::timeout(std::time::Duration::from_secs(1), remote.terminated())
            .await
            .expect("terminate should be observed");
    }

    #[tokio::test]
    async fn test_dropping_the_link_is_not_a_terminate() {
        let (link, mut remote) = link();
        drop(link);
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(50), remote.terminated()).await;
        assert!(waited.is_err());
    }

    #[test]
    fn test_reject_asks_remote_to_end() {
        let (link, mut remote) = link();
        link.reject("session already has a slave");
        assert_eq!(
            remote.outbound.try_recv().unwrap(),
            Outbound::End("session already has a slave".to_string())
        );
        assert!(!remote.is_terminated());
    }

    #[tokio::test]
    async fn test_terminate_aborts_event_pump() {
        // Arrange: a pump task that would run forever
        let (link, _remote) = link();
        let pump = tokio::spawn(async {
            std::future::pending::<()>().await;
        });
        let mut peer = peer_for(link);
        peer.set_pump(pump.abort_handle());

        // Act
        peer.terminate();

        // Assert
        let result = pump.await;
        assert!(result.unwrap_err().is_cancelled());
    }
}
