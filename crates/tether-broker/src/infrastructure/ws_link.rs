//! Adapts an upgraded WebSocket to a session [`Link`].
//!
//! One task per socket drives both directions with `tokio::select!`:
//!
//! ```text
//!   socket.next() ──▶ LinkEvent::{Frame, Error, Reset, End} ──▶ session
//!   socket.send() ◀── Outbound::{Frame, End}                ◀── session
//! ```
//!
//! Ping/pong and the close-frame echo are answered by the WebSocket library.
//! Once the adapter has asked the peer to close, it keeps reading until the
//! peer's own close frame arrives, so the session still sees a proper `End`.
//! A peer that has not answered within the close timeout is reported as a
//! reset.  A terminate request drops the socket at once, even mid-write.

use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use tether_core::{Frame, SessionId};

use crate::application::link::{
    link, wait_for_terminate, Link, LinkEvent, LinkRemote, Outbound,
};
use crate::application::session::Role;

/// Longest close reason a WebSocket close frame can carry, in bytes.
pub const MAX_CLOSE_REASON: usize = 123;

/// Spawns the adapter task for `socket` and returns the session-facing link.
///
/// `close_timeout` bounds how long the adapter waits for the peer's close
/// frame after sending its own.
pub fn spawn(
    socket: WebSocket,
    session_id: SessionId,
    role: Role,
    close_timeout: Duration,
) -> Link {
    let (link, remote) = link();
    tokio::spawn(drive(socket, remote, session_id, role, close_timeout));
    link
}

async fn drive(
    socket: WebSocket,
    remote: LinkRemote,
    session_id: SessionId,
    role: Role,
    close_timeout: Duration,
) {
    let LinkRemote {
        outbound,
        events,
        mut terminate,
    } = remote;

    tokio::select! {
        biased;
        () = wait_for_terminate(&mut terminate) => {
            debug!(session_id = %session_id, %role, "terminated");
        }
        () = relay(socket, outbound, events, &session_id, role, close_timeout) => {}
    }
}

async fn relay(
    socket: WebSocket,
    mut outbound: mpsc::Receiver<Outbound>,
    events: mpsc::UnboundedSender<LinkEvent>,
    session_id: &SessionId,
    role: Role,
    close_timeout: Duration,
) {
    let (mut sink, mut stream) = socket.split();
    let mut closing = false;
    let mut commands_open = true;
    let close_deadline = tokio::time::sleep(close_timeout);
    tokio::pin!(close_deadline);

    loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(LinkEvent::Frame(Frame::Text(text.as_str().to_owned())));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let _ = events.send(LinkEvent::Frame(Frame::Binary(bytes.to_vec())));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(f) => (Some(f.code), f.reason.as_str().to_owned()),
                        None => (None, String::new()),
                    };
                    debug!(session_id = %session_id, %role, ?code, "close frame received");
                    let _ = events.send(LinkEvent::End { code, reason });
                    // Flushes the library's close reply.
                    let _ = sink.close().await;
                    return;
                }
                Some(Err(e)) => {
                    warn!(session_id = %session_id, %role, "websocket error: {e}");
                    let _ = events.send(LinkEvent::Error(e.to_string()));
                    let _ = events.send(LinkEvent::End { code: None, reason: String::new() });
                    return;
                }
                None => {
                    let _ = events.send(LinkEvent::Reset);
                    let _ = events.send(LinkEvent::End { code: None, reason: String::new() });
                    return;
                }
            },
            command = outbound.recv(), if commands_open => match command {
                Some(Outbound::Frame(frame)) => {
                    if let Err(e) = sink.send(to_message(frame)).await {
                        debug!(session_id = %session_id, %role, "send failed: {e}");
                    }
                }
                Some(Outbound::End(reason)) => {
                    if closing {
                        continue;
                    }
                    closing = true;
                    let deadline = Instant::now() + close_timeout;
                    close_deadline.as_mut().reset(deadline);
                    let close = CloseFrame {
                        code: close_code::NORMAL,
                        reason: truncate_reason(&reason).to_owned().into(),
                    };
                    // A stalled write runs into the same deadline as the reply.
                    let sent = sink.send(Message::Close(Some(close)));
                    if let Ok(Err(e)) = tokio::time::timeout_at(deadline, sent).await {
                        debug!(session_id = %session_id, %role, "close failed: {e}");
                    }
                }
                None => {
                    // The session let go of this connection.
                    if !closing {
                        return;
                    }
                    commands_open = false;
                }
            },
            () = &mut close_deadline, if closing => {
                warn!(
                    session_id = %session_id,
                    %role,
                    timeout_ms = close_timeout.as_millis() as u64,
                    "peer did not answer close; dropping connection"
                );
                let _ = events.send(LinkEvent::Reset);
                let _ = events.send(LinkEvent::End { code: None, reason: String::new() });
                return;
            }
        }
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes.into()),
    }
}

/// Cuts `reason` to [`MAX_CLOSE_REASON`] bytes on a character boundary.
pub fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

// ── Tests ─────────────────────────────────────────────────────────────────────
