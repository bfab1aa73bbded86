//! Frame and control-message types.
//!
//! A paired connection carries two kinds of WebSocket data frame, modelled as
//! the [`Frame`] union.  The broker never looks inside a frame while
//! forwarding; it only *originates* a handful of text frames of its own, the
//! [`ControlMessage`]s, which are JSON objects behind [`CONTROL_PREFIX`].
//!
//! # JSON discriminant
//!
//! Every control message is a JSON object with a `"type"` field that
//! identifies the variant:
//!
//! ```json
//! {"type":"wait"}
//! {"type":"linked"}
//! {"type":"resize","columns":80,"lines":24}
//! ```
//!
//! Serde's `#[serde(tag = "type")]` attribute handles this automatically.

use serde::{Deserialize, Serialize};

/// Text marker placed in front of every broker-originated control message.
///
/// Application payload on the same text channel never starts with this
/// marker, which lets either endpoint tell a notification from opaque data.
pub const CONTROL_PREFIX: &str = "tether:";

// ── Frames ────────────────────────────────────────────────────────────────────

/// A single WebSocket data frame as seen by the forwarding engine.
///
/// Protocol frames (ping, pong, close) are handled by the transport and never
/// appear here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A UTF-8 text frame.  Control notifications travel as text frames.
    Text(String),
    /// An opaque binary frame (terminal output, keystrokes, ...).
    Binary(Vec<u8>),
}

impl Frame {
    /// Returns the payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
        }
    }

    /// Returns `true` if the frame carries no payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short name of the frame kind, for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Text(_) => "text",
            Frame::Binary(_) => "binary",
        }
    }
}

// ── Control messages ──────────────────────────────────────────────────────────

/// Control notifications exchanged over the text channel.
///
/// Only [`ControlMessage::Wait`] and [`ControlMessage::Linked`] are produced by
/// the broker.  The remaining variants belong to the agent/client protocol;
/// they are listed so that both sides share one vocabulary, but the broker
/// forwards them untouched like any other frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Periodic keepalive sent to the master while no slave is attached.
    Wait,

    /// Sent once to each side as soon as the two connections are paired.
    Linked,

    /// The agent has spawned its interactive shell.
    Started,

    /// The agent hit an error and is about to exit.
    Error {
        /// Human-readable description.
        #[serde(default)]
        error: String,
    },

    /// The agent's shell exited.
    Exit {
        /// Process exit status, if one was reported.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
    },

    /// The client's terminal changed size.
    Resize {
        /// Terminal width in character cells.
        columns: u16,
        /// Terminal height in character cells.
        lines: u16,
    },
}

impl ControlMessage {
    /// Returns `true` for the notifications the broker itself originates.
    ///
    /// A client can use this to tell broker status apart from messages the
    /// agent on the far side sent.
    pub fn is_broker_originated(&self) -> bool {
        matches!(self, ControlMessage::Wait | ControlMessage::Linked)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
