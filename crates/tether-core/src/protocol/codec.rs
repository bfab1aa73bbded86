//! Codec for broker control messages.
//!
//! Wire format of a control message (always a WebSocket *text* frame):
//! ```text
//! tether:{"type":"<kind>", ...fields}
//! ```
//! Anything that does not start with [`CONTROL_PREFIX`] is application data and
//! is none of the codec's business.

use thiserror::Error;

use crate::protocol::messages::{ControlMessage, Frame, CONTROL_PREFIX};

/// Errors that can occur while decoding a control frame.
#[derive(Debug, Error)]
pub enum ControlCodecError {
    /// The frame is binary, or a text frame without the control prefix.
    #[error("frame is not a control message")]
    NotControl,

    /// The prefix was present but the JSON body could not be parsed.
    #[error("malformed control message: {0}")]
    MalformedJson(#[from] serde_json::Error),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`ControlMessage`] into a ready-to-send text [`Frame`].
///
/// # Examples
///
/// ```rust
/// use tether_core::{encode_control, ControlMessage, Frame};
///
/// let frame = encode_control(&ControlMessage::Wait);
/// assert_eq!(frame, Frame::Text(r#"tether:{"type":"wait"}"#.to_string()));
/// ```
pub fn encode_control(msg: &ControlMessage) -> Frame {
    // Serializing a tagged enum with plain fields into a String cannot fail;
    // fall back to a bare tag rather than panicking if it somehow did.
    let body = serde_json::to_string(msg).unwrap_or_else(|_| r#"{"type":"error"}"#.to_string());
    let mut text = String::with_capacity(CONTROL_PREFIX.len() + body.len());
    text.push_str(CONTROL_PREFIX);
    text.push_str(&body);
    Frame::Text(text)
}

/// Decodes a control message from a frame.
///
/// # Errors
///
/// - [`ControlCodecError::NotControl`] for binary frames and unprefixed text.
/// - [`ControlCodecError::MalformedJson`] when the body after the prefix is
///   not a recognised control message.
pub fn decode_control(frame: &Frame) -> Result<ControlMessage, ControlCodecError> {
    let Frame::Text(text) = frame else {
        return Err(ControlCodecError::NotControl);
    };
    let body = text
        .strip_prefix(CONTROL_PREFIX)
        .ok_or(ControlCodecError::NotControl)?;
    Ok(serde_json::from_str(body)?)
}

/// Returns `true` if `frame` is a text frame carrying the control prefix.
///
/// The broker relays control frames like any other; clients and agents use
/// this to split them from terminal data.
pub fn is_control_frame(frame: &Frame) -> bool {
    matches!(frame, Frame::Text(text) if text.starts_with(CONTROL_PREFIX))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
