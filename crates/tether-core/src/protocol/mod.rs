//! Protocol module containing frame types and the control-message codec.

pub mod codec;
pub mod messages;

pub use codec::{decode_control, encode_control, is_control_frame, ControlCodecError};
pub use messages::*;
