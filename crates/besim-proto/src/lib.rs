// besim-proto: BeSMART thermostat wire protocol.
//
// Pure codec crate: no sockets, no clocks.  The device speaks a framed
// binary protocol over UDP; every datagram is an outer Frame (magic, length,
// sequence, CRC-16/XMODEM, magic) whose payload is a Wrapper (message type,
// flag bits, biased inner length) around a message body.  Body layouts live
// in `msg` together with the registry of known message types.

use thiserror::Error;

pub mod frame;
pub mod msg;
pub mod wrapper;

pub use frame::{DOWNLINK_SEQ, Frame, MAGIC_FOOTER, MAGIC_HEADER, crc16_xmodem};
pub use msg::{
    Decoded, MAX_CSEQ, Msg, MsgType, OpenTherm, RequestHead, RoomSlot, StatusBody, UNUSED_CSEQ,
    decode_uplink, set_payload_width,
};
pub use wrapper::Wrapper;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

/// Decode errors for frames and message bodies.
///
/// Both kinds are drop-and-log events for the receive path: a failed decode
/// must never mutate state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtoError {
    #[error("malformed frame: {reason}")]
    MalformedFrame { reason: String },
    #[error("malformed message: {reason}")]
    MalformedMessage { reason: String },
}

impl ProtoError {
    pub(crate) fn frame(reason: impl Into<String>) -> Self {
        ProtoError::MalformedFrame {
            reason: reason.into(),
        }
    }

    pub(crate) fn message(reason: impl Into<String>) -> Self {
        ProtoError::MalformedMessage {
            reason: reason.into(),
        }
    }
}
