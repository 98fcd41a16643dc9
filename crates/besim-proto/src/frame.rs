//! Outer UDP framing.
//!
//! Every datagram, uplink or downlink, is wrapped in the same frame:
//!
//! ```text
//!  off  size  field
//!    0     2  MAGIC_HEADER (0xD4FA)
//!    2     2  payload length, excludes framing
//!    4     4  sequence number (downlink always 0xFFFFFFFF)
//!    8     N  payload
//!  8+N     2  CRC-16/XMODEM over the payload
//! 10+N     2  MAGIC_FOOTER (0xDF2D)
//! ```
//!
//! All integers little-endian.  Decode rejects the datagram on any header,
//! length, CRC, or footer mismatch; the caller logs and drops it.

use bytes::{Buf, BufMut};

use crate::ProtoError;

pub const MAGIC_HEADER: u16 = 0xD4FA;
pub const MAGIC_FOOTER: u16 = 0xDF2D;

/// Sequence number carried on every server-to-device frame.
pub const DOWNLINK_SEQ: u32 = 0xFFFF_FFFF;

/// Bytes of framing around the payload: 8 before it, 4 after.
pub const FRAME_OVERHEAD: usize = 12;

/// CRC-16/XMODEM (poly 0x1021, init 0) as used by the device firmware.
pub fn crc16_xmodem(payload: &[u8]) -> u16 {
    crc16::State::<crc16::XMODEM>::calculate(payload)
}

/// A decoded (or to-be-encoded) frame: sequence number plus raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub seq: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Frame a downlink payload with the fixed downlink sequence number.
    pub fn downlink(payload: Vec<u8>) -> Self {
        Frame {
            seq: DOWNLINK_SEQ,
            payload,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.payload.len() + FRAME_OVERHEAD);
        buf.put_u16_le(MAGIC_HEADER);
        buf.put_u16_le(self.payload.len() as u16);
        buf.put_u32_le(self.seq);
        buf.extend_from_slice(&self.payload);
        buf.put_u16_le(crc16_xmodem(&self.payload));
        buf.put_u16_le(MAGIC_FOOTER);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Frame, ProtoError> {
        if data.len() < FRAME_OVERHEAD {
            return Err(ProtoError::frame(format!(
                "short datagram: {} bytes",
                data.len()
            )));
        }

        let mut cur = data;
        let hdr = cur.get_u16_le();
        let length = cur.get_u16_le() as usize;
        let seq = cur.get_u32_le();

        if hdr != MAGIC_HEADER {
            return Err(ProtoError::frame(format!("invalid header {hdr:#06x}")));
        }
        if data.len() != length + FRAME_OVERHEAD {
            return Err(ProtoError::frame(format!(
                "invalid length: declared {length}, datagram {}",
                data.len()
            )));
        }

        let payload = cur[..length].to_vec();
        cur.advance(length);
        let crc = cur.get_u16_le();
        let ftr = cur.get_u16_le();

        let expected = crc16_xmodem(&payload);
        if crc != expected {
            return Err(ProtoError::frame(format!(
                "invalid CRC: got {crc:#06x}, computed {expected:#06x}"
            )));
        }
        if ftr != MAGIC_FOOTER {
            return Err(ProtoError::frame(format!("invalid footer {ftr:#06x}")));
        }

        Ok(Frame { seq, payload })
    }
}
