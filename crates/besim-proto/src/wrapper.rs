//! Per-message wrapper inside the frame payload.
//!
//! ```text
//!  off  size  field
//!    0     1  message type
//!    1     1  flags
//!    2     2  inner length, biased: wire value = body length - 8
//!    4     L  body
//! ```
//!
//! Flag bits:
//!
//! | bit | meaning                                   |
//! |-----|-------------------------------------------|
//! |  0  | response (1 = reply)                      |
//! |  1  | write (1 = write, 0 = read)               |
//! |  2  | valid (0 = device rejected the msg type)  |
//! |  3  | downlink (1 = server to device)           |
//! |  4  | reserved, 0                               |
//! |  5  | cloud-sync-lost (uplink only)             |
//! |  6  | reserved, observed 1 on uplinks           |
//! |  7  | reserved, 0                               |

use bytes::BufMut;

use crate::ProtoError;
use crate::msg::MsgType;

pub const FLAG_RESPONSE: u8 = 1 << 0;
pub const FLAG_WRITE: u8 = 1 << 1;
pub const FLAG_VALID: u8 = 1 << 2;
pub const FLAG_DOWNLINK: u8 = 1 << 3;
pub const FLAG_SYNC_LOST: u8 = 1 << 5;

/// Bits 4 and 7 must be clear on the wire; a set bit is reported by the
/// dispatcher as a soft warning, not a decode failure.
pub const FLAGS_RESERVED_ZERO: u8 = (1 << 4) | (1 << 7);

pub const WRAPPER_LEN: usize = 4;

/// The wire length field under-reports the body by this many bytes.
pub const LENGTH_BIAS: usize = 8;

/// Decoded wrapper header.  `flags` keeps the raw byte so reserved-bit
/// anomalies stay observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wrapper {
    pub msg_type: MsgType,
    pub response: bool,
    pub write: bool,
    pub valid: bool,
    pub downlink: bool,
    pub cloud_sync_lost: bool,
    pub flags: u8,
}

impl Wrapper {
    /// Decode the wrapper at the start of a frame payload, returning the
    /// header and the message body it frames.
    pub fn decode(payload: &[u8]) -> Result<(Wrapper, &[u8]), ProtoError> {
        if payload.len() < WRAPPER_LEN {
            return Err(ProtoError::message(format!(
                "short wrapper: {} bytes",
                payload.len()
            )));
        }
        let msg_type = MsgType::from_u8(payload[0]);
        let flags = payload[1];
        let body_len = u16::from_le_bytes([payload[2], payload[3]]) as usize + LENGTH_BIAS;

        let body = payload
            .get(WRAPPER_LEN..WRAPPER_LEN + body_len)
            .ok_or_else(|| {
                ProtoError::message(format!(
                    "truncated body: declared {body_len} bytes, have {}",
                    payload.len() - WRAPPER_LEN
                ))
            })?;

        Ok((
            Wrapper {
                msg_type,
                response: flags & FLAG_RESPONSE != 0,
                write: flags & FLAG_WRITE != 0,
                valid: flags & FLAG_VALID != 0,
                downlink: flags & FLAG_DOWNLINK != 0,
                cloud_sync_lost: flags & FLAG_SYNC_LOST != 0,
                flags,
            },
            body,
        ))
    }

    /// Encode a downlink message: wrapper header followed by `body`.
    ///
    /// Downlink always sets `downlink` and `valid` and clears sync-lost;
    /// response/write come from the caller.  `body` must include the 8-byte
    /// sequenced head, so it is never shorter than the length bias.
    pub fn encode_downlink(msg_type: MsgType, response: bool, write: bool, body: &[u8]) -> Vec<u8> {
        debug_assert!(body.len() >= LENGTH_BIAS);
        let mut flags = FLAG_VALID | FLAG_DOWNLINK;
        if response {
            flags |= FLAG_RESPONSE;
        }
        if write {
            flags |= FLAG_WRITE;
        }

        let mut buf = Vec::with_capacity(WRAPPER_LEN + body.len());
        buf.put_u8(msg_type.as_u8());
        buf.put_u8(flags);
        buf.put_u16_le((body.len() - LENGTH_BIAS) as u16);
        buf.extend_from_slice(body);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downlink_roundtrip() {
        let body = [0u8; 12];
        let payload = Wrapper::encode_downlink(MsgType::Ping, true, true, &body);
        let (wrapper, decoded_body) = Wrapper::decode(&payload).unwrap();
        assert_eq!(wrapper.msg_type, MsgType::Ping);
        assert!(wrapper.response);
        assert!(wrapper.write);
        assert!(wrapper.valid);
        assert!(wrapper.downlink);
        assert!(!wrapper.cloud_sync_lost);
        assert_eq!(decoded_body, &body);
    }

    #[test]
    fn inner_length_is_biased() {
        let body = [0u8; 20];
        let payload = Wrapper::encode_downlink(MsgType::Status, false, true, &body);
        assert_eq!(u16::from_le_bytes([payload[2], payload[3]]), 12);
    }

    #[test]
    fn read_request_clears_write_bit() {
        let body = [0u8; 8];
        let payload = Wrapper::encode_downlink(MsgType::SwVersion, false, false, &body);
        let (wrapper, _) = Wrapper::decode(&payload).unwrap();
        assert!(!wrapper.write);
        assert!(!wrapper.response);
    }

    #[test]
    fn sync_lost_flag_is_surfaced() {
        let mut payload = Wrapper::encode_downlink(MsgType::Status, false, false, &[0u8; 8]);
        payload[1] |= FLAG_SYNC_LOST;
        let (wrapper, _) = Wrapper::decode(&payload).unwrap();
        assert!(wrapper.cloud_sync_lost);
    }

    #[test]
    fn short_wrapper_is_rejected() {
        assert!(Wrapper::decode(&[0x24, 0x0C]).is_err());
    }

    #[test]
    fn truncated_body_is_rejected() {
        let mut payload = Wrapper::encode_downlink(MsgType::Ping, false, true, &[0u8; 10]);
        payload.truncate(payload.len() - 1);
        let err = Wrapper::decode(&payload).unwrap_err();
        assert!(err.to_string().contains("truncated body"));
    }

    #[test]
    fn unknown_type_is_preserved() {
        let payload = Wrapper::encode_downlink(MsgType::Unknown(0x42), false, false, &[0u8; 8]);
        let (wrapper, _) = Wrapper::decode(&payload).unwrap();
        assert_eq!(wrapper.msg_type, MsgType::Unknown(0x42));
    }
}
