//! Message registry: known message types, body layouts, and builders.
//!
//! Every sequenced body starts with the same head:
//!
//! ```text
//! cseq (u8), unk1 (u8), unk2 (u16), deviceid (u32)
//! ```
//!
//! `unk1`/`unk2` vary between firmware revisions and are kept opaque; the
//! dispatcher warns when they deviate from the commonly observed values.
//! Downlink bodies always zero them.

use bytes::{Buf, BufMut};

use crate::ProtoError;

/// Control-plane sequence numbers stay below this bound.
pub const MAX_CSEQ: u8 = 0xFD;

/// Placed on the wire for messages that expect no correlated reply.
pub const UNUSED_CSEQ: u8 = 0xFF;

/// Fixed trailing value of the downlink PING ack.
pub const PING_MARKER: u16 = 0xF43C;

/// Fixed trailing value of the GET_PROG request.
pub const GET_PROG_MARKER: u32 = 0x0080_0FE0;

/// Fixed trailing value of PROG_END.
pub const PROG_END_MARKER: u16 = 0x0A14;

/// Room slots carried in every STATUS uplink.
pub const STATUS_SLOTS: usize = 8;

/// One schedule byte per hour of the day.
pub const PROGRAM_HOURS: usize = 24;

/// Width of the software version field on the wire.
pub const SWVERSION_LEN: usize = 13;

const HEAD_LEN: usize = 8;

// ---------------------------------------------------------------------------
// MsgType
// ---------------------------------------------------------------------------

/// The message-type byte of the wrapper.  Unknown ids are preserved rather
/// than rejected: the dispatcher logs them and sends no reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    /// Thermostat mode: auto/holiday/party/off.
    SetMode,
    /// One day of the weekly program, uplink or downlink.
    Program,
    SetT3,
    SetT2,
    SetT1,
    SetAdvance,
    /// Device software version, uplink or downlink.
    SwVersion,
    /// Temperature curve index (OpenTherm only).
    SetCurve,
    SetMinHeatSetp,
    SetMaxHeatSetp,
    /// 0 = degC, 1 = degF.
    SetUnits,
    /// 1 = winter (heating), 0 = summer.
    SetSeason,
    SetSensorInfluence,
    Refresh,
    /// Outside-temperature source: 0 off, 1 boiler, 2 web.
    OutsideTemp,
    Ping,
    /// Periodic full status from the device, roughly every 40 s.
    Status,
    /// Daylight-saving flag push.
    DeviceTime,
    /// Sent by the device after the last PROGRAM of a room.
    ProgEnd,
    /// Triggers the device to send all daily programs for one room.
    GetProg,
    Unknown(u8),
}

impl MsgType {
    pub fn from_u8(id: u8) -> MsgType {
        match id {
            0x02 => MsgType::SetMode,
            0x0A => MsgType::Program,
            0x0B => MsgType::SetT3,
            0x0C => MsgType::SetT2,
            0x0D => MsgType::SetT1,
            0x12 => MsgType::SetAdvance,
            0x15 => MsgType::SwVersion,
            0x16 => MsgType::SetCurve,
            0x17 => MsgType::SetMinHeatSetp,
            0x18 => MsgType::SetMaxHeatSetp,
            0x19 => MsgType::SetUnits,
            0x1A => MsgType::SetSeason,
            0x1B => MsgType::SetSensorInfluence,
            0x1D => MsgType::Refresh,
            0x20 => MsgType::OutsideTemp,
            0x22 => MsgType::Ping,
            0x24 => MsgType::Status,
            0x29 => MsgType::DeviceTime,
            0x2A => MsgType::ProgEnd,
            0x2B => MsgType::GetProg,
            other => MsgType::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            MsgType::SetMode => 0x02,
            MsgType::Program => 0x0A,
            MsgType::SetT3 => 0x0B,
            MsgType::SetT2 => 0x0C,
            MsgType::SetT1 => 0x0D,
            MsgType::SetAdvance => 0x12,
            MsgType::SwVersion => 0x15,
            MsgType::SetCurve => 0x16,
            MsgType::SetMinHeatSetp => 0x17,
            MsgType::SetMaxHeatSetp => 0x18,
            MsgType::SetUnits => 0x19,
            MsgType::SetSeason => 0x1A,
            MsgType::SetSensorInfluence => 0x1B,
            MsgType::Refresh => 0x1D,
            MsgType::OutsideTemp => 0x20,
            MsgType::Ping => 0x22,
            MsgType::Status => 0x24,
            MsgType::DeviceTime => 0x29,
            MsgType::ProgEnd => 0x2A,
            MsgType::GetProg => 0x2B,
            MsgType::Unknown(other) => other,
        }
    }

    /// True for the SET family handled generically by dispatcher and sender.
    pub fn is_set(self) -> bool {
        set_payload_width(self).is_some()
    }
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MsgType::Unknown(id) => write!(f, "UNKNOWN({id:#04x})"),
            other => write!(f, "{other:?}({:#04x})", other.as_u8()),
        }
    }
}

/// Value width in bytes for SET-family bodies; `None` for non-SET types.
///
/// The temperature setpoints travel as u16 in tenths of a degree, the
/// remaining scalar settings as a single byte.
pub fn set_payload_width(msg_type: MsgType) -> Option<usize> {
    match msg_type {
        MsgType::SetT1
        | MsgType::SetT2
        | MsgType::SetT3
        | MsgType::SetMinHeatSetp
        | MsgType::SetMaxHeatSetp => Some(2),
        MsgType::SetMode
        | MsgType::SetAdvance
        | MsgType::SetCurve
        | MsgType::SetUnits
        | MsgType::SetSeason
        | MsgType::SetSensorInfluence => Some(1),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Sequenced head
// ---------------------------------------------------------------------------

/// Common prefix of every sequenced body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestHead {
    pub cseq: u8,
    pub unk1: u8,
    pub unk2: u16,
    pub deviceid: u32,
}

fn read_head(cur: &mut &[u8]) -> RequestHead {
    RequestHead {
        cseq: cur.get_u8(),
        unk1: cur.get_u8(),
        unk2: cur.get_u16_le(),
        deviceid: cur.get_u32_le(),
    }
}

fn put_head(buf: &mut Vec<u8>, cseq: u8, deviceid: u32) {
    buf.put_u8(cseq);
    buf.put_u8(0);
    buf.put_u16_le(0);
    buf.put_u32_le(deviceid);
}

fn need(body: &[u8], len: usize, what: &str) -> Result<(), ProtoError> {
    if body.len() < len {
        return Err(ProtoError::message(format!(
            "{what}: need {len} bytes, have {}",
            body.len()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// STATUS body
// ---------------------------------------------------------------------------

/// One of the eight fixed room slots in a STATUS uplink.
///
/// `presence == 0` means no thermostat occupies the slot.  The derived
/// accessors implement the documented bit decodes; the raw bytes stay
/// available for the fields that are still opaque.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoomSlot {
    pub room: u32,
    pub presence: u8,
    pub mode_byte: u8,
    pub temp: i16,
    pub settemp: i16,
    pub t3: i16,
    pub t2: i16,
    pub t1: i16,
    pub maxsetp: i16,
    pub minsetp: i16,
    pub flags3: u8,
    pub flags4: u8,
    pub unk: u16,
    pub tempcurve: u8,
    pub heatingsetp: u8,
}

impl RoomSlot {
    pub fn present(&self) -> bool {
        self.presence != 0
    }

    /// 0x8F means actively heating, 0x83 idle; anything else is unknown.
    pub fn heating(&self) -> Option<u8> {
        match self.presence {
            0x8F => Some(1),
            0x83 => Some(0),
            _ => None,
        }
    }

    pub fn mode(&self) -> u8 {
        self.mode_byte >> 4
    }

    pub fn sensor_influence(&self) -> u8 {
        (self.flags3 >> 3) & 0xF
    }

    pub fn units(&self) -> u8 {
        (self.flags3 >> 2) & 0x1
    }

    pub fn advance(&self) -> u8 {
        (self.flags3 >> 1) & 0x1
    }

    pub fn boost(&self) -> u8 {
        (self.flags4 >> 2) & 0x1
    }

    pub fn cmd_issued(&self) -> u8 {
        (self.flags4 >> 1) & 0x1
    }

    pub fn winter(&self) -> u8 {
        self.flags4 & 0x1
    }
}

/// OpenTherm telemetry block at the tail of STATUS.
///
/// Ten i16 fields follow the flag bytes; only three have confirmed
/// meanings (boiler flow, DHW and outdoor sensor temperatures).  The rest
/// ride along opaque in `fields`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenTherm {
    pub flags1: u8,
    pub flags2: u8,
    pub fields: [i16; 10],
}

impl OpenTherm {
    pub fn boiler_heating(&self) -> u8 {
        (self.flags1 >> 5) & 0x1
    }

    pub fn dhw_mode(&self) -> u8 {
        (self.flags1 >> 6) & 0x1
    }

    /// tFLO: boiler flow sensor temperature.
    pub fn flow_temp(&self) -> i16 {
        self.fields[2]
    }

    /// tdH: boiler DHW sensor temperature.
    pub fn dhw_temp(&self) -> i16 {
        self.fields[4]
    }

    /// tESt: boiler outdoor sensor temperature.
    pub fn outside_temp(&self) -> i16 {
        self.fields[5]
    }
}

/// Full decoded STATUS uplink body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusBody {
    pub head: RequestHead,
    pub slots: [RoomSlot; STATUS_SLOTS],
    pub opentherm: OpenTherm,
    pub wifi_signal: u8,
    pub trailer: [u8; 9],
}

/// head + 8 x 26-byte slots + OT flags + 10 x i16 + wifi + trailer.
pub const STATUS_BODY_LEN: usize = HEAD_LEN + STATUS_SLOTS * 26 + 2 + 20 + 1 + 9;

fn read_slot(cur: &mut &[u8]) -> RoomSlot {
    RoomSlot {
        room: cur.get_u32_le(),
        presence: cur.get_u8(),
        mode_byte: cur.get_u8(),
        temp: cur.get_i16_le(),
        settemp: cur.get_i16_le(),
        t3: cur.get_i16_le(),
        t2: cur.get_i16_le(),
        t1: cur.get_i16_le(),
        maxsetp: cur.get_i16_le(),
        minsetp: cur.get_i16_le(),
        flags3: cur.get_u8(),
        flags4: cur.get_u8(),
        unk: cur.get_u16_le(),
        tempcurve: cur.get_u8(),
        heatingsetp: cur.get_u8(),
    }
}

fn decode_status(body: &[u8]) -> Result<Decoded, ProtoError> {
    need(body, STATUS_BODY_LEN, "STATUS")?;
    let mut cur = body;
    let head = read_head(&mut cur);
    let slots = std::array::from_fn(|_| read_slot(&mut cur));
    let flags1 = cur.get_u8();
    let flags2 = cur.get_u8();
    let fields = std::array::from_fn(|_| cur.get_i16_le());
    let wifi_signal = cur.get_u8();
    let mut trailer = [0u8; 9];
    cur.copy_to_slice(&mut trailer);
    Ok(Decoded {
        msg: Msg::Status(StatusBody {
            head,
            slots,
            opentherm: OpenTherm {
                flags1,
                flags2,
                fields,
            },
            wifi_signal,
            trailer,
        }),
        consumed: STATUS_BODY_LEN,
    })
}

// ---------------------------------------------------------------------------
// Typed uplink messages
// ---------------------------------------------------------------------------

/// A decoded uplink body.  `Unknown` preserves the raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    Status(StatusBody),
    Ping {
        head: RequestHead,
        value: u16,
    },
    Program {
        head: RequestHead,
        room: u32,
        day: u16,
        hours: [u8; PROGRAM_HOURS],
    },
    ProgEnd {
        head: RequestHead,
        room: u32,
        marker: u16,
    },
    SwVersion {
        head: RequestHead,
        version: String,
    },
    GetProg {
        head: RequestHead,
        room: u32,
        marker: u32,
    },
    Refresh {
        head: RequestHead,
    },
    DeviceTime {
        head: RequestHead,
        dst: u8,
    },
    OutsideTemp {
        head: RequestHead,
        source: u8,
    },
    Set {
        head: RequestHead,
        msg_type: MsgType,
        room: u32,
        value: u32,
    },
    Unknown {
        msg_type: u8,
        raw: Vec<u8>,
    },
}

impl Msg {
    /// The sequenced head, when the message carries one.
    pub fn head(&self) -> Option<RequestHead> {
        match self {
            Msg::Status(status) => Some(status.head),
            Msg::Ping { head, .. }
            | Msg::Program { head, .. }
            | Msg::ProgEnd { head, .. }
            | Msg::SwVersion { head, .. }
            | Msg::GetProg { head, .. }
            | Msg::Refresh { head }
            | Msg::DeviceTime { head, .. }
            | Msg::OutsideTemp { head, .. }
            | Msg::Set { head, .. } => Some(*head),
            Msg::Unknown { .. } => None,
        }
    }
}

/// A decoded message plus the number of body bytes the decoder consumed.
///
/// The dispatcher compares `consumed` with the wrapper's inner length and
/// warns on mismatch, as a canary for layout drift between firmware
/// revisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub msg: Msg,
    pub consumed: usize,
}

/// Decode an uplink body for `msg_type`.
pub fn decode_uplink(msg_type: MsgType, body: &[u8]) -> Result<Decoded, ProtoError> {
    match msg_type {
        MsgType::Status => decode_status(body),
        MsgType::Ping => {
            need(body, HEAD_LEN + 2, "PING")?;
            let mut cur = body;
            let head = read_head(&mut cur);
            let value = cur.get_u16_le();
            Ok(Decoded {
                msg: Msg::Ping { head, value },
                consumed: HEAD_LEN + 2,
            })
        }
        MsgType::Program => {
            need(body, HEAD_LEN + 6 + PROGRAM_HOURS, "PROGRAM")?;
            let mut cur = body;
            let head = read_head(&mut cur);
            let room = cur.get_u32_le();
            let day = cur.get_u16_le();
            let mut hours = [0u8; PROGRAM_HOURS];
            cur.copy_to_slice(&mut hours);
            Ok(Decoded {
                msg: Msg::Program {
                    head,
                    room,
                    day,
                    hours,
                },
                consumed: HEAD_LEN + 6 + PROGRAM_HOURS,
            })
        }
        MsgType::ProgEnd => {
            need(body, HEAD_LEN + 6, "PROG_END")?;
            let mut cur = body;
            let head = read_head(&mut cur);
            let room = cur.get_u32_le();
            let marker = cur.get_u16_le();
            Ok(Decoded {
                msg: Msg::ProgEnd { head, room, marker },
                consumed: HEAD_LEN + 6,
            })
        }
        MsgType::SwVersion => {
            need(body, HEAD_LEN + SWVERSION_LEN, "SWVERSION")?;
            let mut cur = body;
            let head = read_head(&mut cur);
            let raw = &cur[..SWVERSION_LEN];
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            let version = String::from_utf8_lossy(&raw[..end]).into_owned();
            Ok(Decoded {
                msg: Msg::SwVersion { head, version },
                consumed: HEAD_LEN + SWVERSION_LEN,
            })
        }
        MsgType::GetProg => {
            need(body, HEAD_LEN + 8, "GET_PROG")?;
            let mut cur = body;
            let head = read_head(&mut cur);
            let room = cur.get_u32_le();
            let marker = cur.get_u32_le();
            Ok(Decoded {
                msg: Msg::GetProg { head, room, marker },
                consumed: HEAD_LEN + 8,
            })
        }
        MsgType::Refresh => {
            need(body, HEAD_LEN, "REFRESH")?;
            let mut cur = body;
            let head = read_head(&mut cur);
            Ok(Decoded {
                msg: Msg::Refresh { head },
                consumed: HEAD_LEN,
            })
        }
        MsgType::DeviceTime => {
            // Only the first byte after the head is meaningful; the rest of
            // the 8-byte tail carries uninitialized device memory.
            need(body, HEAD_LEN + 8, "DEVICE_TIME")?;
            let mut cur = body;
            let head = read_head(&mut cur);
            let dst = cur.get_u8();
            Ok(Decoded {
                msg: Msg::DeviceTime { head, dst },
                consumed: HEAD_LEN + 8,
            })
        }
        MsgType::OutsideTemp => {
            need(body, HEAD_LEN + 1, "OUTSIDE_TEMP")?;
            let mut cur = body;
            let head = read_head(&mut cur);
            let source = cur.get_u8();
            Ok(Decoded {
                msg: Msg::OutsideTemp { head, source },
                consumed: HEAD_LEN + 1,
            })
        }
        MsgType::SetMode
        | MsgType::SetT3
        | MsgType::SetT2
        | MsgType::SetT1
        | MsgType::SetAdvance
        | MsgType::SetCurve
        | MsgType::SetMinHeatSetp
        | MsgType::SetMaxHeatSetp
        | MsgType::SetUnits
        | MsgType::SetSeason
        | MsgType::SetSensorInfluence => {
            let width = set_payload_width(msg_type).unwrap_or(1);
            need(body, HEAD_LEN + 4 + width, "SET")?;
            let mut cur = body;
            let head = read_head(&mut cur);
            let room = cur.get_u32_le();
            let value = match width {
                2 => u32::from(cur.get_u16_le()),
                _ => u32::from(cur.get_u8()),
            };
            Ok(Decoded {
                msg: Msg::Set {
                    head,
                    msg_type,
                    room,
                    value,
                },
                consumed: HEAD_LEN + 4 + width,
            })
        }
        MsgType::Unknown(id) => Ok(Decoded {
            msg: Msg::Unknown {
                msg_type: id,
                raw: body.to_vec(),
            },
            consumed: body.len(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Downlink body builders
// ---------------------------------------------------------------------------

pub fn ping_body(deviceid: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEAD_LEN + 2);
    put_head(&mut buf, UNUSED_CSEQ, deviceid);
    buf.put_u16_le(PING_MARKER);
    buf
}

pub fn status_ack_body(deviceid: u32, lastseen: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEAD_LEN + 4);
    put_head(&mut buf, UNUSED_CSEQ, deviceid);
    buf.put_u32_le(lastseen);
    buf
}

pub fn get_prog_body(cseq: u8, deviceid: u32, room: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEAD_LEN + 8);
    put_head(&mut buf, cseq, deviceid);
    buf.put_u32_le(room);
    buf.put_u32_le(GET_PROG_MARKER);
    buf
}

/// SWVERSION request and echo-reply share the same head-only body.
pub fn swversion_body(cseq: u8, deviceid: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEAD_LEN);
    put_head(&mut buf, cseq, deviceid);
    buf
}

pub fn program_body(deviceid: u32, room: u32, day: u16, hours: &[u8; PROGRAM_HOURS]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEAD_LEN + 6 + PROGRAM_HOURS);
    put_head(&mut buf, UNUSED_CSEQ, deviceid);
    buf.put_u32_le(room);
    buf.put_u16_le(day);
    buf.extend_from_slice(hours);
    buf
}

/// Build a SET-family body.  Fails on a non-SET `msg_type`.
pub fn set_body(
    cseq: u8,
    deviceid: u32,
    room: u32,
    msg_type: MsgType,
    value: u32,
) -> Result<Vec<u8>, ProtoError> {
    let width = set_payload_width(msg_type).ok_or_else(|| {
        ProtoError::message(format!("{msg_type} is not a SET-family message"))
    })?;
    let mut buf = Vec::with_capacity(HEAD_LEN + 4 + width);
    put_head(&mut buf, cseq, deviceid);
    buf.put_u32_le(room);
    match width {
        2 => buf.put_u16_le(value as u16),
        _ => buf.put_u8(value as u8),
    }
    Ok(buf)
}

pub fn refresh_body(cseq: u8, deviceid: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEAD_LEN);
    put_head(&mut buf, cseq, deviceid);
    buf
}

pub fn outside_temp_body(cseq: u8, deviceid: u32, source: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEAD_LEN + 1);
    put_head(&mut buf, cseq, deviceid);
    buf.put_u8(source);
    buf
}

pub fn device_time_body(cseq: u8, deviceid: u32, dst: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEAD_LEN + 8);
    put_head(&mut buf, cseq, deviceid);
    buf.put_u32_le(u32::from(dst));
    buf.put_u32_le(0);
    buf
}

pub fn prog_end_body(deviceid: u32, room: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEAD_LEN + 6);
    put_head(&mut buf, UNUSED_CSEQ, deviceid);
    buf.put_u32_le(room);
    buf.put_u16_le(PROG_END_MARKER);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_type_roundtrip() {
        for id in 0u8..=0xFF {
            assert_eq!(MsgType::from_u8(id).as_u8(), id);
        }
    }

    #[test]
    fn set_widths_match_registry() {
        assert_eq!(set_payload_width(MsgType::SetT1), Some(2));
        assert_eq!(set_payload_width(MsgType::SetT2), Some(2));
        assert_eq!(set_payload_width(MsgType::SetT3), Some(2));
        assert_eq!(set_payload_width(MsgType::SetMinHeatSetp), Some(2));
        assert_eq!(set_payload_width(MsgType::SetMaxHeatSetp), Some(2));
        assert_eq!(set_payload_width(MsgType::SetMode), Some(1));
        assert_eq!(set_payload_width(MsgType::SetUnits), Some(1));
        assert_eq!(set_payload_width(MsgType::SetSeason), Some(1));
        assert_eq!(set_payload_width(MsgType::SetAdvance), Some(1));
        assert_eq!(set_payload_width(MsgType::SetCurve), Some(1));
        assert_eq!(set_payload_width(MsgType::SetSensorInfluence), Some(1));
        assert_eq!(set_payload_width(MsgType::Status), None);
        assert_eq!(set_payload_width(MsgType::Ping), None);
    }

    #[test]
    fn set_t1_value_is_little_endian() {
        // 21.5 degC travels as 215 = 0x00D7.
        let body = set_body(0, 1, 0x10, MsgType::SetT1, 215).unwrap();
        assert_eq!(&body[12..14], &[0xD7, 0x00]);
    }

    #[test]
    fn set_body_rejects_non_set_types() {
        assert!(set_body(0, 1, 0x10, MsgType::Ping, 1).is_err());
    }

    #[test]
    fn set_roundtrip() {
        let body = set_body(5, 0x1234_5678, 0x10, MsgType::SetCurve, 3).unwrap();
        let decoded = decode_uplink(MsgType::SetCurve, &body).unwrap();
        assert_eq!(decoded.consumed, body.len());
        match decoded.msg {
            Msg::Set {
                head,
                msg_type,
                room,
                value,
            } => {
                assert_eq!(head.cseq, 5);
                assert_eq!(head.deviceid, 0x1234_5678);
                assert_eq!(msg_type, MsgType::SetCurve);
                assert_eq!(room, 0x10);
                assert_eq!(value, 3);
            }
            other => panic!("expected Set, got {other:?}"),
        }
    }

    #[test]
    fn ping_body_carries_marker() {
        let body = ping_body(1);
        assert_eq!(body.len(), 10);
        assert_eq!(body[0], UNUSED_CSEQ);
        assert_eq!(&body[4..8], &1u32.to_le_bytes());
        assert_eq!(&body[8..10], &PING_MARKER.to_le_bytes());
    }

    #[test]
    fn program_roundtrip() {
        let hours = [0x22u8; PROGRAM_HOURS];
        let body = program_body(9, 0x10, 3, &hours);
        let decoded = decode_uplink(MsgType::Program, &body).unwrap();
        match decoded.msg {
            Msg::Program {
                room, day, hours: h, ..
            } => {
                assert_eq!(room, 0x10);
                assert_eq!(day, 3);
                assert_eq!(h, hours);
            }
            other => panic!("expected Program, got {other:?}"),
        }
    }

    #[test]
    fn swversion_trims_nul_padding() {
        let mut body = swversion_body(2, 7);
        body.extend_from_slice(b"V3.02\0\0\0\0\0\0\0\0");
        let decoded = decode_uplink(MsgType::SwVersion, &body).unwrap();
        match decoded.msg {
            Msg::SwVersion { version, .. } => assert_eq!(version, "V3.02"),
            other => panic!("expected SwVersion, got {other:?}"),
        }
    }

    #[test]
    fn truncated_set_is_rejected() {
        let body = set_body(0, 1, 0x10, MsgType::SetT1, 215).unwrap();
        assert!(decode_uplink(MsgType::SetT1, &body[..body.len() - 1]).is_err());
    }

    #[test]
    fn unknown_keeps_raw_bytes() {
        let decoded = decode_uplink(MsgType::Unknown(0x42), &[1, 2, 3]).unwrap();
        assert_eq!(
            decoded.msg,
            Msg::Unknown {
                msg_type: 0x42,
                raw: vec![1, 2, 3],
            }
        );
        assert_eq!(decoded.consumed, 3);
    }

    #[test]
    fn room_slot_bit_decodes() {
        let slot = RoomSlot {
            presence: 0x8F,
            mode_byte: 0x20,
            flags3: 0b0101_0110,
            flags4: 0b0000_0111,
            ..RoomSlot::default()
        };
        assert_eq!(slot.heating(), Some(1));
        assert_eq!(slot.mode(), 2);
        assert_eq!(slot.sensor_influence(), 0b1010);
        assert_eq!(slot.units(), 1);
        assert_eq!(slot.advance(), 1);
        assert_eq!(slot.boost(), 1);
        assert_eq!(slot.cmd_issued(), 1);
        assert_eq!(slot.winter(), 1);

        let idle = RoomSlot {
            presence: 0x83,
            ..RoomSlot::default()
        };
        assert_eq!(idle.heating(), Some(0));
        let odd = RoomSlot {
            presence: 0x99,
            ..RoomSlot::default()
        };
        assert_eq!(odd.heating(), None);
    }

    #[test]
    fn status_roundtrip() {
        let mut status = StatusBody {
            head: RequestHead {
                cseq: UNUSED_CSEQ,
                unk1: 2,
                unk2: 1,
                deviceid: 0x1234_5678,
            },
            wifi_signal: 57,
            ..StatusBody::default()
        };
        status.slots[0] = RoomSlot {
            room: 0x10,
            presence: 0x8F,
            mode_byte: 0x20,
            temp: 205,
            settemp: 210,
            t3: 180,
            t2: 160,
            t1: 50,
            maxsetp: 300,
            minsetp: 50,
            ..RoomSlot::default()
        };
        status.opentherm.fields[2] = 412;

        let body = crate::testing::status_body_bytes(&status);
        assert_eq!(body.len(), STATUS_BODY_LEN);
        let decoded = decode_uplink(MsgType::Status, &body).unwrap();
        assert_eq!(decoded.consumed, STATUS_BODY_LEN);
        match decoded.msg {
            Msg::Status(parsed) => {
                assert_eq!(parsed, status);
                assert_eq!(parsed.slots[0].heating(), Some(1));
                assert!(!parsed.slots[1].present());
                assert_eq!(parsed.opentherm.flow_temp(), 412);
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[test]
    fn opentherm_named_fields() {
        let ot = OpenTherm {
            flags1: 0b0110_0000,
            flags2: 0,
            fields: [0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
        };
        assert_eq!(ot.boiler_heating(), 1);
        assert_eq!(ot.dhw_mode(), 1);
        assert_eq!(ot.flow_temp(), 2);
        assert_eq!(ot.dhw_temp(), 4);
        assert_eq!(ot.outside_temp(), 5);
    }
}
