//! Device-side message builders for tests.
//!
//! Gated behind the `test-support` feature.  These build the uplink
//! datagrams a real thermostat gateway would emit, with the head constants
//! observed on the wire (`unk1 = 2`, `unk2 = 1`; PING uses `unk2 = 4`), so
//! service tests can drive the dispatcher end to end without hardware.

use bytes::BufMut;

use crate::frame::Frame;
use crate::msg::{
    GET_PROG_MARKER, MsgType, PROG_END_MARKER, PROGRAM_HOURS, RoomSlot, SWVERSION_LEN, StatusBody,
    UNUSED_CSEQ, set_payload_width,
};
use crate::wrapper::{FLAG_RESPONSE, FLAG_SYNC_LOST, FLAG_VALID, FLAG_WRITE, LENGTH_BIAS, WRAPPER_LEN};

/// Observed base flags on uplinks: valid bit plus the always-set bit 6.
pub const UL_FLAGS_BASE: u8 = FLAG_VALID | (1 << 6);

pub fn uplink_flags(response: bool, write: bool, sync_lost: bool) -> u8 {
    let mut flags = UL_FLAGS_BASE;
    if response {
        flags |= FLAG_RESPONSE;
    }
    if write {
        flags |= FLAG_WRITE;
    }
    if sync_lost {
        flags |= FLAG_SYNC_LOST;
    }
    flags
}

/// Assemble a complete uplink datagram: wrapper with raw `flags`, framed
/// with the device-chosen `seq`.
pub fn encode_uplink(msg_type: MsgType, flags: u8, seq: u32, body: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(WRAPPER_LEN + body.len());
    payload.put_u8(msg_type.as_u8());
    payload.put_u8(flags);
    payload.put_u16_le((body.len() - LENGTH_BIAS) as u16);
    payload.extend_from_slice(body);
    Frame { seq, payload }.encode()
}

fn put_ul_head(buf: &mut Vec<u8>, cseq: u8, unk2: u16, deviceid: u32) {
    buf.put_u8(cseq);
    buf.put_u8(0x02);
    buf.put_u16_le(unk2);
    buf.put_u32_le(deviceid);
}

pub fn ping_body(deviceid: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    put_ul_head(&mut buf, UNUSED_CSEQ, 4, deviceid);
    buf.put_u16_le(1);
    buf
}

pub fn program_body(deviceid: u32, room: u32, day: u16, hours: &[u8; PROGRAM_HOURS]) -> Vec<u8> {
    let mut buf = Vec::new();
    put_ul_head(&mut buf, UNUSED_CSEQ, 1, deviceid);
    buf.put_u32_le(room);
    buf.put_u16_le(day);
    buf.extend_from_slice(hours);
    buf
}

pub fn prog_end_body(deviceid: u32, room: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    put_ul_head(&mut buf, UNUSED_CSEQ, 1, deviceid);
    buf.put_u32_le(room);
    buf.put_u16_le(PROG_END_MARKER);
    buf
}

pub fn swversion_body(cseq: u8, deviceid: u32, version: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    put_ul_head(&mut buf, cseq, 1, deviceid);
    let mut field = [0u8; SWVERSION_LEN];
    let len = version.len().min(SWVERSION_LEN);
    field[..len].copy_from_slice(&version.as_bytes()[..len]);
    buf.extend_from_slice(&field);
    buf
}

pub fn set_body(cseq: u8, deviceid: u32, room: u32, msg_type: MsgType, value: u32) -> Vec<u8> {
    let width = set_payload_width(msg_type).expect("SET-family message type");
    let mut buf = Vec::new();
    put_ul_head(&mut buf, cseq, 1, deviceid);
    buf.put_u32_le(room);
    match width {
        2 => buf.put_u16_le(value as u16),
        _ => buf.put_u8(value as u8),
    }
    buf
}

pub fn get_prog_reply_body(cseq: u8, deviceid: u32, room: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    put_ul_head(&mut buf, cseq, 1, deviceid);
    buf.put_u32_le(room);
    buf.put_u32_le(GET_PROG_MARKER);
    buf
}

pub fn refresh_reply_body(cseq: u8, deviceid: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    put_ul_head(&mut buf, cseq, 1, deviceid);
    buf
}

pub fn device_time_reply_body(cseq: u8, deviceid: u32, dst: u8) -> Vec<u8> {
    let mut buf = Vec::new();
    put_ul_head(&mut buf, cseq, 1, deviceid);
    buf.put_u8(dst);
    buf.put_u8(0);
    buf.put_u16_le(0);
    buf.put_u32_le(0);
    buf
}

pub fn outside_temp_reply_body(cseq: u8, deviceid: u32, source: u8) -> Vec<u8> {
    let mut buf = Vec::new();
    put_ul_head(&mut buf, cseq, 1, deviceid);
    buf.put_u8(source);
    buf
}

/// Serialize a [`StatusBody`] back to wire bytes (inverse of the decoder).
pub fn status_body_bytes(status: &StatusBody) -> Vec<u8> {
    let mut buf = Vec::new();
    put_ul_head(&mut buf, status.head.cseq, status.head.unk2, status.head.deviceid);
    for slot in &status.slots {
        put_slot(&mut buf, slot);
    }
    buf.put_u8(status.opentherm.flags1);
    buf.put_u8(status.opentherm.flags2);
    for field in status.opentherm.fields {
        buf.put_i16_le(field);
    }
    buf.put_u8(status.wifi_signal);
    buf.extend_from_slice(&status.trailer);
    buf
}

fn put_slot(buf: &mut Vec<u8>, slot: &RoomSlot) {
    buf.put_u32_le(slot.room);
    buf.put_u8(slot.presence);
    buf.put_u8(slot.mode_byte);
    buf.put_i16_le(slot.temp);
    buf.put_i16_le(slot.settemp);
    buf.put_i16_le(slot.t3);
    buf.put_i16_le(slot.t2);
    buf.put_i16_le(slot.t1);
    buf.put_i16_le(slot.maxsetp);
    buf.put_i16_le(slot.minsetp);
    buf.put_u8(slot.flags3);
    buf.put_u8(slot.flags4);
    buf.put_u16_le(slot.unk);
    buf.put_u8(slot.tempcurve);
    buf.put_u8(slot.heatingsetp);
}
