//! In-memory shadow of every peer, device, and room the simulator has seen.
//!
//! The shadow is the only ground truth for device state: the dispatcher
//! writes it from uplinks and the HTTP layer reads it.  A single async
//! mutex guards the whole tree, including each device's pending-request
//! table; the guard is never held across an await point.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;

use besim_proto::msg::{MsgType, PROGRAM_HOURS, RoomSlot};
use serde::Serialize;
use tokio::sync::{Mutex, oneshot};

use crate::cseq::ReplyValue;

pub type SharedShadow = Arc<Mutex<Shadow>>;

/// Seconds since the Unix epoch, as carried in STATUS acks.
pub fn unix_now() -> u32 {
    chrono::Utc::now().timestamp() as u32
}

// ---------------------------------------------------------------------------
// Shadow tree
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Shadow {
    pub peers: BTreeMap<SocketAddr, Peer>,
    pub devices: BTreeMap<u32, Device>,
}

impl Shadow {
    /// Record an inbound frame from `addr` and remember its sequence number.
    pub fn note_peer(&mut self, addr: SocketAddr, seq: u32) -> &mut Peer {
        let peer = self.peers.entry(addr).or_default();
        peer.seq = seq;
        peer
    }

    /// Locate or create the device shadow, binding it to its current
    /// transport address and registering it with the peer.
    pub fn device_entry(&mut self, deviceid: u32, addr: SocketAddr) -> &mut Device {
        self.peers.entry(addr).or_default().devices.insert(deviceid);
        let device = self
            .devices
            .entry(deviceid)
            .or_insert_with(|| Device::new(addr));
        device.addr = addr;
        device
    }
}

/// One transport peer, keyed by `(ip, port)`.  Never destroyed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Peer {
    pub seq: u32,
    pub devices: BTreeSet<u32>,
}

/// One thermostat gateway.
#[derive(Debug, Serialize)]
pub struct Device {
    pub addr: SocketAddr,
    /// Control-plane sequence counter, 0..=MAX_CSEQ.
    pub cseq: u8,
    #[serde(skip)]
    pub pending: HashMap<u8, oneshot::Sender<ReplyValue>>,
    pub version: Option<String>,
    pub wifisignal: u8,
    #[serde(rename = "boilerOn")]
    pub boiler_on: u8,
    #[serde(rename = "dhwMode")]
    pub dhw_mode: u8,
    /// tFLO: boiler flow sensor temperature.
    #[serde(rename = "tFLO")]
    pub flow_temp: i16,
    /// tdH: boiler DHW sensor temperature.
    #[serde(rename = "tdH")]
    pub dhw_temp: i16,
    /// tESt: boiler outdoor sensor temperature.
    #[serde(rename = "tESt")]
    pub outside_temp: i16,
    pub lastseen: u32,
    pub rooms: BTreeMap<u32, Room>,
}

impl Device {
    pub fn new(addr: SocketAddr) -> Device {
        Device {
            addr,
            cseq: 0,
            pending: HashMap::new(),
            version: None,
            wifisignal: 0,
            boiler_on: 0,
            dhw_mode: 0,
            flow_temp: 0,
            dhw_temp: 0,
            outside_temp: 0,
            lastseen: 0,
            rooms: BTreeMap::new(),
        }
    }
}

/// One thermostat slot under a device.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Room {
    /// 1 = heating, 0 = idle, null = the status byte was unrecognized.
    pub heating: Option<u8>,
    pub temp: i16,
    pub settemp: i16,
    pub t1: i16,
    pub t2: i16,
    pub t3: i16,
    pub minsetp: i16,
    pub maxsetp: i16,
    pub mode: u8,
    pub tempcurve: u8,
    pub heatingsetp: u8,
    pub sensorinfluence: u8,
    pub units: u8,
    pub advance: u8,
    pub boost: u8,
    pub cmdissued: u8,
    pub winter: u8,
    pub lastseen: u32,
    /// Weekly program, one 24-hour schedule per day id.
    pub days: BTreeMap<u16, [u8; PROGRAM_HOURS]>,
}

impl Room {
    /// Apply one STATUS room slot to the shadow.
    pub fn apply_slot(&mut self, slot: &RoomSlot, now: u32) {
        self.heating = slot.heating();
        self.temp = slot.temp;
        self.settemp = slot.settemp;
        self.t1 = slot.t1;
        self.t2 = slot.t2;
        self.t3 = slot.t3;
        self.minsetp = slot.minsetp;
        self.maxsetp = slot.maxsetp;
        self.mode = slot.mode();
        self.tempcurve = slot.tempcurve;
        self.heatingsetp = slot.heatingsetp;
        self.sensorinfluence = slot.sensor_influence();
        self.units = slot.units();
        self.advance = slot.advance();
        self.boost = slot.boost();
        self.cmdissued = slot.cmd_issued();
        self.winter = slot.winter();
        self.lastseen = now;
    }

    /// Apply a SET-family value to the matching field.
    pub fn apply_set(&mut self, msg_type: MsgType, value: u32) {
        match msg_type {
            MsgType::SetT1 => self.t1 = value as i16,
            MsgType::SetT2 => self.t2 = value as i16,
            MsgType::SetT3 => self.t3 = value as i16,
            MsgType::SetMinHeatSetp => self.minsetp = value as i16,
            MsgType::SetMaxHeatSetp => self.maxsetp = value as i16,
            MsgType::SetUnits => self.units = value as u8,
            MsgType::SetSeason => self.winter = value as u8,
            MsgType::SetAdvance => self.advance = value as u8,
            MsgType::SetMode => self.mode = value as u8,
            MsgType::SetSensorInfluence => self.sensorinfluence = value as u8,
            MsgType::SetCurve => self.tempcurve = value as u8,
            _ => {}
        }
    }

    /// Read a room parameter by its REST name.  Returns `None` for names
    /// that are not exposed.
    pub fn param(&self, param: &str) -> Option<i64> {
        Some(match param {
            "t1" => i64::from(self.t1),
            "t2" => i64::from(self.t2),
            "t3" => i64::from(self.t3),
            "minsetp" => i64::from(self.minsetp),
            "maxsetp" => i64::from(self.maxsetp),
            "temp" => i64::from(self.temp),
            "settemp" => i64::from(self.settemp),
            "mode" => i64::from(self.mode),
            "tempcurve" => i64::from(self.tempcurve),
            "sensorinfluence" => i64::from(self.sensorinfluence),
            "units" => i64::from(self.units),
            "advance" => i64::from(self.advance),
            "boost" => i64::from(self.boost),
            "cmdissued" => i64::from(self.cmdissued),
            "winter" => i64::from(self.winter),
            _ => return None,
        })
    }
}

/// Map a writeable REST parameter name to its SET message type.
pub fn set_msg_for_param(param: &str) -> Option<MsgType> {
    Some(match param {
        "t1" => MsgType::SetT1,
        "t2" => MsgType::SetT2,
        "t3" => MsgType::SetT3,
        "tempcurve" => MsgType::SetCurve,
        "minsetp" => MsgType::SetMinHeatSetp,
        "maxsetp" => MsgType::SetMaxHeatSetp,
        "units" => MsgType::SetUnits,
        "winter" => MsgType::SetSeason,
        "sensorinfluence" => MsgType::SetSensorInfluence,
        "advance" => MsgType::SetAdvance,
        "mode" => MsgType::SetMode,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("10.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn device_entry_creates_and_rebinds_addr() {
        let mut shadow = Shadow::default();
        shadow.device_entry(42, addr(1000));
        assert_eq!(shadow.devices[&42].addr, addr(1000));
        assert!(shadow.peers[&addr(1000)].devices.contains(&42));

        // Device reconnects from a new source port.
        shadow.device_entry(42, addr(2000));
        assert_eq!(shadow.devices[&42].addr, addr(2000));
        assert_eq!(shadow.devices.len(), 1);
    }

    #[test]
    fn note_peer_tracks_last_seq() {
        let mut shadow = Shadow::default();
        shadow.note_peer(addr(1), 10);
        shadow.note_peer(addr(1), 11);
        assert_eq!(shadow.peers[&addr(1)].seq, 11);
        assert_eq!(shadow.peers.len(), 1);
    }

    #[test]
    fn apply_slot_is_idempotent_on_fields() {
        let slot = RoomSlot {
            room: 0x10,
            presence: 0x8F,
            mode_byte: 0x20,
            temp: 205,
            settemp: 210,
            t1: 50,
            t2: 160,
            t3: 180,
            minsetp: 50,
            maxsetp: 300,
            flags3: 0b0000_0110,
            flags4: 0b0000_0101,
            ..RoomSlot::default()
        };
        let mut room = Room::default();
        room.apply_slot(&slot, 100);
        let first = serde_json::to_value(&room).unwrap();
        room.apply_slot(&slot, 200);
        let mut second = serde_json::to_value(&room).unwrap();
        assert_eq!(second["lastseen"], 200);
        second["lastseen"] = first["lastseen"].clone();
        assert_eq!(first, second);
        assert_eq!(room.heating, Some(1));
        assert_eq!(room.mode, 2);
        assert_eq!(room.minsetp, 50);
        assert_eq!(room.maxsetp, 300);
    }

    #[test]
    fn set_param_mapping_covers_all_writeable_params() {
        for (param, msg_type) in [
            ("t1", MsgType::SetT1),
            ("t2", MsgType::SetT2),
            ("t3", MsgType::SetT3),
            ("tempcurve", MsgType::SetCurve),
            ("minsetp", MsgType::SetMinHeatSetp),
            ("maxsetp", MsgType::SetMaxHeatSetp),
            ("units", MsgType::SetUnits),
            ("winter", MsgType::SetSeason),
            ("sensorinfluence", MsgType::SetSensorInfluence),
            ("advance", MsgType::SetAdvance),
            ("mode", MsgType::SetMode),
        ] {
            assert_eq!(set_msg_for_param(param), Some(msg_type));
        }
        assert_eq!(set_msg_for_param("boost"), None);
        assert_eq!(set_msg_for_param("temp"), None);
    }

    #[test]
    fn apply_set_updates_the_matching_field() {
        let mut room = Room::default();
        room.apply_set(MsgType::SetT1, 215);
        assert_eq!(room.t1, 215);
        room.apply_set(MsgType::SetSeason, 1);
        assert_eq!(room.winter, 1);
        room.apply_set(MsgType::SetMinHeatSetp, 80);
        assert_eq!(room.minsetp, 80);
    }
}
