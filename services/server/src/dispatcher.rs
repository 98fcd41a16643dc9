//! UDP receive loop and per-message handling.
//!
//! One task owns the receive side of the socket.  For every datagram:
//! decode frame and wrapper, update the peer record, decode the typed body,
//! then branch per message: update the shadow, synthesize the downlink
//! reply the device expects, trigger follow-ups (program fetches), and
//! complete any parked sender call.
//!
//! Malformed datagrams are logged and dropped.  Handler failures are
//! logged and followed by a 1 s back-off; the loop never exits.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use besim_proto::msg::{GET_PROG_MARKER, PROG_END_MARKER, RequestHead, StatusBody};
use besim_proto::wrapper::FLAGS_RESERVED_ZERO;
use besim_proto::{Frame, Msg, MsgType, ProtoError, UNUSED_CSEQ, Wrapper, decode_uplink};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::cseq::{self, ReplyValue};
use crate::db::Db;
use crate::sender::{SendError, Sender};
use crate::shadow::{SharedShadow, unix_now};

/// Largest datagram the device is known to emit.
pub const MAX_DATAGRAM: usize = 4096;

#[derive(Debug, Error)]
pub enum HandleError {
    #[error(transparent)]
    Decode(#[from] ProtoError),
    #[error(transparent)]
    Send(#[from] SendError),
}

pub struct Dispatcher {
    socket: Arc<UdpSocket>,
    shadow: SharedShadow,
    sender: Sender,
    db: Db,
}

impl Dispatcher {
    pub fn new(socket: Arc<UdpSocket>, shadow: SharedShadow, sender: Sender, db: Db) -> Dispatcher {
        Dispatcher {
            socket,
            shadow,
            sender,
            db,
        }
    }

    pub async fn run(self) {
        info!("UDP server is running");
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, addr) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    error!(error = %e, "recv failed");
                    sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            debug!(%addr, bytes = len, payload = %hex::encode(&buf[..len]), "uplink datagram");
            match self.handle_datagram(&buf[..len], addr).await {
                Ok(()) => {}
                Err(HandleError::Decode(e)) => warn!(%addr, error = %e, "dropping datagram"),
                Err(e) => {
                    error!(%addr, error = %e, "dispatch failed");
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn handle_datagram(&self, data: &[u8], addr: SocketAddr) -> Result<(), HandleError> {
        let frame = Frame::decode(data)?;
        let (wrapper, body) = Wrapper::decode(&frame.payload)?;

        if wrapper.flags & FLAGS_RESERVED_ZERO != 0 {
            warn!(flags = wrapper.flags, "reserved flag bits set");
        }
        if wrapper.downlink {
            warn!("unexpected downlink flag on an uplink");
        }

        self.shadow.lock().await.note_peer(addr, frame.seq);

        let decoded = decode_uplink(wrapper.msg_type, body)?;
        debug!(
            seq = frame.seq,
            msg = %wrapper.msg_type,
            response = wrapper.response,
            write = wrapper.write,
            sync_lost = wrapper.cloud_sync_lost,
            len = body.len(),
            "uplink"
        );

        if !wrapper.valid {
            // The device rejected this message type; record liveness only.
            warn!(msg = %wrapper.msg_type, "device rejected this message type");
            if let Some(head) = decoded.msg.head() {
                let mut shadow = self.shadow.lock().await;
                shadow.device_entry(head.deviceid, addr).lastseen = unix_now();
            }
            return Ok(());
        }

        match &decoded.msg {
            Msg::Status(status) => self.handle_status(addr, &wrapper, status).await?,
            Msg::Ping { head, value } => self.handle_ping(addr, head, *value).await,
            Msg::Program {
                head,
                room,
                day,
                hours,
            } => {
                self.handle_program(addr, &wrapper, head, *room, *day, hours)
                    .await;
            }
            Msg::ProgEnd { head, room, marker } => {
                self.handle_prog_end(addr, &wrapper, head, *room, *marker)
                    .await;
            }
            Msg::SwVersion { head, version } => {
                self.handle_swversion(addr, &wrapper, head, version).await?;
            }
            Msg::GetProg { head, marker, .. } => {
                if *marker != GET_PROG_MARKER {
                    warn!(marker, "unexpected GET_PROG marker");
                }
                self.handle_reply(addr, &wrapper, head, ReplyValue::Scalar(*marker))
                    .await;
            }
            Msg::Refresh { head } => {
                self.handle_reply(addr, &wrapper, head, ReplyValue::Scalar(u32::from(head.unk2)))
                    .await;
            }
            Msg::DeviceTime { head, dst } => {
                self.handle_reply(addr, &wrapper, head, ReplyValue::Scalar(u32::from(*dst)))
                    .await;
            }
            Msg::OutsideTemp { head, source } => {
                self.handle_reply(addr, &wrapper, head, ReplyValue::Scalar(u32::from(*source)))
                    .await;
            }
            Msg::Set {
                head,
                msg_type,
                room,
                value,
            } => {
                self.handle_set(addr, &wrapper, head, *msg_type, *room, *value)
                    .await?;
            }
            Msg::Unknown { msg_type, raw } => {
                warn!(
                    msg_type = format_args!("{msg_type:#04x}"),
                    body = %hex::encode(raw),
                    "unhandled message"
                );
            }
        }

        if decoded.consumed != body.len() {
            warn!(
                msg = %wrapper.msg_type,
                consumed = decoded.consumed,
                inner = body.len(),
                "message length mismatch"
            );
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // STATUS
    // -----------------------------------------------------------------------

    async fn handle_status(
        &self,
        addr: SocketAddr,
        wrapper: &Wrapper,
        status: &StatusBody,
    ) -> Result<(), HandleError> {
        let now = unix_now();
        let deviceid = status.head.deviceid;
        let mut follow_up = Vec::new();
        let mut samples = Vec::new();

        {
            let mut shadow = self.shadow.lock().await;
            let device = shadow.device_entry(deviceid, addr);
            device.wifisignal = status.wifi_signal;
            device.boiler_on = status.opentherm.boiler_heating();
            device.dhw_mode = status.opentherm.dhw_mode();
            device.flow_temp = status.opentherm.flow_temp();
            device.dhw_temp = status.opentherm.dhw_temp();
            device.outside_temp = status.opentherm.outside_temp();
            device.lastseen = now;

            for slot in &status.slots {
                if !slot.present() {
                    continue;
                }
                if slot.heating().is_none() {
                    warn!(
                        room = slot.room,
                        presence = format_args!("{:#04x}", slot.presence),
                        "unexpected presence byte"
                    );
                }
                info!(
                    deviceid,
                    room = slot.room,
                    temp = slot.temp,
                    settemp = slot.settemp,
                    mode = slot.mode(),
                    heating = ?slot.heating(),
                    winter = slot.winter(),
                    "room status"
                );
                let room = device.rooms.entry(slot.room).or_default();
                room.apply_slot(slot, now);
                if room.days.len() != 7 || wrapper.cloud_sync_lost {
                    follow_up.push(slot.room);
                }
                samples.push((
                    slot.room,
                    i64::from(slot.temp),
                    i64::from(slot.settemp),
                    slot.heating().map(i64::from),
                ));
            }
        }

        for (room, temp, settemp, heating) in samples {
            let thermostat = format!("{deviceid}/{room}");
            if let Err(e) = self.db.log_temperature(&thermostat, temp, settemp, heating) {
                warn!(thermostat, error = %e, "failed to record room sample");
            }
        }

        // Ack first; program fetches follow.
        self.sender.send_status_ack(addr, deviceid, now).await;

        for room in follow_up {
            // The embedded device mishandles rapid-fire downlinks.
            sleep(Duration::from_secs(1)).await;
            self.sender.send_get_prog(deviceid, room, false, None).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // PING
    // -----------------------------------------------------------------------

    async fn handle_ping(&self, addr: SocketAddr, head: &RequestHead, value: u16) {
        {
            let mut shadow = self.shadow.lock().await;
            shadow.device_entry(head.deviceid, addr).lastseen = unix_now();
        }
        if head.cseq != UNUSED_CSEQ {
            warn!(cseq = head.cseq, "unexpected cseq in PING");
        }
        if head.unk1 != 0x02 {
            warn!(unk1 = head.unk1, "unexpected unk1 in PING");
        }
        // unk2 is usually 4 but drops to 0 when the device lost sync.
        if head.unk2 != 4 && head.unk2 != 0 {
            warn!(unk2 = head.unk2, "unexpected unk2 in PING");
        }
        if value != 1 {
            warn!(value, "unexpected PING value");
        }
        self.sender.send_ping(addr, head.deviceid, true).await;
    }

    // -----------------------------------------------------------------------
    // PROGRAM / PROG_END
    // -----------------------------------------------------------------------

    async fn handle_program(
        &self,
        addr: SocketAddr,
        wrapper: &Wrapper,
        head: &RequestHead,
        room: u32,
        day: u16,
        hours: &[u8; 24],
    ) {
        {
            let mut shadow = self.shadow.lock().await;
            let device = shadow.device_entry(head.deviceid, addr);
            device.lastseen = unix_now();
            device.rooms.entry(room).or_default().days.insert(day, *hours);
        }
        info!(deviceid = head.deviceid, room, day, "program stored");
        if head.cseq != UNUSED_CSEQ {
            warn!(cseq = head.cseq, "unexpected cseq in PROGRAM");
        }
        warn_unks("PROGRAM", head);

        if !wrapper.response {
            self.sender
                .send_program(addr, head.deviceid, room, day, hours, true, false)
                .await;
        }
    }

    async fn handle_prog_end(
        &self,
        addr: SocketAddr,
        wrapper: &Wrapper,
        head: &RequestHead,
        room: u32,
        marker: u16,
    ) {
        {
            let mut shadow = self.shadow.lock().await;
            shadow.device_entry(head.deviceid, addr).lastseen = unix_now();
        }
        if head.cseq != UNUSED_CSEQ {
            warn!(cseq = head.cseq, "unexpected cseq in PROG_END");
        }
        if marker != PROG_END_MARKER {
            warn!(marker, "unexpected PROG_END marker");
        }
        warn_unks("PROG_END", head);

        if !wrapper.response {
            self.sender
                .send_prog_end(addr, head.deviceid, room, true)
                .await;
        }
    }

    // -----------------------------------------------------------------------
    // SWVERSION
    // -----------------------------------------------------------------------

    async fn handle_swversion(
        &self,
        addr: SocketAddr,
        wrapper: &Wrapper,
        head: &RequestHead,
        version: &str,
    ) -> Result<(), HandleError> {
        info!(deviceid = head.deviceid, version, "software version");
        {
            let mut shadow = self.shadow.lock().await;
            let device = shadow.device_entry(head.deviceid, addr);
            device.lastseen = unix_now();
            device.version = Some(version.to_owned());
            if head.cseq != cseq::last_allocated(device) {
                warn!(cseq = head.cseq, "unexpected cseq in SWVERSION");
            }
            if wrapper.response {
                cseq::signal(device, head.cseq, ReplyValue::Text(version.to_owned()));
            }
        }
        warn_unks("SWVERSION", head);

        if !wrapper.response {
            // Device-initiated: reply with the head-only echo.
            self.sender.send_swversion(head.deviceid, true, None).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Correlated replies: GET_PROG, REFRESH, DEVICE_TIME, OUTSIDE_TEMP
    // -----------------------------------------------------------------------

    async fn handle_reply(
        &self,
        addr: SocketAddr,
        wrapper: &Wrapper,
        head: &RequestHead,
        value: ReplyValue,
    ) {
        {
            let mut shadow = self.shadow.lock().await;
            let device = shadow.device_entry(head.deviceid, addr);
            device.lastseen = unix_now();
            let expected = cseq::last_allocated(device);
            if head.cseq != expected {
                warn!(cseq = head.cseq, expected, "reply for a stale sequence number");
            }
            if wrapper.response {
                cseq::signal(device, head.cseq, value);
            }
        }
        warn_unks("reply", head);
    }

    // -----------------------------------------------------------------------
    // SET family
    // -----------------------------------------------------------------------

    async fn handle_set(
        &self,
        addr: SocketAddr,
        wrapper: &Wrapper,
        head: &RequestHead,
        msg_type: MsgType,
        room: u32,
        value: u32,
    ) -> Result<(), HandleError> {
        info!(deviceid = head.deviceid, room, msg = %msg_type, value, "set");
        {
            let mut shadow = self.shadow.lock().await;
            let device = shadow.device_entry(head.deviceid, addr);
            device.lastseen = unix_now();
            device
                .rooms
                .entry(room)
                .or_default()
                .apply_set(msg_type, value);

            if wrapper.response {
                cseq::signal(device, head.cseq, ReplyValue::Scalar(value));
            }
        }
        if head.unk2 != 1 {
            warn!(unk2 = head.unk2, "unexpected unk2 in SET");
        }
        if head.unk1 != 0 && head.unk1 != 2 {
            warn!(unk1 = head.unk1, "unexpected flags byte in SET uplink");
        }

        if !wrapper.response {
            // Device-initiated change: echo it back so the device treats
            // it as acknowledged.
            self.sender
                .send_set(head.deviceid, room, msg_type, value, true, false, None)
                .await?;
        }
        Ok(())
    }
}

fn warn_unks(what: &str, head: &RequestHead) {
    if head.unk1 != 0x02 {
        warn!(unk1 = head.unk1, "unexpected unk1 in {what}");
    }
    if head.unk2 != 1 {
        warn!(unk2 = head.unk2, "unexpected unk2 in {what}");
    }
}
