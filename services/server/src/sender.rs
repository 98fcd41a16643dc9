//! Typed downlink send API.
//!
//! One method per outbound message.  Each builds the body, wraps it with
//! downlink flags, frames it, and transmits to the device's last known
//! address.  Methods that take a `wait` duration park on the sequence
//! coordinator and return the correlated reply, or `None` on timeout.
//!
//! UDP gives no delivery guarantee: transmit failures are logged and
//! dropped, and the device's periodic STATUS drives retransmission.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use besim_proto::msg::{self, PROGRAM_HOURS};
use besim_proto::{Frame, MsgType, Wrapper};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::cseq::{self, ReplyValue};
use crate::shadow::SharedShadow;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("unknown device {0}")]
    UnknownDevice(u32),
    #[error("{0}")]
    Proto(#[from] besim_proto::ProtoError),
}

/// Shared handle for sending downlink messages.  Cheap to clone; the HTTP
/// layer and the dispatcher use the same underlying socket.
#[derive(Clone)]
pub struct Sender {
    socket: Arc<UdpSocket>,
    shadow: SharedShadow,
}

impl Sender {
    pub fn new(socket: Arc<UdpSocket>, shadow: SharedShadow) -> Sender {
        Sender { socket, shadow }
    }

    /// The device's last known transport address.
    pub async fn device_addr(&self, deviceid: u32) -> Result<SocketAddr, SendError> {
        self.shadow
            .lock()
            .await
            .devices
            .get(&deviceid)
            .map(|d| d.addr)
            .ok_or(SendError::UnknownDevice(deviceid))
    }

    async fn transmit(
        &self,
        addr: SocketAddr,
        msg_type: MsgType,
        response: bool,
        write: bool,
        body: &[u8],
    ) {
        let datagram = Frame::downlink(Wrapper::encode_downlink(msg_type, response, write, body))
            .encode();
        debug!(
            %addr,
            msg = %msg_type,
            response,
            write,
            payload = %hex::encode(&datagram),
            "downlink"
        );
        if let Err(e) = self.socket.send_to(&datagram, addr).await {
            warn!(%addr, error = %e, "downlink send failed");
        }
    }

    /// Allocate a sequence number for `deviceid` and resolve its address.
    async fn begin(
        &self,
        deviceid: u32,
        with_reply: bool,
    ) -> Result<(SocketAddr, u8, Option<oneshot::Receiver<ReplyValue>>), SendError> {
        let mut shadow = self.shadow.lock().await;
        let device = shadow
            .devices
            .get_mut(&deviceid)
            .ok_or(SendError::UnknownDevice(deviceid))?;
        let addr = device.addr;
        let (seq, rx) = cseq::alloc(device, with_reply);
        Ok((addr, seq, rx))
    }

    async fn finish(
        &self,
        deviceid: u32,
        seq: u8,
        rx: Option<oneshot::Receiver<ReplyValue>>,
        wait: Option<Duration>,
    ) -> Option<ReplyValue> {
        match (rx, wait) {
            (Some(rx), Some(timeout)) => cseq::wait(&self.shadow, deviceid, seq, rx, timeout).await,
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Unsequenced sends (UNUSED_CSEQ on the wire)
    // -----------------------------------------------------------------------

    pub async fn send_ping(&self, addr: SocketAddr, deviceid: u32, response: bool) {
        self.transmit(addr, MsgType::Ping, response, true, &msg::ping_body(deviceid))
            .await;
    }

    pub async fn send_status_ack(&self, addr: SocketAddr, deviceid: u32, lastseen: u32) {
        self.transmit(
            addr,
            MsgType::Status,
            true,
            true,
            &msg::status_ack_body(deviceid, lastseen),
        )
        .await;
    }

    pub async fn send_program(
        &self,
        addr: SocketAddr,
        deviceid: u32,
        room: u32,
        day: u16,
        hours: &[u8; PROGRAM_HOURS],
        response: bool,
        write: bool,
    ) {
        self.transmit(
            addr,
            MsgType::Program,
            response,
            write,
            &msg::program_body(deviceid, room, day, hours),
        )
        .await;
    }

    pub async fn send_prog_end(&self, addr: SocketAddr, deviceid: u32, room: u32, response: bool) {
        self.transmit(
            addr,
            MsgType::ProgEnd,
            response,
            false,
            &msg::prog_end_body(deviceid, room),
        )
        .await;
    }

    // -----------------------------------------------------------------------
    // Sequenced sends
    // -----------------------------------------------------------------------

    pub async fn send_get_prog(
        &self,
        deviceid: u32,
        room: u32,
        response: bool,
        wait: Option<Duration>,
    ) -> Result<Option<ReplyValue>, SendError> {
        let (addr, seq, rx) = self.begin(deviceid, wait.is_some()).await?;
        self.transmit(
            addr,
            MsgType::GetProg,
            response,
            false,
            &msg::get_prog_body(seq, deviceid, room),
        )
        .await;
        Ok(self.finish(deviceid, seq, rx, wait).await)
    }

    pub async fn send_swversion(
        &self,
        deviceid: u32,
        response: bool,
        wait: Option<Duration>,
    ) -> Result<Option<ReplyValue>, SendError> {
        let (addr, seq, rx) = self.begin(deviceid, wait.is_some()).await?;
        self.transmit(
            addr,
            MsgType::SwVersion,
            response,
            false,
            &msg::swversion_body(seq, deviceid),
        )
        .await;
        Ok(self.finish(deviceid, seq, rx, wait).await)
    }

    pub async fn send_refresh(
        &self,
        deviceid: u32,
        response: bool,
        wait: Option<Duration>,
    ) -> Result<Option<ReplyValue>, SendError> {
        let (addr, seq, rx) = self.begin(deviceid, wait.is_some()).await?;
        self.transmit(
            addr,
            MsgType::Refresh,
            response,
            false,
            &msg::refresh_body(seq, deviceid),
        )
        .await;
        Ok(self.finish(deviceid, seq, rx, wait).await)
    }

    pub async fn send_set(
        &self,
        deviceid: u32,
        room: u32,
        msg_type: MsgType,
        value: u32,
        response: bool,
        write: bool,
        wait: Option<Duration>,
    ) -> Result<Option<ReplyValue>, SendError> {
        let (addr, seq, rx) = self.begin(deviceid, wait.is_some()).await?;
        let body = msg::set_body(seq, deviceid, room, msg_type, value)?;
        self.transmit(addr, msg_type, response, write, &body).await;
        Ok(self.finish(deviceid, seq, rx, wait).await)
    }

    pub async fn send_outside_temp(
        &self,
        deviceid: u32,
        source: u8,
        response: bool,
        write: bool,
        wait: Option<Duration>,
    ) -> Result<Option<ReplyValue>, SendError> {
        let (addr, seq, rx) = self.begin(deviceid, wait.is_some()).await?;
        self.transmit(
            addr,
            MsgType::OutsideTemp,
            response,
            write,
            &msg::outside_temp_body(seq, deviceid, source),
        )
        .await;
        Ok(self.finish(deviceid, seq, rx, wait).await)
    }

    pub async fn send_device_time(
        &self,
        deviceid: u32,
        dst: u8,
        response: bool,
        write: bool,
        wait: Option<Duration>,
    ) -> Result<Option<ReplyValue>, SendError> {
        let (addr, seq, rx) = self.begin(deviceid, wait.is_some()).await?;
        self.transmit(
            addr,
            MsgType::DeviceTime,
            response,
            write,
            &msg::device_time_body(seq, deviceid, dst),
        )
        .await;
        Ok(self.finish(deviceid, seq, rx, wait).await)
    }
}
