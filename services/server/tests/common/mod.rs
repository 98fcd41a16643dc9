//! Shared harness for integration tests: a dispatcher on an ephemeral UDP
//! port, a throwaway SQLite database, and a fake-device socket.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use server::{Db, Dispatcher, Sender, SharedShadow};
use tokio::net::UdpSocket;

pub struct Harness {
    pub shadow: SharedShadow,
    pub sender: Sender,
    pub db: Db,
    pub server_addr: SocketAddr,
    pub device: Arc<UdpSocket>,
    _tmp: tempfile::TempDir,
}

pub async fn start() -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let db = Db::open(&tmp.path().join("besim.db")).unwrap();

    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let server_addr = socket.local_addr().unwrap();
    let shadow = SharedShadow::default();
    let sender = Sender::new(socket.clone(), shadow.clone());
    tokio::spawn(Dispatcher::new(socket, shadow.clone(), sender.clone(), db.clone()).run());

    let device = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());

    Harness {
        shadow,
        sender,
        db,
        server_addr,
        device,
        _tmp: tmp,
    }
}

impl Harness {
    pub async fn send(&self, datagram: &[u8]) {
        self.device
            .send_to(datagram, self.server_addr)
            .await
            .unwrap();
    }

    /// Receive one downlink datagram, or `None` after `timeout`.
    pub async fn recv(&self, timeout: Duration) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; 4096];
        match tokio::time::timeout(timeout, self.device.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => Some(buf[..len].to_vec()),
            _ => None,
        }
    }

    pub fn device_addr(&self) -> SocketAddr {
        self.device.local_addr().unwrap()
    }
}
