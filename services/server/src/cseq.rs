//! Control-plane sequence coordination.
//!
//! Downlink requests carry a per-device sequence number in `0..=MAX_CSEQ`;
//! the device echoes it in its reply.  A blocking send registers a oneshot
//! channel under the allocated number; the dispatcher completes it when the
//! correlated uplink arrives.  `UNUSED_CSEQ` goes on the wire for messages
//! that expect no reply.

use std::time::Duration;

use besim_proto::MAX_CSEQ;
use tokio::sync::oneshot;

use crate::shadow::{Device, SharedShadow};

/// Value delivered to a parked caller by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyValue {
    Scalar(u32),
    Text(String),
}

impl ReplyValue {
    pub fn as_scalar(&self) -> Option<u32> {
        match self {
            ReplyValue::Scalar(v) => Some(*v),
            ReplyValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ReplyValue::Text(s) => Some(s),
            ReplyValue::Scalar(_) => None,
        }
    }
}

/// Allocate the next sequence number for `device`, returning the value to
/// put on the wire.  Evicts any stale pending entry under that number, so
/// at most one request is ever in flight per slot.  When `with_reply` is
/// set, a oneshot receiver for the correlated reply is returned alongside.
pub fn alloc(
    device: &mut Device,
    with_reply: bool,
) -> (u8, Option<oneshot::Receiver<ReplyValue>>) {
    let current = device.cseq;
    device.cseq = if current >= MAX_CSEQ { 0 } else { current + 1 };

    device.pending.remove(&current);
    if with_reply {
        let (tx, rx) = oneshot::channel();
        device.pending.insert(current, tx);
        (current, Some(rx))
    } else {
        (current, None)
    }
}

/// The sequence number most recently placed on the wire for `device`.
pub fn last_allocated(device: &Device) -> u8 {
    ((u16::from(device.cseq) + u16::from(MAX_CSEQ)) % (u16::from(MAX_CSEQ) + 1)) as u8
}

/// Complete the pending request under `cseq`, if any.  Returns whether a
/// waiter received the value.
pub fn signal(device: &mut Device, cseq: u8, value: ReplyValue) -> bool {
    match device.pending.remove(&cseq) {
        Some(tx) => tx.send(value).is_ok(),
        None => false,
    }
}

/// Park until the dispatcher signals `cseq` for `deviceid`, or until
/// `timeout` expires.  On timeout the pending entry is pruned and `None`
/// returned.
pub async fn wait(
    shadow: &SharedShadow,
    deviceid: u32,
    cseq: u8,
    rx: oneshot::Receiver<ReplyValue>,
    timeout: Duration,
) -> Option<ReplyValue> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(value)) => Some(value),
        _ => {
            if let Some(device) = shadow.lock().await.devices.get_mut(&deviceid) {
                device.pending.remove(&cseq);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Arc;

    use besim_proto::UNUSED_CSEQ;
    use tokio::sync::Mutex;

    use crate::shadow::Shadow;

    fn device() -> Device {
        let addr: SocketAddr = "10.0.0.1:6199".parse().unwrap();
        Device::new(addr)
    }

    #[test]
    fn allocation_cycles_without_repeating() {
        let mut dev = device();
        let mut seen = Vec::new();
        for _ in 0..=u16::from(MAX_CSEQ) {
            let (cseq, _) = alloc(&mut dev, false);
            assert!(cseq <= MAX_CSEQ);
            assert_ne!(cseq, UNUSED_CSEQ);
            seen.push(cseq);
        }
        // 0xFE allocations: the full cycle, no repetition.
        let mut sorted = seen.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), seen.len());
        // The next allocation wraps back to the first value.
        let (cseq, _) = alloc(&mut dev, false);
        assert_eq!(cseq, seen[0]);
    }

    #[test]
    fn last_allocated_tracks_the_wire_value() {
        let mut dev = device();
        for _ in 0..1000 {
            let (cseq, _) = alloc(&mut dev, false);
            assert_eq!(last_allocated(&dev), cseq);
        }
    }

    #[test]
    fn alloc_evicts_stale_entry_under_reused_slot() {
        let mut dev = device();
        let (first, rx) = alloc(&mut dev, true);
        assert!(dev.pending.contains_key(&first));
        drop(rx);

        // Walk the counter all the way around to the same slot.
        for _ in 0..u16::from(MAX_CSEQ) {
            alloc(&mut dev, false);
        }
        let (again, _) = alloc(&mut dev, true);
        assert_eq!(again, first);
        assert_eq!(dev.pending.len(), 1);
    }

    #[test]
    fn pending_table_stays_bounded() {
        let mut dev = device();
        for _ in 0..10_000 {
            let (_, rx) = alloc(&mut dev, true);
            drop(rx);
        }
        assert!(dev.pending.len() <= usize::from(MAX_CSEQ) + 1);
        assert!(dev.pending.keys().all(|&k| k <= MAX_CSEQ));
    }

    #[tokio::test]
    async fn signal_wakes_the_waiter() {
        let shadow: SharedShadow = Arc::new(Mutex::new(Shadow::default()));
        let addr: SocketAddr = "10.0.0.1:6199".parse().unwrap();
        let (cseq, rx) = {
            let mut guard = shadow.lock().await;
            let dev = guard.device_entry(7, addr);
            alloc(dev, true)
        };
        let rx = rx.unwrap();

        let waiter = tokio::spawn({
            let shadow = shadow.clone();
            async move { wait(&shadow, 7, cseq, rx, Duration::from_secs(5)).await }
        });

        {
            let mut guard = shadow.lock().await;
            let dev = guard.devices.get_mut(&7).unwrap();
            assert!(signal(dev, cseq, ReplyValue::Scalar(215)));
        }
        assert_eq!(waiter.await.unwrap(), Some(ReplyValue::Scalar(215)));
    }

    #[tokio::test]
    async fn timeout_prunes_the_pending_entry() {
        let shadow: SharedShadow = Arc::new(Mutex::new(Shadow::default()));
        let addr: SocketAddr = "10.0.0.1:6199".parse().unwrap();
        let (cseq, rx) = {
            let mut guard = shadow.lock().await;
            let dev = guard.device_entry(7, addr);
            alloc(dev, true)
        };

        let got = wait(&shadow, 7, cseq, rx.unwrap(), Duration::from_millis(20)).await;
        assert_eq!(got, None);
        let guard = shadow.lock().await;
        assert!(guard.devices[&7].pending.is_empty());
    }

    #[test]
    fn signal_without_waiter_is_a_no_op() {
        let mut dev = device();
        assert!(!signal(&mut dev, 5, ReplyValue::Scalar(1)));
    }
}
