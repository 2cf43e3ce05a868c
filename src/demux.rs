//! Per-characteristic notification channels.
//!
//! btleplug delivers every subscribed characteristic on one merged stream.
//! The listener task in [`crate::muse_client`] routes each notification into
//! its own bounded channel here, and the synchronizer tasks pull from those
//! channels.

use log::debug;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{
    ELECTRICAL_CHANNELS, ELECTRICAL_CHARACTERISTICS, OPTICAL_CHANNELS, OPTICAL_CHARACTERISTICS,
};
use crate::types::{ChannelId, RawNotification};

/// Default per-channel capacity; about four seconds of optical data.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Sending half: owned by the notification listener.
#[derive(Debug, Clone)]
pub struct ChannelSenders {
    pub optical: [mpsc::Sender<RawNotification>; OPTICAL_CHANNELS],
    pub electrical: [mpsc::Sender<RawNotification>; ELECTRICAL_CHANNELS],
}

/// Receiving half: one raw-buffer source per characteristic.
#[derive(Debug)]
pub struct ChannelReceivers {
    pub optical: [mpsc::Receiver<RawNotification>; OPTICAL_CHANNELS],
    pub electrical: [mpsc::Receiver<RawNotification>; ELECTRICAL_CHANNELS],
}

/// Create the seven bounded notification channels.
pub fn channels(capacity: usize) -> (ChannelSenders, ChannelReceivers) {
    let (o_tx, o_rx): (Vec<_>, Vec<_>) = (0..OPTICAL_CHANNELS)
        .map(|_| mpsc::channel(capacity))
        .unzip();
    let (e_tx, e_rx): (Vec<_>, Vec<_>) = (0..ELECTRICAL_CHANNELS)
        .map(|_| mpsc::channel(capacity))
        .unzip();

    // Lengths are fixed by the ranges above, so the conversions cannot fail.
    let senders = ChannelSenders {
        optical: into_array(o_tx),
        electrical: into_array(e_tx),
    };
    let receivers = ChannelReceivers {
        optical: into_array(o_rx),
        electrical: into_array(e_rx),
    };
    (senders, receivers)
}

fn into_array<T, const N: usize>(v: Vec<T>) -> [T; N] {
    match v.try_into() {
        Ok(a) => a,
        Err(v) => unreachable!("expected {N} channels, built {}", v.len()),
    }
}

/// Map a characteristic UUID to the data channel it carries.
pub fn channel_for(uuid: Uuid) -> Option<ChannelId> {
    if let Some(i) = OPTICAL_CHARACTERISTICS.iter().position(|&u| u == uuid) {
        return Some(ChannelId::Optical(i));
    }
    ELECTRICAL_CHARACTERISTICS
        .iter()
        .position(|&u| u == uuid)
        .map(ChannelId::Electrical)
}

/// What happened to one routed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Delivered(ChannelId),
    /// Not one of the seven data characteristics.
    Ignored,
    /// The receiving side has been dropped.
    Closed(ChannelId),
}

impl ChannelSenders {
    /// Forward one notification to its channel, waiting if the channel is full.
    pub async fn route(&self, uuid: Uuid, payload: Vec<u8>) -> Routed {
        let Some(channel) = channel_for(uuid) else {
            debug!("Ignoring notification from {uuid}");
            return Routed::Ignored;
        };
        let tx = match channel {
            ChannelId::Optical(i) => &self.optical[i],
            ChannelId::Electrical(i) => &self.electrical[i],
        };
        match tx.send(RawNotification { channel, payload }).await {
            Ok(()) => Routed::Delivered(channel),
            Err(_) => Routed::Closed(channel),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CONTROL_CHARACTERISTIC;

    #[test]
    fn test_channel_lookup() {
        assert_eq!(channel_for(OPTICAL_CHARACTERISTICS[2]), Some(ChannelId::Optical(2)));
        assert_eq!(
            channel_for(ELECTRICAL_CHARACTERISTICS[0]),
            Some(ChannelId::Electrical(0))
        );
        assert_eq!(channel_for(CONTROL_CHARACTERISTIC), None);
    }

    #[tokio::test]
    async fn test_route_delivers_to_matching_channel() {
        let (tx, mut rx) = channels(4);

        let routed = tx.route(ELECTRICAL_CHARACTERISTICS[1], vec![0, 1, 2]).await;
        assert_eq!(routed, Routed::Delivered(ChannelId::Electrical(1)));

        let got = rx.electrical[1].recv().await.unwrap();
        assert_eq!(got.channel, ChannelId::Electrical(1));
        assert_eq!(got.payload, vec![0, 1, 2]);
        assert!(rx.electrical[0].try_recv().is_err());
        assert!(rx.optical[0].try_recv().is_err());
    }

    #[tokio::test]
    async fn test_route_ignores_unknown_uuid() {
        let (tx, _rx) = channels(4);
        assert_eq!(tx.route(CONTROL_CHARACTERISTIC, vec![1]).await, Routed::Ignored);
    }

    #[tokio::test]
    async fn test_route_reports_closed_receiver() {
        let (tx, rx) = channels(4);
        drop(rx);
        assert_eq!(
            tx.route(OPTICAL_CHARACTERISTICS[0], vec![0, 0]).await,
            Routed::Closed(ChannelId::Optical(0))
        );
    }
}
