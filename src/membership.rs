//! Membership transport boundary.
//!
//! The engine reports every change of the active peer view to a
//! [`MembershipTransport`]. Calls are synchronous and made from the engine's
//! own tasks, one peer at a time.

use crate::peer::{PeerKey, PeerRecord};

/// Receiver of membership changes, usually the cluster messaging stack.
///
/// Callbacks run while the engine holds the lock of the affected peer. They
/// may block, but must not call back into the engine for the same peer
/// (for example by reporting it failed from inside `on_peer_added`);
/// defer such calls to another task instead.
pub trait MembershipTransport: Send + Sync + 'static {
    /// A peer entered the active view.
    fn on_peer_added(&self, peer: &PeerRecord);

    /// A peer left the active view.
    fn on_peer_removed(&self, key: &PeerKey);
}

impl<T: MembershipTransport + ?Sized> MembershipTransport for std::sync::Arc<T> {
    fn on_peer_added(&self, peer: &PeerRecord) {
        (**self).on_peer_added(peer)
    }

    fn on_peer_removed(&self, key: &PeerKey) {
        (**self).on_peer_removed(key)
    }
}

/// Membership change delivered through a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    /// A peer entered the active view.
    PeerAdded(PeerRecord),
    /// A peer left the active view.
    PeerRemoved(PeerKey),
}

impl MembershipEvent {
    /// Key of the peer this event is about.
    pub fn key(&self) -> PeerKey {
        match self {
            MembershipEvent::PeerAdded(record) => record.key(),
            MembershipEvent::PeerRemoved(key) => key.clone(),
        }
    }
}

/// Transport that forwards changes into an unbounded channel.
///
/// Useful when the consumer is async: the engine never waits on the
/// receiver, and events arrive in the order they were issued.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: async_channel::Sender<MembershipEvent>,
}

impl ChannelTransport {
    /// Create a transport and the receiver for its events.
    pub fn new() -> (Self, async_channel::Receiver<MembershipEvent>) {
        let (tx, rx) = async_channel::unbounded();
        (Self { tx }, rx)
    }

    fn forward(&self, event: MembershipEvent) {
        if self.tx.try_send(event).is_err() {
            tracing::trace!("membership receiver dropped, event discarded");
        }
    }
}

impl MembershipTransport for ChannelTransport {
    fn on_peer_added(&self, peer: &PeerRecord) {
        self.forward(MembershipEvent::PeerAdded(peer.clone()));
    }

    fn on_peer_removed(&self, key: &PeerKey) {
        self.forward(MembershipEvent::PeerRemoved(key.clone()));
    }
}

/// Transport that ignores every change.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransport;

impl MembershipTransport for NoopTransport {
    fn on_peer_added(&self, _peer: &PeerRecord) {}

    fn on_peer_removed(&self, _key: &PeerKey) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_transport_preserves_order() {
        let (transport, rx) = ChannelTransport::new();
        let record = PeerRecord::new("10.0.0.1", 7800);

        transport.on_peer_added(&record);
        transport.on_peer_removed(&record.key());

        assert_eq!(rx.recv().await.unwrap(), MembershipEvent::PeerAdded(record.clone()));
        assert_eq!(rx.recv().await.unwrap(), MembershipEvent::PeerRemoved(record.key()));
    }

    #[test]
    fn test_channel_transport_tolerates_dropped_receiver() {
        let (transport, rx) = ChannelTransport::new();
        drop(rx);
        transport.on_peer_removed(&PeerKey::from("10.0.0.1:7800"));
    }

    #[test]
    fn test_event_key() {
        let record = PeerRecord::new("10.0.0.1", 7800);
        assert_eq!(MembershipEvent::PeerAdded(record.clone()).key(), record.key());
    }
}
