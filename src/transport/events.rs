//! Collaborator callbacks raised by [`UdpClient`](super::udp_client::UdpClient).
//!
//! Callbacks run on the receive-poll or retry task. Implementations must not
//! block; hand work to another task instead. [`ChannelEvents`] does exactly
//! that by forwarding every callback into an unbounded channel.

use crate::core::wire_buffer::WireBuffer;
use tokio::sync::mpsc;
use tracing::trace;

/// Connection lifecycle and inbound data hooks. Every method defaults to a
/// no-op.
pub trait TransportEvents: Send + Sync + 'static {
    /// `ConnectionAccepted` arrived. `client_id` is absent when the server
    /// sent the bare acceptance.
    fn on_connect(&self, _client_id: Option<u32>) {}

    fn on_connect_denied(&self) {}

    /// Connect timed out, or the socket could not be resolved, bound or
    /// written.
    fn on_connection_error(&self) {}

    /// The peer sent `Disconnect` or the keep-alive expired.
    fn on_disconnect(&self) {}

    /// A `Reliable` or `Unreliable` datagram arrived.
    ///
    /// `buffer` starts with the transport tag and its cursor sits on the
    /// application id. The signature, if any, is already stripped.
    fn on_data_received(&self, _buffer: &WireBuffer) {}
}

/// Events that ignore everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvents;

impl TransportEvents for NoopEvents {}

/// Owned form of a [`TransportEvents`] callback.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected { client_id: Option<u32> },
    ConnectDenied,
    ConnectionError,
    Disconnected,
    Data(WireBuffer),
}

/// Forwards every callback into a channel.
#[derive(Debug, Clone)]
pub struct ChannelEvents {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl ChannelEvents {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: TransportEvent) {
        if self.tx.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }
}

impl TransportEvents for ChannelEvents {
    fn on_connect(&self, client_id: Option<u32>) {
        self.forward(TransportEvent::Connected { client_id });
    }

    fn on_connect_denied(&self) {
        self.forward(TransportEvent::ConnectDenied);
    }

    fn on_connection_error(&self) {
        self.forward(TransportEvent::ConnectionError);
    }

    fn on_disconnect(&self) {
        self.forward(TransportEvent::Disconnected);
    }

    fn on_data_received(&self, buffer: &WireBuffer) {
        self.forward(TransportEvent::Data(buffer.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_events_forward_in_order() {
        let (events, mut rx) = ChannelEvents::new();
        events.on_connect(Some(3));
        events.on_data_received(&WireBuffer::from_slice(&[4, 0, 0]));
        events.on_disconnect();

        assert!(matches!(
            rx.try_recv(),
            Ok(TransportEvent::Connected { client_id: Some(3) })
        ));
        match rx.try_recv() {
            Ok(TransportEvent::Data(buf)) => assert_eq!(buf.as_slice(), &[4, 0, 0]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(rx.try_recv(), Ok(TransportEvent::Disconnected)));
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (events, rx) = ChannelEvents::new();
        drop(rx);
        events.on_connection_error();
    }
}
