//! The seam between this crate and the torrent transport.
//!
//! A transport hands every connection to the node as a [`Wire`] and reports
//! what happens on it as [`Inbound`] events on a single channel, so that one
//! task can own all protocol state.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::channel::mpsc;
use snafu::Snafu;

/// Identifies one connection for its whole lifetime. Ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WireId(u64);

impl WireId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        WireId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for WireId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wire#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum WireError {
    #[snafu(display("{} is closed", wire))]
    Closed { wire: WireId },
}

/// One peer-wire connection.
pub trait Wire: Send + Sync {
    fn id(&self) -> WireId;

    /// Send the extended handshake payload.
    fn send_handshake(&self, payload: Vec<u8>) -> Result<(), WireError>;

    /// Send an extension message.
    fn send_extended(&self, payload: Vec<u8>) -> Result<(), WireError>;

    /// Close the connection. Only the first call has any effect.
    fn destroy(&self);

    fn is_destroyed(&self) -> bool;
}

pub enum WireEvent {
    Connected(Arc<dyn Wire>),
    /// The remote's extended handshake.
    Handshake(Vec<u8>),
    Extended(Vec<u8>),
    Closed,
}

impl fmt::Debug for WireEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireEvent::Connected(wire) => write!(f, "Connected({})", wire.id()),
            WireEvent::Handshake(bytes) => write!(f, "Handshake({} bytes)", bytes.len()),
            WireEvent::Extended(bytes) => write!(f, "Extended({} bytes)", bytes.len()),
            WireEvent::Closed => f.write_str("Closed"),
        }
    }
}

#[derive(Debug)]
pub struct Inbound {
    pub wire: WireId,
    pub event: WireEvent,
}

pub type InboundTx = mpsc::UnboundedSender<Inbound>;
pub type InboundRx = mpsc::UnboundedReceiver<Inbound>;

pub fn inbound_channel() -> (InboundTx, InboundRx) {
    mpsc::unbounded()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = WireId::next();
        let b = WireId::next();
        assert_ne!(a, b);
        assert!(a < b);
    }
}
