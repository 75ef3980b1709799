use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;

use log::{debug, warn};

use crate::envelope::Envelope;
use crate::extension::Outlet;
use crate::peer::PeerMetadata;
use crate::schema::Payload;
use crate::wire::WireId;

/// A typed conversation with one authenticated peer: we send `S` and expect
/// `R` back, both inside `data` envelopes.
pub struct Channel<S, R> {
    peer: PeerMetadata,
    outlet: Outlet,
    destroyed: Cell<bool>,
    _marker: PhantomData<fn(S) -> R>,
}

impl<S: Payload, R: Payload> Channel<S, R> {
    pub fn new(peer: PeerMetadata, outlet: Outlet) -> Self {
        Channel {
            peer,
            outlet,
            destroyed: Cell::new(false),
            _marker: PhantomData,
        }
    }

    pub fn peer(&self) -> &PeerMetadata {
        &self.peer
    }

    pub fn wire_id(&self) -> WireId {
        self.outlet.wire_id()
    }

    pub fn send(&self, message: &S) {
        if self.destroyed.get() {
            debug!("not sending to destroyed channel {}", self.peer.id.short());
            return;
        }
        self.outlet.send(&Envelope::data(message));
    }

    /// Extract a message of the expected type from an incoming envelope.
    pub fn receive(&self, envelope: &Envelope) -> Option<R> {
        if self.destroyed.get() {
            return None;
        }
        match envelope {
            Envelope::Data(value) => match R::from_value(value) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!("invalid message from {}: {}", self.peer.id.short(), e);
                    None
                }
            },
            _ => None,
        }
    }

    /// Stop using the channel. The underlying connection stays up; only
    /// this view of it goes quiet.
    pub fn destroy(&self) {
        self.destroyed.set(true);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }
}

impl<S, R> fmt::Debug for Channel<S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("peer", &self.peer.id)
            .field("wire", &self.outlet.wire_id())
            .field("destroyed", &self.destroyed.get())
            .finish()
    }
}
