//! In-process wires, for tests and simulations.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::trace;

use crate::wire::{Inbound, InboundTx, Wire, WireError, WireEvent, WireId};

/// One end of an in-memory connection.
pub struct MemoryWire {
    id: WireId,
    local: InboundTx,
    remote: InboundTx,
    remote_id: WireId,
    closed: Arc<AtomicBool>,
}

/// Connect the node listening on `a` with the node listening on `b`.
///
/// Each side is told about its end with a `Connected` event before anything
/// else can arrive on it.
pub fn connect(a: &InboundTx, b: &InboundTx) -> (Arc<MemoryWire>, Arc<MemoryWire>) {
    let closed = Arc::new(AtomicBool::new(false));
    let (a_id, b_id) = (WireId::next(), WireId::next());
    let a_end = Arc::new(MemoryWire {
        id: a_id,
        local: a.clone(),
        remote: b.clone(),
        remote_id: b_id,
        closed: closed.clone(),
    });
    let b_end = Arc::new(MemoryWire {
        id: b_id,
        local: b.clone(),
        remote: a.clone(),
        remote_id: a_id,
        closed,
    });
    announce(&a_end);
    announce(&b_end);
    (a_end, b_end)
}

fn announce(end: &Arc<MemoryWire>) {
    let wire: Arc<dyn Wire> = end.clone();
    let event = Inbound {
        wire: end.id,
        event: WireEvent::Connected(wire),
    };
    // A listener that has already gone away simply never learns of it.
    let _ = end.local.unbounded_send(event);
}

impl MemoryWire {
    fn deliver(&self, event: WireEvent) -> Result<(), WireError> {
        if self.is_destroyed() {
            return Err(WireError::Closed { wire: self.id });
        }
        trace!("{} -> {}: {:?}", self.id, self.remote_id, event);
        self.remote
            .unbounded_send(Inbound {
                wire: self.remote_id,
                event,
            })
            .map_err(|_| {
                self.destroy();
                WireError::Closed { wire: self.id }
            })
    }
}

impl Wire for MemoryWire {
    fn id(&self) -> WireId {
        self.id
    }

    fn send_handshake(&self, payload: Vec<u8>) -> Result<(), WireError> {
        self.deliver(WireEvent::Handshake(payload))
    }

    fn send_extended(&self, payload: Vec<u8>) -> Result<(), WireError> {
        self.deliver(WireEvent::Extended(payload))
    }

    fn destroy(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        trace!("{} destroyed", self.id);
        let _ = self.local.unbounded_send(Inbound {
            wire: self.id,
            event: WireEvent::Closed,
        });
        let _ = self.remote.unbounded_send(Inbound {
            wire: self.remote_id,
            event: WireEvent::Closed,
        });
    }

    fn is_destroyed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
