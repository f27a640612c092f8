// Remote transports
//
// MessageQ hands a message addressed to another processor to the transport
// registered for that processor. A transport takes ownership on success and
// hands the message back inside `PutError` on failure.

use std::sync::{Arc, Weak};

use ipcmgr::log_debug;

use crate::error::MessageQError;
use crate::message::Message;
use crate::messageq::{MessageQ, PutError};

const LOG_ORIGIN: &str = "transport";

pub trait MessageQTransport: Send + Sync {
    /// Deliver `msg` to the queue named in its header
    fn put(&self, msg: Message) -> Result<(), PutError>;
}

/// Delivers into another in-process MessageQ instance.
///
/// Both sides must bind the same heap objects to the same heap ids, so the
/// receiver can return messages to the sender's heaps.
pub struct LoopbackTransport {
    peer: Weak<MessageQ>,
}

impl LoopbackTransport {
    pub fn new(peer: &Arc<MessageQ>) -> Self {
        Self {
            peer: Arc::downgrade(peer),
        }
    }
}

impl MessageQTransport for LoopbackTransport {
    fn put(&self, msg: Message) -> Result<(), PutError> {
        let Some(peer) = self.peer.upgrade() else {
            log_debug!(LOG_ORIGIN, "loopback peer is gone");
            return Err(PutError::new(MessageQError::InvalidState, msg));
        };
        peer.deliver(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{Heap, HeapMem, HeapRegistry};
    use crate::messageq::{MessageQConfig, MessageQParams};
    use crate::nameserver::NameServerRegistry;

    fn processor(proc_id: u16, heap: &Arc<HeapMem>) -> Arc<MessageQ> {
        let heaps = Arc::new(HeapRegistry::new(4));
        heaps.register(heap.clone(), 0).unwrap();
        let names = Arc::new(NameServerRegistry::new(proc_id));
        MessageQ::setup(proc_id, MessageQConfig::default(), names, heaps).unwrap()
    }

    #[test]
    fn test_loopback_delivers_to_peer() {
        let heap = Arc::new(HeapMem::new(1024));
        let host = processor(0, &heap);
        let dsp = processor(1, &heap);
        assert!(host.register_transport(Arc::new(LoopbackTransport::new(&dsp)), 1, 0));

        let q = dsp.create(None, MessageQParams::default()).unwrap();
        let mut msg = host.alloc(0, 40).unwrap();
        msg.payload_mut().copy_from_slice(b"over-dsp");
        host.put(q.queue_id(), msg).unwrap();

        let got = dsp.get(&q, 0).unwrap();
        assert_eq!(got.payload(), b"over-dsp");
        assert_eq!(got.src_proc(), 0);
        dsp.free(got).unwrap();
        assert_eq!(heap.stats().total_free_size, 1024);
    }

    #[test]
    fn test_dropped_peer_returns_message() {
        let heap = Arc::new(HeapMem::new(1024));
        let host = processor(0, &heap);
        let dsp = processor(1, &heap);
        host.register_transport(Arc::new(LoopbackTransport::new(&dsp)), 1, 0);
        drop(dsp);

        let err = host.put(crate::message::QueueId::new(1, 0), host.alloc(0, 40).unwrap()).unwrap_err();
        assert_eq!(err.error, MessageQError::InvalidState);
        host.free(err.msg).unwrap();
    }
}
