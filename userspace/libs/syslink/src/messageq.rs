// MessageQ
//
// Named single-reader, multiple-writer mailboxes carrying variable-length
// messages. Queues are registered by name in the "MessageQ" NameServer
// table; writers resolve the name once with `open` and `put` by queue id.
//
// Key responsibilities:
// - Create/delete locally owned queues, bounded by `max_runtime_entries`
// - Allocate messages from registered heaps and return them on `free`
// - Route `put` to a local queue or to the transport for the destination
//   processor, then signal the queue's synchronizer
// - Blocking `get` with timeout and a one-shot `unblock`
//
// Design principles:
// - Each queue has two gated lists; HIGH/RESERVED are appended to the high
//   list, URGENT is prepended to it, NORMAL goes to the normal list
// - `get` drains high before normal
// - Ownership of a message moves into the queue on a successful `put` and
//   back to the caller on failure (`PutError` carries it)
//
// Correctness and safety notes:
// - `put` signals on every enqueue; the reader drains before waiting again
// - Once unblocked a queue reports `Unblocked` for every later `get`,
//   whatever it still holds
// - Teardown against in-flight writers is the caller's responsibility

use core::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ipcmgr::{log_debug, log_info, log_warn};
use spin::Mutex;

use crate::error::{HeapError, MessageQError};
use crate::heap::{Heap, HeapId, HeapRegistry};
use crate::list::List;
use crate::message::{Message, MsgHeader, Priority, QueueId, Storage, HEADER_SIZE, INVALID_QUEUE_INDEX, STATIC_MSG};
use crate::nameserver::{EntryHandle, NameServer, NameServerParams, NameServerRegistry};
use crate::sync::{SemaphoreSync, Synchronizer, WaitStatus, FOREVER};
use crate::transport::MessageQTransport;
use crate::ProcId;

const LOG_ORIGIN: &str = "messageq";

/// NameServer table holding queue names
pub const NAMESERVER_TABLE: &str = "MessageQ";

/// Transport slots per remote processor (normal, high)
pub const NUM_TRANSPORT_PRIORITIES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageQConfig {
    /// Trace every message regardless of its trace bit
    pub trace_flag: bool,
    pub num_heaps: u16,
    pub max_runtime_entries: u32,
    pub max_name_len: u32,
}

impl Default for MessageQConfig {
    fn default() -> Self {
        Self {
            trace_flag: false,
            num_heaps: 8,
            max_runtime_entries: 32,
            max_name_len: 32,
        }
    }
}

#[derive(Clone, Default)]
pub struct MessageQParams {
    /// Defaults to a `SemaphoreSync`
    pub synchronizer: Option<Arc<dyn Synchronizer>>,
}

/// A failed `put`; the message is handed back to the caller
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct PutError {
    pub error: MessageQError,
    pub msg: Message,
}

impl PutError {
    pub fn new(error: MessageQError, msg: Message) -> Self {
        Self { error, msg }
    }
}

struct QueueObject {
    id: QueueId,
    name: Option<String>,
    entry: Option<EntryHandle>,
    sync: Arc<dyn Synchronizer>,
    normal: List<Message>,
    high: List<Message>,
    unblocked: AtomicBool,
}

impl QueueObject {
    fn enqueue(&self, msg: Message) {
        match msg.priority() {
            Priority::Normal => {
                self.normal.put(msg);
            }
            Priority::High | Priority::Reserved => {
                self.high.put(msg);
            }
            Priority::Urgent => {
                self.high.put_head(msg);
            }
        }
        self.sync.signal();
    }

    fn dequeue(&self) -> Option<Message> {
        self.high.get().or_else(|| self.normal.get())
    }
}

/// Owner handle of a locally created queue
pub struct MessageQHandle {
    queue: Arc<QueueObject>,
}

impl MessageQHandle {
    pub fn queue_id(&self) -> QueueId {
        self.queue.id
    }

    pub fn name(&self) -> Option<&str> {
        self.queue.name.as_deref()
    }
}

type TransportSlots = [Option<Arc<dyn MessageQTransport>>; NUM_TRANSPORT_PRIORITIES];

pub struct MessageQ {
    proc_id: ProcId,
    config: MessageQConfig,
    registry: Arc<NameServerRegistry>,
    name_server: Arc<NameServer>,
    heaps: Arc<HeapRegistry>,
    queues: Mutex<Vec<Option<Arc<QueueObject>>>>,
    transports: Mutex<BTreeMap<ProcId, TransportSlots>>,
    seq: AtomicU16,
    destroyed: AtomicBool,
}

impl MessageQ {
    /// Bring the module up on `proc_id`, creating its NameServer table
    pub fn setup(
        proc_id: ProcId,
        config: MessageQConfig,
        registry: Arc<NameServerRegistry>,
        heaps: Arc<HeapRegistry>,
    ) -> Result<Arc<Self>, MessageQError> {
        if config.max_runtime_entries == 0 || config.max_runtime_entries >= INVALID_QUEUE_INDEX as u32 {
            return Err(MessageQError::InvalidArgument);
        }

        let params = NameServerParams {
            max_runtime_entries: config.max_runtime_entries,
            max_name_len: config.max_name_len,
            max_value_len: 4,
            check_existing: true,
            table_heap: None,
        };
        let name_server = registry.create(NAMESERVER_TABLE, params)?;

        log_info!(
            LOG_ORIGIN,
            "MessageQ up on proc {} ({} queues, {} heaps)",
            proc_id,
            config.max_runtime_entries,
            heaps.capacity()
        );

        Ok(Arc::new(Self {
            proc_id,
            config,
            registry,
            name_server,
            heaps,
            queues: Mutex::new(Vec::new()),
            transports: Mutex::new(BTreeMap::new()),
            seq: AtomicU16::new(0),
            destroyed: AtomicBool::new(false),
        }))
    }

    /// Tear the module down; refused while queues are still live
    pub fn destroy(&self) -> Result<(), MessageQError> {
        self.check_live()?;
        let live = self.queue_count();
        if live > 0 {
            log_warn!(LOG_ORIGIN, "destroy refused: {} queues still live", live);
            return Err(MessageQError::InvalidState);
        }

        self.destroyed.store(true, Ordering::Release);
        self.transports.lock().clear();
        self.registry.delete(&self.name_server)?;
        log_info!(LOG_ORIGIN, "MessageQ on proc {} destroyed", self.proc_id);
        Ok(())
    }

    pub fn proc_id(&self) -> ProcId {
        self.proc_id
    }

    pub fn config(&self) -> &MessageQConfig {
        &self.config
    }

    pub fn heaps(&self) -> &Arc<HeapRegistry> {
        &self.heaps
    }

    /// Number of locally owned queues
    pub fn queue_count(&self) -> usize {
        self.queues.lock().iter().filter(|slot| slot.is_some()).count()
    }

    fn check_live(&self) -> Result<(), MessageQError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(MessageQError::InvalidState);
        }
        Ok(())
    }

    /// Create a queue owned by this processor.
    ///
    /// A named queue is registered in the NameServer table so `open` can
    /// find it; an anonymous one is reachable only through its id.
    pub fn create(&self, name: Option<&str>, params: MessageQParams) -> Result<MessageQHandle, MessageQError> {
        self.check_live()?;
        if let Some(name) = name {
            if name.is_empty() || name.len() > self.config.max_name_len as usize {
                return Err(MessageQError::InvalidArgument);
            }
        }

        let mut queues = self.queues.lock();
        let index = match queues.iter().position(Option::is_none) {
            Some(index) => index,
            None if queues.len() < self.config.max_runtime_entries as usize => {
                queues.push(None);
                queues.len() - 1
            }
            None => {
                log_warn!(LOG_ORIGIN, "queue table full ({} entries)", queues.len());
                return Err(MessageQError::MaxReached);
            }
        };

        let id = QueueId::new(self.proc_id, index as u16);
        let entry = match name {
            Some(name) => Some(self.name_server.add_uint32(name, id.raw())?),
            None => None,
        };

        let queue = Arc::new(QueueObject {
            id,
            name: name.map(str::to_owned),
            entry,
            sync: params.synchronizer.unwrap_or_else(|| Arc::new(SemaphoreSync::new())),
            normal: List::new(),
            high: List::new(),
            unblocked: AtomicBool::new(false),
        });
        queues[index] = Some(queue.clone());

        log_debug!(LOG_ORIGIN, "created queue {:?} as {}", name, id);
        Ok(MessageQHandle { queue })
    }

    /// Delete an owned queue; pending heap messages go back to their heaps
    pub fn delete(&self, handle: MessageQHandle) -> Result<(), MessageQError> {
        let queue = handle.queue;
        {
            let mut queues = self.queues.lock();
            let slot = queues
                .get_mut(queue.id.index() as usize)
                .ok_or(MessageQError::NotFound)?;
            if !matches!(slot, Some(existing) if Arc::ptr_eq(existing, &queue)) {
                return Err(MessageQError::NotOwner);
            }
            *slot = None;
        }

        if let Some(entry) = queue.entry {
            if let Err(err) = self.name_server.remove_entry(entry) {
                log_warn!(LOG_ORIGIN, "queue {}: name entry already gone ({})", queue.id, err);
            }
        }

        let mut dropped = 0;
        while let Some(msg) = queue.dequeue() {
            dropped += 1;
            if let Err(err) = self.free(msg) {
                log_debug!(LOG_ORIGIN, "queue {}: pending message not freed ({})", queue.id, err);
            }
        }

        log_debug!(LOG_ORIGIN, "deleted queue {} ({} pending messages)", queue.id, dropped);
        Ok(())
    }

    /// Resolve a queue name, local table first, then remote processors
    pub fn open(&self, name: &str) -> Result<QueueId, MessageQError> {
        self.check_live()?;
        let raw = self.name_server.get_uint32(name, None)?;
        Ok(QueueId::from_raw(raw))
    }

    /// Release an id obtained from `open`; nothing is held, so this only logs
    pub fn close(&self, queue_id: QueueId) {
        log_debug!(LOG_ORIGIN, "closed {}", queue_id);
    }

    /// Allocate a `size`-byte message (header included) from `heap_id`
    pub fn alloc(&self, heap_id: HeapId, size: usize) -> Result<Message, MessageQError> {
        self.check_live()?;
        if size < HEADER_SIZE || size > u32::MAX as usize {
            return Err(MessageQError::InvalidArgument);
        }

        let heap = self.heaps.resolve(heap_id)?;
        let block = heap.alloc(size).ok_or(MessageQError::Memory)?;

        let mut msg = Message::from_heap(MsgHeader::new(size as u32, heap_id, self.proc_id), block);
        if self.config.trace_flag {
            msg.set_trace(true);
        }
        Ok(msg)
    }

    /// Wrap caller-owned storage as a message that `free` will refuse
    pub fn static_msg_init(&self, storage: Vec<u8>) -> Result<Message, MessageQError> {
        if storage.len() < HEADER_SIZE || storage.len() > u32::MAX as usize {
            return Err(MessageQError::InvalidArgument);
        }
        let header = MsgHeader::new(storage.len() as u32, STATIC_MSG, self.proc_id);
        Ok(Message::from_static(header, storage))
    }

    /// Return a message to the heap it was allocated from
    pub fn free(&self, msg: Message) -> Result<(), MessageQError> {
        if msg.is_static() {
            return Err(MessageQError::CannotFreeStaticMessage);
        }

        let heap_id = msg.heap_id();
        let heap = self.heaps.resolve(heap_id).map_err(|err| match err {
            HeapError::NotFound => MessageQError::UnregisteredHeapId,
            other => other.into(),
        })?;

        if let Storage::Heap(block) = msg.into_storage() {
            heap.free(block);
        }
        Ok(())
    }

    /// Queue `msg` on `queue_id`.
    ///
    /// Local queues are filled directly; other processors are reached
    /// through their registered transport.
    pub fn put(&self, queue_id: QueueId, mut msg: Message) -> Result<(), PutError> {
        if let Err(err) = self.check_live() {
            return Err(PutError::new(err, msg));
        }

        let header = msg.header_mut();
        header.dst_id = queue_id.index();
        header.dst_proc = queue_id.proc_id();
        header.seq_num = self.seq.fetch_add(1, Ordering::Relaxed);

        if queue_id.proc_id() != self.proc_id {
            let Some(transport) = self.transport_for(queue_id.proc_id(), msg.priority()) else {
                log_debug!(LOG_ORIGIN, "no transport to proc {}", queue_id.proc_id());
                return Err(PutError::new(MessageQError::InvalidProcId, msg));
            };
            self.trace("put (remote)", &msg);
            return transport.put(msg);
        }

        self.deliver(msg)
    }

    /// Enqueue a message addressed to a local queue.
    ///
    /// Transports call this on the receiving side; the destination is read
    /// from the message header.
    pub fn deliver(&self, msg: Message) -> Result<(), PutError> {
        let Some(dst) = msg.dst_queue() else {
            return Err(PutError::new(MessageQError::InvalidMessage, msg));
        };
        if dst.proc_id() != self.proc_id {
            return Err(PutError::new(MessageQError::InvalidProcId, msg));
        }

        let queue = self.queues.lock().get(dst.index() as usize).cloned().flatten();
        let Some(queue) = queue else {
            return Err(PutError::new(MessageQError::NotFound, msg));
        };

        self.trace("put", &msg);
        queue.enqueue(msg);
        Ok(())
    }

    fn transport_for(&self, proc_id: ProcId, priority: Priority) -> Option<Arc<dyn MessageQTransport>> {
        let transports = self.transports.lock();
        let slots = transports.get(&proc_id)?;
        let high = match priority {
            Priority::Normal => None,
            _ => slots[1].clone(),
        };
        high.or_else(|| slots[0].clone())
    }

    /// Wait up to `timeout_ms` (`FOREVER` for no limit) for a message
    pub fn get(&self, handle: &MessageQHandle, timeout_ms: u32) -> Result<Message, MessageQError> {
        let queue = &handle.queue;
        let deadline = (timeout_ms != FOREVER).then(|| Instant::now() + Duration::from_millis(timeout_ms as u64));

        loop {
            if queue.unblocked.load(Ordering::Acquire) {
                return Err(MessageQError::Unblocked);
            }
            if let Some(msg) = queue.dequeue() {
                self.trace("get", &msg);
                return Ok(msg);
            }

            let wait_ms = match deadline {
                None => FOREVER,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(MessageQError::Timeout);
                    }
                    let remaining = (deadline - now).as_millis().saturating_add(1);
                    remaining.min((FOREVER - 1) as u128) as u32
                }
            };

            if queue.sync.wait(wait_ms) == WaitStatus::Unblocked {
                return Err(MessageQError::Unblocked);
            }
        }
    }

    /// Messages currently pending on `handle`
    pub fn count(&self, handle: &MessageQHandle) -> usize {
        let high = handle.queue.high.lock();
        let normal = handle.queue.normal.lock();
        high.len() + normal.len()
    }

    /// Permanently wake and disable every `get` on `handle`
    pub fn unblock(&self, handle: &MessageQHandle) {
        handle.queue.unblocked.store(true, Ordering::Release);
        handle.queue.sync.unblock();
        log_debug!(LOG_ORIGIN, "queue {} unblocked", handle.queue.id);
    }

    /// Embed `handle`'s id in `msg` as its reply queue
    pub fn set_reply_queue(&self, handle: &MessageQHandle, msg: &mut Message) {
        msg.set_reply_queue(handle.queue.id);
    }

    /// Bind a heap; `Ok(false)` if `heap_id` is already bound
    pub fn register_heap(&self, heap: Arc<dyn Heap>, heap_id: HeapId) -> Result<bool, MessageQError> {
        Ok(self.heaps.register(heap, heap_id)?)
    }

    pub fn unregister_heap(&self, heap_id: HeapId) -> Result<(), MessageQError> {
        Ok(self.heaps.unregister(heap_id)?)
    }

    /// Route messages for `proc_id` at `priority` (0 normal, 1 high)
    /// through `transport`. Returns `false` if the slot is taken or invalid.
    pub fn register_transport(&self, transport: Arc<dyn MessageQTransport>, proc_id: ProcId, priority: usize) -> bool {
        if proc_id == self.proc_id || priority >= NUM_TRANSPORT_PRIORITIES {
            return false;
        }

        let mut transports = self.transports.lock();
        let slot = &mut transports.entry(proc_id).or_default()[priority];
        if slot.is_some() {
            return false;
        }
        *slot = Some(transport);
        log_debug!(LOG_ORIGIN, "transport to proc {} registered at priority {}", proc_id, priority);
        true
    }

    pub fn unregister_transport(&self, proc_id: ProcId, priority: usize) {
        let mut transports = self.transports.lock();
        if let Some(slots) = transports.get_mut(&proc_id) {
            if let Some(slot) = slots.get_mut(priority) {
                *slot = None;
            }
            if slots.iter().all(Option::is_none) {
                transports.remove(&proc_id);
            }
        }
    }

    fn trace(&self, what: &str, msg: &Message) {
        if !(self.config.trace_flag || msg.is_traced()) {
            return;
        }
        if log::log_enabled!(target: LOG_ORIGIN, log::Level::Info) {
            log_info!(
                LOG_ORIGIN,
                "{}: seq {} src {} dst {:?} id {:#x} size {}",
                what,
                msg.seq_num(),
                msg.src_proc(),
                msg.dst_queue(),
                msg.msg_id(),
                msg.size()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapMem;

    fn setup(config: MessageQConfig) -> (Arc<MessageQ>, Arc<HeapMem>) {
        let registry = Arc::new(NameServerRegistry::new(0));
        let heaps = Arc::new(HeapRegistry::new(config.num_heaps));
        let mq = MessageQ::setup(0, config, registry, heaps).unwrap();
        let heap = Arc::new(HeapMem::new(4096));
        assert_eq!(mq.register_heap(heap.clone(), 0), Ok(true));
        (mq, heap)
    }

    #[test]
    fn test_create_open_delete() {
        let (mq, _) = setup(MessageQConfig::default());
        let q = mq.create(Some("srv"), MessageQParams::default()).unwrap();
        assert_eq!(mq.open("srv"), Ok(q.queue_id()));
        assert_eq!(q.name(), Some("srv"));
        assert!(mq.create(Some("srv"), MessageQParams::default()).is_err());
        mq.close(q.queue_id());

        mq.delete(q).unwrap();
        assert_eq!(mq.open("srv"), Err(MessageQError::NotFound));
        mq.destroy().unwrap();
        assert!(mq.create(None, MessageQParams::default()).is_err());
    }

    #[test]
    fn test_queue_table_is_bounded() {
        let (mq, _) = setup(MessageQConfig {
            max_runtime_entries: 2,
            ..Default::default()
        });
        let a = mq.create(None, MessageQParams::default()).unwrap();
        let _b = mq.create(None, MessageQParams::default()).unwrap();
        assert!(matches!(mq.create(None, MessageQParams::default()), Err(MessageQError::MaxReached)));

        let freed = a.queue_id();
        mq.delete(a).unwrap();
        let c = mq.create(None, MessageQParams::default()).unwrap();
        assert_eq!(c.queue_id(), freed);
    }

    #[test]
    fn test_destroy_refused_while_queues_live() {
        let (mq, _) = setup(MessageQConfig::default());
        let q = mq.create(None, MessageQParams::default()).unwrap();
        assert_eq!(mq.destroy(), Err(MessageQError::InvalidState));
        mq.delete(q).unwrap();
        assert_eq!(mq.destroy(), Ok(()));
    }

    #[test]
    fn test_alloc_validation() {
        let (mq, _) = setup(MessageQConfig::default());
        assert!(matches!(mq.alloc(0, HEADER_SIZE - 1), Err(MessageQError::InvalidArgument)));
        assert!(matches!(mq.alloc(1, 64), Err(MessageQError::InvalidHeapId)));
        assert!(matches!(mq.alloc(99, 64), Err(MessageQError::InvalidHeapId)));
        assert!(matches!(mq.alloc(0, 8192), Err(MessageQError::Memory)));

        let msg = mq.alloc(0, 64).unwrap();
        assert_eq!(msg.size(), 64);
        assert_eq!(msg.heap_id(), 0);
        assert_eq!(msg.src_proc(), 0);
        assert_eq!(msg.payload().len(), 64 - HEADER_SIZE);
        mq.free(msg).unwrap();
    }

    #[test]
    fn test_free_after_unregister_reports_heap() {
        let (mq, _) = setup(MessageQConfig::default());
        let msg = mq.alloc(0, 64).unwrap();
        mq.unregister_heap(0).unwrap();
        assert_eq!(mq.free(msg), Err(MessageQError::UnregisteredHeapId));
    }

    #[test]
    fn test_static_message_guard() {
        let (mq, heap) = setup(MessageQConfig::default());
        let before = heap.stats();
        let msg = mq.static_msg_init(vec![0u8; 48]).unwrap();
        assert_eq!(msg.heap_id(), STATIC_MSG);
        assert_eq!(mq.free(msg), Err(MessageQError::CannotFreeStaticMessage));
        assert_eq!(heap.stats(), before);
        assert!(mq.static_msg_init(vec![0u8; 4]).is_err());
    }

    #[test]
    fn test_priority_routing() {
        let (mq, _) = setup(MessageQConfig::default());
        let q = mq.create(None, MessageQParams::default()).unwrap();

        let sends = [
            (1, Priority::Normal),
            (2, Priority::High),
            (3, Priority::Urgent),
            (4, Priority::Normal),
            (5, Priority::Reserved),
        ];
        for (id, priority) in sends {
            let mut msg = mq.alloc(0, HEADER_SIZE).unwrap();
            msg.set_msg_id(id);
            msg.set_priority(priority);
            mq.put(q.queue_id(), msg).unwrap();
        }
        assert_eq!(mq.count(&q), 5);

        let order: Vec<u16> = (0..5).map(|_| mq.get(&q, 0).unwrap().msg_id()).collect();
        assert_eq!(order, vec![3, 2, 5, 1, 4]);
        assert!(matches!(mq.get(&q, 0), Err(MessageQError::Timeout)));
    }

    #[test]
    fn test_put_stamps_destination_and_sequence() {
        let (mq, _) = setup(MessageQConfig::default());
        let q = mq.create(None, MessageQParams::default()).unwrap();
        for _ in 0..2 {
            mq.put(q.queue_id(), mq.alloc(0, HEADER_SIZE).unwrap()).unwrap();
        }
        let first = mq.get(&q, 0).unwrap();
        let second = mq.get(&q, 0).unwrap();
        assert_eq!(first.dst_queue(), Some(q.queue_id()));
        assert_eq!(second.seq_num(), first.seq_num().wrapping_add(1));
    }

    #[test]
    fn test_put_failures_return_message() {
        let (mq, heap) = setup(MessageQConfig::default());
        let msg = mq.alloc(0, 40).unwrap();

        let err = mq.put(QueueId::new(0, 7), msg).unwrap_err();
        assert_eq!(err.error, MessageQError::NotFound);
        let err = mq.put(QueueId::new(3, 0), err.msg).unwrap_err();
        assert_eq!(err.error, MessageQError::InvalidProcId);

        mq.free(err.msg).unwrap();
        assert_eq!(heap.stats().total_free_size, 4096);
    }

    #[test]
    fn test_delete_returns_pending_messages() {
        let (mq, heap) = setup(MessageQConfig::default());
        let q = mq.create(Some("drain"), MessageQParams::default()).unwrap();
        for _ in 0..3 {
            mq.put(q.queue_id(), mq.alloc(0, 100).unwrap()).unwrap();
        }
        assert!(heap.stats().total_free_size < 4096);
        mq.delete(q).unwrap();
        assert_eq!(heap.stats().total_free_size, 4096);
    }

    #[test]
    fn test_reply_queue_round_trip() {
        let (mq, _) = setup(MessageQConfig::default());
        let client = mq.create(Some("client"), MessageQParams::default()).unwrap();
        let server = mq.create(Some("server"), MessageQParams::default()).unwrap();

        let mut request = mq.alloc(0, 40).unwrap();
        mq.set_reply_queue(&client, &mut request);
        mq.put(mq.open("server").unwrap(), request).unwrap();

        let request = mq.get(&server, 0).unwrap();
        let reply_to = request.reply_queue().unwrap();
        mq.put(reply_to, request).unwrap();
        assert_eq!(mq.count(&client), 1);
    }

    #[test]
    fn test_unblocked_get_ignores_pending() {
        let (mq, _) = setup(MessageQConfig::default());
        let q = mq.create(None, MessageQParams::default()).unwrap();
        mq.put(q.queue_id(), mq.alloc(0, 40).unwrap()).unwrap();
        mq.unblock(&q);
        assert!(matches!(mq.get(&q, FOREVER), Err(MessageQError::Unblocked)));
        assert_eq!(mq.count(&q), 1);
    }

    #[test]
    fn test_transport_slots() {
        struct Refuse;
        impl MessageQTransport for Refuse {
            fn put(&self, msg: Message) -> Result<(), PutError> {
                Err(PutError::new(MessageQError::RemoteActive, msg))
            }
        }

        let (mq, _) = setup(MessageQConfig::default());
        assert!(!mq.register_transport(Arc::new(Refuse), 0, 0));
        assert!(!mq.register_transport(Arc::new(Refuse), 1, 2));
        assert!(mq.register_transport(Arc::new(Refuse), 1, 0));
        assert!(!mq.register_transport(Arc::new(Refuse), 1, 0));

        let err = mq.put(QueueId::new(1, 0), mq.alloc(0, 40).unwrap()).unwrap_err();
        assert_eq!(err.error, MessageQError::RemoteActive);

        mq.unregister_transport(1, 0);
        let err = mq.put(QueueId::new(1, 0), err.msg).unwrap_err();
        assert_eq!(err.error, MessageQError::InvalidProcId);
    }
}
