// Messages
//
// The transferable unit of MessageQ: a fixed 32-byte header followed by the
// caller's payload. The list link that lets a message sit on a queue is a
// field of the envelope, never part of the header bytes.
//
// Header wire layout (little-endian):
//   0  reserved0   u32        16 dst_id      u16
//   4  reserved1   u32        18 dst_proc    u16
//   8  msg_size    u32        20 reply_id    u16
//   12 flags       u16        22 reply_proc  u16
//   14 msg_id      u16        24 src_proc    u16
//                             26 heap_id     u16
//                             28 seq_num     u16
//                             30 reserved    u16

use core::fmt;

use ipcmgr::args::{read_u16, read_u32, write_u16, write_u32};

use crate::heap::{HeapBlock, HeapId};
use crate::list::{Link, Linked};
use crate::ProcId;

pub const HEADER_SIZE: usize = 32;
pub const HEADER_VERSION: u16 = 0x2000;

pub const PRIORITY_MASK: u16 = 0x3;
pub const TRACE_MASK: u16 = 0x1000;
pub const TRACE_SHIFT: u16 = 12;

/// Heap id carried by caller-owned messages
pub const STATIC_MSG: HeapId = 0xFFFF;
pub const INVALID_MSG_ID: u16 = 0xFFFF;
pub const INVALID_QUEUE_INDEX: u16 = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum Priority {
    Normal = 0,
    High = 1,
    Reserved = 2,
    Urgent = 3,
}

impl Priority {
    pub fn from_flags(flags: u16) -> Self {
        match flags & PRIORITY_MASK {
            0 => Priority::Normal,
            1 => Priority::High,
            2 => Priority::Reserved,
            _ => Priority::Urgent,
        }
    }
}

/// Queue id: processor id in the high 16 bits, queue index in the low 16
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId(u32);

impl QueueId {
    pub const fn new(proc_id: ProcId, index: u16) -> Self {
        QueueId(((proc_id as u32) << 16) | index as u32)
    }

    pub const fn from_raw(raw: u32) -> Self {
        QueueId(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub const fn proc_id(&self) -> ProcId {
        (self.0 >> 16) as ProcId
    }

    pub const fn index(&self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.proc_id(), self.index())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MsgHeader {
    pub reserved0: u32,
    pub reserved1: u32,
    pub msg_size: u32,
    pub flags: u16,
    pub msg_id: u16,
    pub dst_id: u16,
    pub dst_proc: u16,
    pub reply_id: u16,
    pub reply_proc: u16,
    pub src_proc: u16,
    pub heap_id: u16,
    pub seq_num: u16,
    pub reserved: u16,
}

impl MsgHeader {
    /// Header with every id field set to its invalid value
    pub fn new(size: u32, heap_id: HeapId, src_proc: ProcId) -> Self {
        Self {
            msg_size: size,
            flags: HEADER_VERSION | Priority::Normal as u16,
            msg_id: INVALID_MSG_ID,
            dst_id: INVALID_QUEUE_INDEX,
            dst_proc: INVALID_QUEUE_INDEX,
            reply_id: INVALID_QUEUE_INDEX,
            reply_proc: INVALID_QUEUE_INDEX,
            src_proc,
            heap_id,
            ..Default::default()
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        write_u32(&mut out, 0, self.reserved0);
        write_u32(&mut out, 4, self.reserved1);
        write_u32(&mut out, 8, self.msg_size);
        let words = [
            self.flags,
            self.msg_id,
            self.dst_id,
            self.dst_proc,
            self.reply_id,
            self.reply_proc,
            self.src_proc,
            self.heap_id,
            self.seq_num,
            self.reserved,
        ];
        for (i, word) in words.iter().enumerate() {
            write_u16(&mut out, 12 + i * 2, *word);
        }
        out
    }

    /// Parse a header; `None` if `bytes` is shorter than `HEADER_SIZE`
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(Self {
            reserved0: read_u32(bytes, 0)?,
            reserved1: read_u32(bytes, 4)?,
            msg_size: read_u32(bytes, 8)?,
            flags: read_u16(bytes, 12)?,
            msg_id: read_u16(bytes, 14)?,
            dst_id: read_u16(bytes, 16)?,
            dst_proc: read_u16(bytes, 18)?,
            reply_id: read_u16(bytes, 20)?,
            reply_proc: read_u16(bytes, 22)?,
            src_proc: read_u16(bytes, 24)?,
            heap_id: read_u16(bytes, 26)?,
            seq_num: read_u16(bytes, 28)?,
            reserved: read_u16(bytes, 30)?,
        })
    }
}

pub(crate) enum Storage {
    Heap(HeapBlock),
    Static(Vec<u8>),
}

impl Storage {
    fn bytes(&self) -> &[u8] {
        match self {
            Storage::Heap(block) => block.as_slice(),
            Storage::Static(buf) => buf,
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            Storage::Heap(block) => block.as_mut_slice(),
            Storage::Static(buf) => buf,
        }
    }
}

/// A message envelope
pub struct Message {
    link: Link,
    header: MsgHeader,
    storage: Storage,
}

impl Linked for Message {
    fn link(&self) -> &Link {
        &self.link
    }

    fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }
}

impl Message {
    pub(crate) fn from_heap(header: MsgHeader, block: HeapBlock) -> Self {
        Self {
            link: Link::detached(),
            header,
            storage: Storage::Heap(block),
        }
    }

    pub(crate) fn from_static(header: MsgHeader, buf: Vec<u8>) -> Self {
        Self {
            link: Link::detached(),
            header,
            storage: Storage::Static(buf),
        }
    }

    pub(crate) fn into_storage(self) -> Storage {
        self.storage
    }

    pub fn header(&self) -> &MsgHeader {
        &self.header
    }

    pub(crate) fn header_mut(&mut self) -> &mut MsgHeader {
        &mut self.header
    }

    /// Total size including the header
    pub fn size(&self) -> u32 {
        self.header.msg_size
    }

    pub fn msg_id(&self) -> u16 {
        self.header.msg_id
    }

    pub fn set_msg_id(&mut self, msg_id: u16) {
        self.header.msg_id = msg_id;
    }

    pub fn priority(&self) -> Priority {
        Priority::from_flags(self.header.flags)
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.header.flags = (self.header.flags & !PRIORITY_MASK) | priority as u16;
    }

    pub fn is_traced(&self) -> bool {
        self.header.flags & TRACE_MASK != 0
    }

    pub fn set_trace(&mut self, on: bool) {
        self.header.flags = (self.header.flags & !TRACE_MASK) | ((on as u16) << TRACE_SHIFT);
    }

    pub fn heap_id(&self) -> HeapId {
        self.header.heap_id
    }

    pub fn is_static(&self) -> bool {
        matches!(self.storage, Storage::Static(_))
    }

    pub fn seq_num(&self) -> u16 {
        self.header.seq_num
    }

    pub fn src_proc(&self) -> ProcId {
        self.header.src_proc
    }

    /// Queue a reply should go to, if the sender embedded one
    pub fn reply_queue(&self) -> Option<QueueId> {
        (self.header.reply_id != INVALID_QUEUE_INDEX)
            .then(|| QueueId::new(self.header.reply_proc, self.header.reply_id))
    }

    pub fn set_reply_queue(&mut self, queue: QueueId) {
        self.header.reply_id = queue.index();
        self.header.reply_proc = queue.proc_id();
    }

    /// Queue this message was last put to
    pub fn dst_queue(&self) -> Option<QueueId> {
        (self.header.dst_id != INVALID_QUEUE_INDEX).then(|| QueueId::new(self.header.dst_proc, self.header.dst_id))
    }

    pub fn payload(&self) -> &[u8] {
        let end = self.header.msg_size as usize;
        self.storage.bytes().get(HEADER_SIZE..end).unwrap_or_default()
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let end = self.header.msg_size as usize;
        self.storage.bytes_mut().get_mut(HEADER_SIZE..end).unwrap_or_default()
    }

    /// Header and payload as they would cross a processor boundary
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.header.msg_size as usize);
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(self.payload());
        out
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("header", &self.header)
            .field("static", &self.is_static())
            .finish()
    }
}
