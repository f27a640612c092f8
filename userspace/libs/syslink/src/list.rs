// Intrusive List
//
// Doubly-linked circular list whose links live inside the elements. Every
// concurrency-sensitive container in the stack (queue contents, NameServer
// tables) is built on it.
//
// Key responsibilities:
// - O(1) append, prepend, dequeue, splice-before and unlink
// - Cursor traversal in both directions
// - Gate-protected convenience entry points for simple callers
//
// Design principles:
// - Elements carry their own `Link`; the list never allocates nodes of its
//   own, it owns element storage in a slot arena and relinks indices
// - The header link pointing at itself means "empty"; a detached element's
//   link is `Link::detached()`
// - Unlocked primitives live on `RawList` and are reachable from a `List`
//   only through the `ListGuard` returned by `List::lock`
//
// Correctness and safety notes:
// - Element handles carry a generation, so a stale or foreign `ElemId` is
//   rejected instead of corrupting links
// - Link consistency checks that would otherwise corrupt the list are
//   always-on assertions

use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};

use crate::gate::{Gate, SpinGate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeRef {
    Head,
    Elem(u32),
    Unlinked,
}

/// next/prev link embedded in every list-resident structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    next: NodeRef,
    prev: NodeRef,
}

impl Link {
    pub const fn detached() -> Self {
        Link {
            next: NodeRef::Unlinked,
            prev: NodeRef::Unlinked,
        }
    }

    pub fn is_detached(&self) -> bool {
        self.next == NodeRef::Unlinked && self.prev == NodeRef::Unlinked
    }

    /// Reset to the detached state
    pub fn clear(&mut self) {
        *self = Link::detached();
    }
}

impl Default for Link {
    fn default() -> Self {
        Link::detached()
    }
}

/// Structures that can sit on a `RawList`
pub trait Linked {
    fn link(&self) -> &Link;
    fn link_mut(&mut self) -> &mut Link;
}

/// Reset an element's link to the detached state
pub fn elem_clear<T: Linked>(elem: &mut T) {
    elem.link_mut().clear();
}

/// Handle to an element currently on a list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElemId {
    index: u32,
    generation: u32,
}

impl fmt::Display for ElemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Elem({}#{})", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// The unlocked list. Holding `&mut RawList` is the proof that the gate
/// guarding it is held.
pub struct RawList<T> {
    header: Link,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T: Linked> RawList<T> {
    pub const fn new() -> Self {
        Self {
            header: Link {
                next: NodeRef::Head,
                prev: NodeRef::Head,
            },
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.header.next == NodeRef::Head
    }

    pub fn len(&self) -> usize {
        self.len
    }

    fn resolve(&self, id: ElemId) -> Option<u32> {
        let slot = self.slots.get(id.index as usize)?;
        (slot.generation == id.generation && slot.value.is_some()).then_some(id.index)
    }

    fn id_of(&self, index: u32) -> ElemId {
        ElemId {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    fn link_at(&self, node: NodeRef) -> Link {
        match node {
            NodeRef::Head => self.header,
            NodeRef::Elem(index) => match &self.slots[index as usize].value {
                Some(value) => *value.link(),
                None => panic!("list link references an empty slot"),
            },
            NodeRef::Unlinked => panic!("list link references a detached element"),
        }
    }

    fn link_at_mut(&mut self, node: NodeRef) -> &mut Link {
        match node {
            NodeRef::Head => &mut self.header,
            NodeRef::Elem(index) => match &mut self.slots[index as usize].value {
                Some(value) => value.link_mut(),
                None => panic!("list link references an empty slot"),
            },
            NodeRef::Unlinked => panic!("list link references a detached element"),
        }
    }

    fn store(&mut self, elem: T) -> u32 {
        assert!(elem.link().is_detached(), "element is already on a list");
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].value = Some(elem);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    value: Some(elem),
                });
                (self.slots.len() - 1) as u32
            }
        }
    }

    fn release(&mut self, index: u32) -> Option<T> {
        let slot = &mut self.slots[index as usize];
        let mut elem = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        elem.link_mut().clear();
        Some(elem)
    }

    // All four link writes happen here, under whatever gate the caller holds.
    fn splice_before(&mut self, index: u32, at: NodeRef) {
        let prev = self.link_at(at).prev;
        let node = NodeRef::Elem(index);
        {
            let link = self.link_at_mut(node);
            link.next = at;
            link.prev = prev;
        }
        self.link_at_mut(prev).next = node;
        self.link_at_mut(at).prev = node;
        self.len += 1;
    }

    fn unlink(&mut self, index: u32) -> Option<T> {
        let node = NodeRef::Elem(index);
        let Link { next, prev } = self.link_at(node);
        self.link_at_mut(prev).next = next;
        self.link_at_mut(next).prev = prev;
        self.len -= 1;
        self.release(index)
    }

    /// Append `elem` at the tail
    pub fn enqueue(&mut self, elem: T) -> ElemId {
        let index = self.store(elem);
        self.splice_before(index, NodeRef::Head);
        self.id_of(index)
    }

    /// Prepend `elem` at the head
    pub fn enqueue_head(&mut self, elem: T) -> ElemId {
        let index = self.store(elem);
        let first = self.header.next;
        self.splice_before(index, first);
        self.id_of(index)
    }

    /// Remove and return the head element
    pub fn dequeue(&mut self) -> Option<T> {
        match self.header.next {
            NodeRef::Elem(index) => self.unlink(index),
            _ => None,
        }
    }

    /// Splice `elem` immediately before `before`.
    ///
    /// A stale `before` hands the element back untouched.
    pub fn insert(&mut self, elem: T, before: ElemId) -> Result<ElemId, T> {
        let Some(at) = self.resolve(before) else {
            return Err(elem);
        };
        let index = self.store(elem);
        self.splice_before(index, NodeRef::Elem(at));
        Ok(self.id_of(index))
    }

    /// Unlink the element `id` from wherever it sits
    pub fn remove(&mut self, id: ElemId) -> Option<T> {
        let index = self.resolve(id)?;
        self.unlink(index)
    }

    /// Element after `cursor`; `None` starts at the head
    pub fn next(&self, cursor: Option<ElemId>) -> Option<ElemId> {
        let from = match cursor {
            Some(id) => NodeRef::Elem(self.resolve(id)?),
            None => NodeRef::Head,
        };
        match self.link_at(from).next {
            NodeRef::Elem(index) => Some(self.id_of(index)),
            _ => None,
        }
    }

    /// Element before `cursor`; `None` starts at the tail
    pub fn prev(&self, cursor: Option<ElemId>) -> Option<ElemId> {
        let from = match cursor {
            Some(id) => NodeRef::Elem(self.resolve(id)?),
            None => NodeRef::Head,
        };
        match self.link_at(from).prev {
            NodeRef::Elem(index) => Some(self.id_of(index)),
            _ => None,
        }
    }

    pub fn get(&self, id: ElemId) -> Option<&T> {
        let index = self.resolve(id)?;
        self.slots[index as usize].value.as_ref()
    }

    pub fn get_mut(&mut self, id: ElemId) -> Option<&mut T> {
        let index = self.resolve(id)?;
        self.slots[index as usize].value.as_mut()
    }

    /// Head-to-tail iteration
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cursor: self.next(None),
        }
    }

    /// First element matching `pred`, head to tail
    pub fn find<P: FnMut(&T) -> bool>(&self, mut pred: P) -> Option<ElemId> {
        self.iter().find(|&(_, elem)| pred(elem)).map(|(id, _)| id)
    }
}

impl<T: Linked> Default for RawList<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a, T> {
    list: &'a RawList<T>,
    cursor: Option<ElemId>,
}

impl<'a, T: Linked> Iterator for Iter<'a, T> {
    type Item = (ElemId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        self.cursor = self.list.next(Some(id));
        self.list.get(id).map(|elem| (id, elem))
    }
}

/// Gate-protected list
pub struct List<T, G: Gate = SpinGate> {
    gate: G,
    raw: UnsafeCell<RawList<T>>,
}

// The gate serializes every access to `raw`.
unsafe impl<T: Send, G: Gate + Sync> Sync for List<T, G> {}

impl<T: Linked, G: Gate + Default> List<T, G> {
    pub fn new() -> Self {
        Self::with_gate(G::default())
    }
}

impl<T: Linked, G: Gate + Default> Default for List<T, G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Linked, G: Gate> List<T, G> {
    pub fn with_gate(gate: G) -> Self {
        Self {
            gate,
            raw: UnsafeCell::new(RawList::new()),
        }
    }

    /// Enter the gate; the guard exposes the unlocked primitives.
    pub fn lock(&self) -> ListGuard<'_, T, G> {
        self.gate.enter();
        ListGuard { list: self }
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn put(&self, elem: T) -> ElemId {
        self.lock().enqueue(elem)
    }

    pub fn put_head(&self, elem: T) -> ElemId {
        self.lock().enqueue_head(elem)
    }

    pub fn get(&self) -> Option<T> {
        self.lock().dequeue()
    }

    pub fn insert(&self, elem: T, before: ElemId) -> Result<ElemId, T> {
        self.lock().insert(elem, before)
    }

    pub fn remove(&self, id: ElemId) -> Option<T> {
        self.lock().remove(id)
    }
}

/// Proof that a list's gate is held
pub struct ListGuard<'a, T, G: Gate> {
    list: &'a List<T, G>,
}

impl<T, G: Gate> Deref for ListGuard<'_, T, G> {
    type Target = RawList<T>;

    fn deref(&self) -> &RawList<T> {
        // The gate is held for the guard's lifetime.
        unsafe { &*self.list.raw.get() }
    }
}

impl<T, G: Gate> DerefMut for ListGuard<'_, T, G> {
    fn deref_mut(&mut self) -> &mut RawList<T> {
        unsafe { &mut *self.list.raw.get() }
    }
}

impl<T, G: Gate> Drop for ListGuard<'_, T, G> {
    fn drop(&mut self) {
        unsafe { self.list.gate.leave() };
    }
}
