// NameServer
//
// Process-local name -> value tables with optional fan-out to remote
// processors. MessageQ resolves queue names through the "MessageQ" table;
// any other module may create its own tables.
//
// Key responsibilities:
// - Create, look up and delete named tables (`NameServerRegistry`)
// - Add entries with variable-length or 32-bit values
// - Look names up locally, or across processors in a caller-chosen order
// - Remove entries by name or by the handle returned from `add`
// - Longest-prefix matching for diagnostics
//
// Growth policy:
// - A bounded table (`max_runtime_entries` set) rejects adds once full
// - An unbounded table (`ALLOW_GROWTH`) charges each entry against
//   `table_heap` when one is configured
//
// Correctness and safety notes:
// - Table contents sit on a gated intrusive list
// - Remote lookups run without any table lock held
// - Removing through a stale entry handle reports NotFound

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use ipcmgr::{log_debug, log_info, log_warn};
use spin::Mutex;

use crate::error::NameServerError;
use crate::heap::{Heap, HeapBlock};
use crate::list::{ElemId, Link, Linked, List};
use crate::{ProcId, PROC_ID_INVALID};

const LOG_ORIGIN: &str = "nameserver";

/// `max_runtime_entries` value for tables that grow on demand
pub const ALLOW_GROWTH: u32 = u32::MAX;

pub const DEFAULT_MAX_NAME_LEN: u32 = 16;

#[derive(Clone)]
pub struct NameServerParams {
    pub max_runtime_entries: u32,
    /// Heap charged for entries of a growable table
    pub table_heap: Option<Arc<dyn Heap>>,
    /// Reject a second entry with the same name
    pub check_existing: bool,
    pub max_value_len: u32,
    pub max_name_len: u32,
}

impl Default for NameServerParams {
    fn default() -> Self {
        Self {
            max_runtime_entries: ALLOW_GROWTH,
            table_heap: None,
            check_existing: true,
            max_value_len: 4,
            max_name_len: DEFAULT_MAX_NAME_LEN,
        }
    }
}

/// Lookup service of another processor's NameServer
pub trait NameServerRemote: Send + Sync {
    /// Copy the value of `name` in the remote table `table` into `buf`
    fn get(&self, table: &str, name: &str, buf: &mut [u8]) -> Result<usize, NameServerError>;
}

type RemoteTable = Mutex<BTreeMap<ProcId, Arc<dyn NameServerRemote>>>;

struct NameEntry {
    link: Link,
    name: String,
    value: Vec<u8>,
    block: Option<HeapBlock>,
}

impl Linked for NameEntry {
    fn link(&self) -> &Link {
        &self.link
    }

    fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }
}

/// Opaque handle for O(1) removal of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHandle(ElemId);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixMatch {
    /// Length of the matched stored name
    pub len: usize,
    pub value: u32,
}

pub struct NameServer {
    name: String,
    proc_id: ProcId,
    params: NameServerParams,
    table: List<NameEntry>,
    remotes: Arc<RemoteTable>,
}

impl NameServer {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &NameServerParams {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn bounded(&self) -> Option<usize> {
        (self.params.max_runtime_entries != ALLOW_GROWTH).then_some(self.params.max_runtime_entries as usize)
    }

    /// Add `name` with an opaque value
    pub fn add(&self, name: &str, value: &[u8]) -> Result<EntryHandle, NameServerError> {
        if name.is_empty() || name.len() > self.params.max_name_len as usize {
            return Err(NameServerError::InvalidArgument);
        }
        if value.len() > self.params.max_value_len as usize {
            return Err(NameServerError::InvalidArgument);
        }

        let mut table = self.table.lock();

        if self.params.check_existing && table.find(|entry| entry.name == name).is_some() {
            log_debug!(LOG_ORIGIN, "{}: '{}' already exists", self.name, name);
            return Err(NameServerError::AlreadyExists);
        }

        let block = match self.bounded() {
            Some(max) if table.len() >= max => {
                log_warn!(LOG_ORIGIN, "{}: table full ({} entries)", self.name, max);
                return Err(NameServerError::MaxReached);
            }
            Some(_) => None,
            None => match &self.params.table_heap {
                Some(heap) => Some(heap.alloc(name.len() + value.len()).ok_or(NameServerError::Memory)?),
                None => None,
            },
        };

        let id = table.enqueue(NameEntry {
            link: Link::detached(),
            name: name.to_owned(),
            value: value.to_vec(),
            block,
        });
        Ok(EntryHandle(id))
    }

    pub fn add_uint32(&self, name: &str, value: u32) -> Result<EntryHandle, NameServerError> {
        self.add(name, &value.to_le_bytes())
    }

    /// Local-table lookup; returns the value length copied into `buf`
    pub fn get_local(&self, name: &str, buf: &mut [u8]) -> Result<usize, NameServerError> {
        let table = self.table.lock();
        let (_, entry) = table
            .iter()
            .find(|(_, entry)| entry.name == name)
            .ok_or(NameServerError::NotFound)?;

        let len = entry.value.len();
        let out = buf.get_mut(..len).ok_or(NameServerError::InvalidArgument)?;
        out.copy_from_slice(&entry.value);
        Ok(len)
    }

    pub fn get_local_uint32(&self, name: &str) -> Result<u32, NameServerError> {
        let mut buf = [0u8; 4];
        match self.get_local(name, &mut buf)? {
            4 => Ok(u32::from_le_bytes(buf)),
            _ => Err(NameServerError::InvalidArgument),
        }
    }

    /// Look `name` up across processors.
    ///
    /// Without `procs` the local table is searched first, then remote
    /// processors in ascending id order. With `procs` exactly that sequence
    /// is searched, stopping at `PROC_ID_INVALID`.
    pub fn get(&self, name: &str, buf: &mut [u8], procs: Option<&[ProcId]>) -> Result<usize, NameServerError> {
        let order: Vec<ProcId> = match procs {
            Some(list) => list.iter().copied().take_while(|id| *id != PROC_ID_INVALID).collect(),
            None => {
                let remotes = self.remotes.lock();
                core::iter::once(self.proc_id)
                    .chain(remotes.keys().copied().filter(|id| *id != self.proc_id))
                    .collect()
            }
        };

        for proc_id in order {
            let result = if proc_id == self.proc_id {
                self.get_local(name, buf)
            } else {
                let remote = self.remotes.lock().get(&proc_id).cloned();
                match remote {
                    Some(remote) => remote.get(&self.name, name, buf),
                    None => continue,
                }
            };

            match result {
                Err(NameServerError::NotFound) => continue,
                other => return other,
            }
        }

        Err(NameServerError::NotFound)
    }

    pub fn get_uint32(&self, name: &str, procs: Option<&[ProcId]>) -> Result<u32, NameServerError> {
        let mut buf = [0u8; 4];
        match self.get(name, &mut buf, procs)? {
            4 => Ok(u32::from_le_bytes(buf)),
            _ => Err(NameServerError::InvalidArgument),
        }
    }

    /// Remove the first entry named `name`
    pub fn remove(&self, name: &str) -> Result<(), NameServerError> {
        let entry = {
            let mut table = self.table.lock();
            let id = table.find(|entry| entry.name == name).ok_or(NameServerError::NotFound)?;
            table.remove(id)
        };
        self.release(entry);
        Ok(())
    }

    pub fn remove_entry(&self, handle: EntryHandle) -> Result<(), NameServerError> {
        let entry = self.table.remove(handle.0).ok_or(NameServerError::NotFound)?;
        self.release(Some(entry));
        Ok(())
    }

    /// Longest stored name that is a prefix of `name`, with its 32-bit value
    pub fn match_prefix(&self, name: &str) -> Option<PrefixMatch> {
        let table = self.table.lock();
        table
            .iter()
            .map(|(_, entry)| entry)
            .filter(|entry| name.starts_with(entry.name.as_str()))
            .filter_map(|entry| {
                let value: [u8; 4] = entry.value.as_slice().try_into().ok()?;
                Some(PrefixMatch {
                    len: entry.name.len(),
                    value: u32::from_le_bytes(value),
                })
            })
            .max_by_key(|found| found.len)
    }

    fn release(&self, entry: Option<NameEntry>) {
        if let (Some(block), Some(heap)) = (entry.and_then(|e| e.block), &self.params.table_heap) {
            heap.free(block);
        }
    }

    fn clear(&self) {
        while let Some(entry) = self.table.get() {
            self.release(Some(entry));
        }
    }
}

/// All tables of one processor
pub struct NameServerRegistry {
    proc_id: ProcId,
    tables: Mutex<BTreeMap<String, Arc<NameServer>>>,
    remotes: Arc<RemoteTable>,
}

impl NameServerRegistry {
    pub fn new(proc_id: ProcId) -> Self {
        log_info!(LOG_ORIGIN, "NameServer registry up on proc {}", proc_id);
        Self {
            proc_id,
            tables: Mutex::new(BTreeMap::new()),
            remotes: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn proc_id(&self) -> ProcId {
        self.proc_id
    }

    pub fn create(&self, name: &str, params: NameServerParams) -> Result<Arc<NameServer>, NameServerError> {
        if name.is_empty() {
            return Err(NameServerError::InvalidArgument);
        }

        let mut tables = self.tables.lock();
        if tables.contains_key(name) {
            return Err(NameServerError::AlreadyExists);
        }

        let server = Arc::new(NameServer {
            name: name.to_owned(),
            proc_id: self.proc_id,
            params,
            table: List::new(),
            remotes: self.remotes.clone(),
        });
        tables.insert(name.to_owned(), server.clone());
        log_debug!(LOG_ORIGIN, "created table '{}'", name);
        Ok(server)
    }

    /// Delete a table and release its entries
    pub fn delete(&self, handle: &Arc<NameServer>) -> Result<(), NameServerError> {
        let removed = {
            let mut tables = self.tables.lock();
            let owned = matches!(tables.get(&handle.name), Some(existing) if Arc::ptr_eq(existing, handle));
            if owned {
                tables.remove(&handle.name)
            } else {
                None
            }
        };

        let server = removed.ok_or(NameServerError::NotFound)?;
        server.clear();
        log_debug!(LOG_ORIGIN, "deleted table '{}'", server.name);
        Ok(())
    }

    pub fn get_handle(&self, name: &str) -> Option<Arc<NameServer>> {
        self.tables.lock().get(name).cloned()
    }

    /// Make `proc_id`'s tables reachable from `get` fan-out.
    ///
    /// Returns `false` if a remote was already registered for `proc_id`.
    pub fn register_remote(&self, proc_id: ProcId, remote: Arc<dyn NameServerRemote>) -> bool {
        if proc_id == self.proc_id || proc_id == PROC_ID_INVALID {
            return false;
        }
        let mut remotes = self.remotes.lock();
        if remotes.contains_key(&proc_id) {
            return false;
        }
        remotes.insert(proc_id, remote);
        true
    }

    pub fn unregister_remote(&self, proc_id: ProcId) -> Result<(), NameServerError> {
        self.remotes
            .lock()
            .remove(&proc_id)
            .map(|_| ())
            .ok_or(NameServerError::NotFound)
    }

    pub fn table_count(&self) -> usize {
        self.tables.lock().len()
    }

    /// Delete every table and forget every remote
    pub fn destroy(&self) {
        let tables = core::mem::take(&mut *self.tables.lock());
        for server in tables.values() {
            server.clear();
        }
        self.remotes.lock().clear();
        log_info!(LOG_ORIGIN, "NameServer registry on proc {} destroyed", self.proc_id);
    }
}

/// Remote view of another in-process registry
pub struct LocalRemote {
    peer: Weak<NameServerRegistry>,
}

impl LocalRemote {
    pub fn new(peer: &Arc<NameServerRegistry>) -> Self {
        Self {
            peer: Arc::downgrade(peer),
        }
    }
}

impl NameServerRemote for LocalRemote {
    fn get(&self, table: &str, name: &str, buf: &mut [u8]) -> Result<usize, NameServerError> {
        let peer = self.peer.upgrade().ok_or(NameServerError::InvalidState)?;
        let server = peer.get_handle(table).ok_or(NameServerError::NotFound)?;
        server.get_local(name, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapMem;

    fn table(params: NameServerParams) -> (NameServerRegistry, Arc<NameServer>) {
        let registry = NameServerRegistry::new(0);
        let server = registry.create("test", params).unwrap();
        (registry, server)
    }

    #[test]
    fn test_add_and_get_local() {
        let (_registry, ns) = table(NameServerParams { max_value_len: 8, ..Default::default() });
        ns.add("blob", &[1, 2, 3]).unwrap();
        ns.add_uint32("word", 0xCAFE).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(ns.get_local("blob", &mut buf), Ok(3));
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(ns.get_local_uint32("word"), Ok(0xCAFE));
        assert_eq!(ns.get_local_uint32("blob"), Err(NameServerError::InvalidArgument));
        assert_eq!(ns.get_local("none", &mut buf), Err(NameServerError::NotFound));
        assert_eq!(ns.get_local("blob", &mut buf[..2]), Err(NameServerError::InvalidArgument));
    }

    #[test]
    fn test_argument_limits() {
        let (_registry, ns) = table(NameServerParams::default());
        assert_eq!(ns.add("", &[0]), Err(NameServerError::InvalidArgument));
        assert_eq!(ns.add(&"x".repeat(17), &[0]), Err(NameServerError::InvalidArgument));
        assert_eq!(ns.add("ok", &[0; 5]), Err(NameServerError::InvalidArgument));
        assert!(ns.add(&"x".repeat(16), &[0; 4]).is_ok());
    }

    #[test]
    fn test_remove_by_name_and_handle() {
        let (_registry, ns) = table(NameServerParams::default());
        let a = ns.add_uint32("a", 1).unwrap();
        ns.add_uint32("b", 2).unwrap();

        ns.remove("b").unwrap();
        assert_eq!(ns.remove("b"), Err(NameServerError::NotFound));
        ns.remove_entry(a).unwrap();
        assert_eq!(ns.remove_entry(a), Err(NameServerError::NotFound));
        assert!(ns.is_empty());
    }

    #[test]
    fn test_match_prefix_picks_longest() {
        let (_registry, ns) = table(NameServerParams::default());
        ns.add_uint32("ab", 1).unwrap();
        ns.add_uint32("abcd", 2).unwrap();
        ns.add_uint32("abz", 3).unwrap();

        assert_eq!(ns.match_prefix("abcdef"), Some(PrefixMatch { len: 4, value: 2 }));
        assert_eq!(ns.match_prefix("abx"), Some(PrefixMatch { len: 2, value: 1 }));
        assert_eq!(ns.match_prefix("zzz"), None);
    }

    #[test]
    fn test_growth_charges_table_heap() {
        let heap = Arc::new(HeapMem::new(32));
        let (registry, ns) = table(NameServerParams {
            table_heap: Some(heap.clone()),
            ..Default::default()
        });
        ns.add_uint32("one", 1).unwrap();
        ns.add_uint32("two", 2).unwrap();
        assert_eq!(heap.stats().total_free_size, 16);
        ns.add_uint32("three", 3).unwrap();
        assert_eq!(ns.add_uint32("four", 4), Err(NameServerError::Memory));

        ns.remove("one").unwrap();
        assert_eq!(heap.stats().total_free_size, 8);
        registry.delete(&ns).unwrap();
        assert_eq!(heap.stats().total_free_size, 32);
    }

    #[test]
    fn test_registry_create_delete() {
        let registry = NameServerRegistry::new(1);
        let ns = registry.create("MessageQ", NameServerParams::default()).unwrap();
        assert!(registry.create("MessageQ", NameServerParams::default()).is_err());
        assert!(Arc::ptr_eq(&registry.get_handle("MessageQ").unwrap(), &ns));
        registry.delete(&ns).unwrap();
        assert_eq!(registry.delete(&ns), Err(NameServerError::NotFound));
        assert!(registry.get_handle("MessageQ").is_none());
    }

    #[test]
    fn test_get_fans_out_to_remotes() {
        let host = Arc::new(NameServerRegistry::new(0));
        let dsp = Arc::new(NameServerRegistry::new(1));
        let video = Arc::new(NameServerRegistry::new(2));
        assert!(host.register_remote(1, Arc::new(LocalRemote::new(&dsp))));
        assert!(host.register_remote(2, Arc::new(LocalRemote::new(&video))));
        assert!(!host.register_remote(2, Arc::new(LocalRemote::new(&video))));

        let local = host.create("T", NameServerParams::default()).unwrap();
        dsp.create("T", NameServerParams::default()).unwrap().add_uint32("dup", 1).unwrap();
        video.create("T", NameServerParams::default()).unwrap().add_uint32("dup", 2).unwrap();
        video.get_handle("T").unwrap().add_uint32("only2", 22).unwrap();

        // Ascending processor order after the local table.
        assert_eq!(local.get_uint32("dup", None), Ok(1));
        assert_eq!(local.get_uint32("only2", None), Ok(22));

        // Caller-supplied order, stopping at the terminator.
        assert_eq!(local.get_uint32("dup", Some(&[2, 1])), Ok(2));
        assert_eq!(local.get_uint32("dup", Some(&[PROC_ID_INVALID, 2])), Err(NameServerError::NotFound));

        local.add_uint32("dup", 0).unwrap();
        assert_eq!(local.get_uint32("dup", None), Ok(0));
        assert_eq!(local.get_uint32("dup", Some(&[1, 0])), Ok(1));

        host.unregister_remote(1).unwrap();
        assert_eq!(local.get_uint32("dup", Some(&[1])), Err(NameServerError::NotFound));
    }
}
