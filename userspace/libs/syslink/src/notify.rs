// Notify
//
// One-word event channel between processor pairs. Each processor runs one
// driver which owns an event chart per (source processor, line). A sender
// raises a flag plus payload in the chart of the destination processor's
// driver, keyed by the sender's own id, and the callback registered there
// runs on delivery.
//
// Key responsibilities:
// - Per-line attach/detach (the "initialized to receive" state)
// - Peer links to the drivers of other processors
// - At most one callback per (processor, line, event)
// - Send with optional wait for the previous flag to clear
// - Per-event enable masks and a stack of global disable snapshots
//
// Lifecycle per (processor, line):
// - Uninitialized -> Initialized on `attach`
// - Disabled while any `disable` token is outstanding; flags raised in this
//   window stay latched and are delivered by the `restore` that empties the
//   stack
// - Destroyed after `exit`; every call then reports HandleInvalid
//
// Correctness and safety notes:
// - Callbacks run with no driver lock held, so they may call back in
// - A waiting send tests and sets the flag under one lock hold
// - Peers are held weakly; a dropped peer reads as not initialized
// - `restore` re-applies the masks captured by the matching `disable`,
//   discarding per-event changes made in between

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use ipcmgr::{log_debug, log_info, log_warn};
use spin::{Mutex, MutexGuard};

use crate::error::NotifyError;
use crate::ProcId;

const LOG_ORIGIN: &str = "notify";

pub type LineId = u16;
pub type EventNo = u32;

/// Receives (source processor, line, event number, payload)
pub type NotifyCallback = Arc<dyn Fn(ProcId, LineId, EventNo, u32) + Send + Sync>;

/// Upper 16 bits that mark an event number as a system event
pub const SYSTEM_KEY: u32 = 0xC1D2;
pub const EVENT_MASK: u32 = 0xFFFF;
pub const MAX_EVENTS: u32 = 32;
pub const MAX_INTLINES: u16 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyConfig {
    pub num_events: u32,
    /// Polls of a pending flag before a waiting send gives up
    pub send_event_poll_count: u32,
    pub num_lines: u16,
    /// Events below this number are reserved for system use
    pub reserved_events: u32,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            num_events: MAX_EVENTS,
            send_event_poll_count: 1000,
            num_lines: 1,
            reserved_events: 3,
        }
    }
}

/// Token returned by `disable`; only the most recent one may be restored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisableKey(u32);

type LineKey = (ProcId, LineId);

#[derive(Debug, Clone, Copy, Default)]
struct EventSlot {
    flag: bool,
    event: EventNo,
    payload: u32,
}

struct LineState {
    chart: Vec<EventSlot>,
    callbacks: Vec<Option<NotifyCallback>>,
    enable_mask: u32,
}

impl LineState {
    fn new(num_events: u32) -> Self {
        Self {
            chart: vec![EventSlot::default(); num_events as usize],
            callbacks: vec![None; num_events as usize],
            enable_mask: u32::MAX,
        }
    }

    fn enabled(&self, index: usize) -> bool {
        self.enable_mask & (1 << index) != 0
    }
}

struct Pending {
    source: LineKey,
    event: EventNo,
    payload: u32,
    callback: NotifyCallback,
}

impl Pending {
    fn deliver(self) {
        (self.callback)(self.source.0, self.source.1, self.event, self.payload);
    }
}

struct DriverState {
    destroyed: bool,
    lines: BTreeMap<LineKey, LineState>,
    disable_stack: Vec<(DisableKey, BTreeMap<LineKey, u32>)>,
    next_key: u32,
}

pub struct NotifyDriver {
    name: String,
    proc_id: ProcId,
    config: NotifyConfig,
    state: Mutex<DriverState>,
    peers: Mutex<BTreeMap<ProcId, Weak<NotifyDriver>>>,
}

impl NotifyDriver {
    pub fn init(name: &str, proc_id: ProcId, config: NotifyConfig) -> Result<Arc<Self>, NotifyError> {
        if config.num_events == 0 || config.num_events > MAX_EVENTS {
            return Err(NotifyError::InvalidArgument);
        }
        if config.num_lines == 0 || config.num_lines > MAX_INTLINES {
            return Err(NotifyError::InvalidArgument);
        }
        if config.reserved_events > config.num_events {
            return Err(NotifyError::InvalidArgument);
        }

        log_info!(
            LOG_ORIGIN,
            "driver '{}' up on proc {} ({} events, {} lines)",
            name,
            proc_id,
            config.num_events,
            config.num_lines
        );

        Ok(Arc::new(Self {
            name: name.to_owned(),
            proc_id,
            config,
            state: Mutex::new(DriverState {
                destroyed: false,
                lines: BTreeMap::new(),
                disable_stack: Vec::new(),
                next_key: 1,
            }),
            peers: Mutex::new(BTreeMap::new()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn proc_id(&self) -> ProcId {
        self.proc_id
    }

    pub fn config(&self) -> &NotifyConfig {
        &self.config
    }

    fn live(&self) -> Result<MutexGuard<'_, DriverState>, NotifyError> {
        let state = self.state.lock();
        if state.destroyed {
            return Err(NotifyError::HandleInvalid);
        }
        Ok(state)
    }

    fn check_line(&self, line: LineId) -> Result<(), NotifyError> {
        if line >= self.config.num_lines {
            return Err(NotifyError::InvalidArgument);
        }
        Ok(())
    }

    fn event_index(&self, event: EventNo) -> Result<usize, NotifyError> {
        let index = event & EVENT_MASK;
        if index >= self.config.num_events {
            return Err(NotifyError::InvalidArgument);
        }
        Ok(index as usize)
    }

    fn check_reserved(&self, event: EventNo) -> Result<(), NotifyError> {
        if (event & EVENT_MASK) < self.config.reserved_events && (event >> 16) != SYSTEM_KEY {
            return Err(NotifyError::EventReserved);
        }
        Ok(())
    }

    /// Initialise the event chart for (proc_id, line).
    ///
    /// Returns `Ok(false)` if the line was already attached.
    pub fn attach(&self, proc_id: ProcId, line: LineId) -> Result<bool, NotifyError> {
        self.check_line(line)?;
        let mut state = self.live()?;
        if state.lines.contains_key(&(proc_id, line)) {
            return Ok(false);
        }
        state.lines.insert((proc_id, line), LineState::new(self.config.num_events));
        log_debug!(LOG_ORIGIN, "{}: attached proc {} line {}", self.name, proc_id, line);
        Ok(true)
    }

    /// Tear down (proc_id, line); registrations and latched flags are dropped
    pub fn detach(&self, proc_id: ProcId, line: LineId) -> Result<(), NotifyError> {
        self.check_line(line)?;
        let mut state = self.live()?;
        state
            .lines
            .remove(&(proc_id, line))
            .ok_or(NotifyError::DriverNotInitialized)?;
        log_debug!(LOG_ORIGIN, "{}: detached proc {} line {}", self.name, proc_id, line);
        Ok(())
    }

    pub fn is_attached(&self, proc_id: ProcId, line: LineId) -> bool {
        self.live()
            .map(|state| state.lines.contains_key(&(proc_id, line)))
            .unwrap_or(false)
    }

    /// Link the driver running on another processor so events can be sent
    /// to it. The link is weak.
    pub fn register_peer(&self, peer: &Arc<NotifyDriver>) -> Result<(), NotifyError> {
        drop(self.live()?);
        if peer.proc_id == self.proc_id {
            return Err(NotifyError::InvalidArgument);
        }
        let mut peers = self.peers.lock();
        if peers.get(&peer.proc_id).is_some_and(|link| link.strong_count() > 0) {
            return Err(NotifyError::AlreadyExists);
        }
        peers.insert(peer.proc_id, Arc::downgrade(peer));
        log_debug!(LOG_ORIGIN, "{}: linked peer '{}' on proc {}", self.name, peer.name, peer.proc_id);
        Ok(())
    }

    pub fn unregister_peer(&self, proc_id: ProcId) -> Result<(), NotifyError> {
        drop(self.live()?);
        self.peers
            .lock()
            .remove(&proc_id)
            .map(|_| ())
            .ok_or(NotifyError::NotFound)
    }

    /// The linked driver of `proc_id`, if it is still alive
    pub fn peer(&self, proc_id: ProcId) -> Option<Arc<NotifyDriver>> {
        self.peers.lock().get(&proc_id).and_then(Weak::upgrade)
    }

    pub fn register_event(
        &self,
        proc_id: ProcId,
        line: LineId,
        event: EventNo,
        callback: NotifyCallback,
    ) -> Result<(), NotifyError> {
        self.check_line(line)?;
        let index = self.event_index(event)?;
        self.check_reserved(event)?;

        let mut state = self.live()?;
        let line_state = state
            .lines
            .get_mut(&(proc_id, line))
            .ok_or(NotifyError::DriverNotInitialized)?;

        let slot = &mut line_state.callbacks[index];
        if slot.is_some() {
            log_warn!(LOG_ORIGIN, "{}: event {:#x} on proc {} already registered", self.name, event, proc_id);
            return Err(NotifyError::AlreadyExists);
        }
        *slot = Some(callback);
        Ok(())
    }

    /// Remove the registration made with exactly `callback`
    pub fn unregister_event(
        &self,
        proc_id: ProcId,
        line: LineId,
        event: EventNo,
        callback: &NotifyCallback,
    ) -> Result<(), NotifyError> {
        self.check_line(line)?;
        let index = self.event_index(event)?;
        self.check_reserved(event)?;

        let mut state = self.live()?;
        let line_state = state
            .lines
            .get_mut(&(proc_id, line))
            .ok_or(NotifyError::DriverNotInitialized)?;

        let slot = &mut line_state.callbacks[index];
        if !matches!(slot, Some(existing) if Arc::ptr_eq(existing, callback)) {
            return Err(NotifyError::NotFound);
        }
        *slot = None;
        line_state.chart[index].flag = false;
        Ok(())
    }

    pub fn is_registered(&self, proc_id: ProcId, line: LineId, event: EventNo) -> bool {
        let Ok(index) = self.event_index(event) else {
            return false;
        };
        let Ok(state) = self.live() else {
            return false;
        };
        state
            .lines
            .get(&(proc_id, line))
            .is_some_and(|line_state| line_state.callbacks[index].is_some())
    }

    /// Raise `event` on line `line` of processor `proc_id` with a one-word
    /// payload.
    ///
    /// The event lands in the destination driver's chart for (own proc,
    /// line); sending to the local processor is a loopback. With
    /// `wait_clear` a still-pending earlier flag is polled until it clears,
    /// otherwise the flag and payload are simply overwritten.
    pub fn send_event(
        &self,
        proc_id: ProcId,
        line: LineId,
        event: EventNo,
        payload: u32,
        wait_clear: bool,
    ) -> Result<(), NotifyError> {
        self.check_line(line)?;
        let index = self.event_index(event)?;
        drop(self.live()?);

        let peer;
        let target: &NotifyDriver = if proc_id == self.proc_id {
            self
        } else {
            peer = self.peer(proc_id).ok_or_else(|| {
                log_debug!(LOG_ORIGIN, "{}: no driver linked for proc {}", self.name, proc_id);
                NotifyError::DriverNotInitialized
            })?;
            &peer
        };

        let max_polls = wait_clear.then_some(self.config.send_event_poll_count);
        target.raise((self.proc_id, line), index, event, payload, max_polls)
    }

    /// Set the flag for `source` in this driver's chart and deliver it unless
    /// the driver is disabled. `max_polls` bounds the wait for an earlier
    /// flag; the pending check and the store happen under one lock hold.
    fn raise(
        &self,
        source: LineKey,
        index: usize,
        event: EventNo,
        payload: u32,
        max_polls: Option<u32>,
    ) -> Result<(), NotifyError> {
        let mut polls = 0;
        let pending = loop {
            let mut state = self.state.lock();
            if state.destroyed {
                return Err(NotifyError::DriverNotInitialized);
            }
            let disabled = !state.disable_stack.is_empty();
            let line_state = state.lines.get_mut(&source).ok_or(NotifyError::DriverNotInitialized)?;
            // The sender checked against its own event count
            if index >= line_state.chart.len() {
                return Err(NotifyError::InvalidArgument);
            }

            if let Some(max_polls) = max_polls.filter(|_| line_state.chart[index].flag) {
                drop(state);
                if polls >= max_polls {
                    log_debug!(LOG_ORIGIN, "{}: event {:#x} still pending after {} polls", self.name, event, polls);
                    return Err(NotifyError::Timeout);
                }
                polls += 1;
                std::thread::yield_now();
                continue;
            }

            let Some(callback) = line_state.callbacks[index].clone() else {
                return Err(NotifyError::NotReady);
            };
            if !line_state.enabled(index) {
                return Err(NotifyError::NotReady);
            }

            let slot = &mut line_state.chart[index];
            slot.flag = true;
            slot.event = event;
            slot.payload = payload;

            if disabled {
                log_debug!(LOG_ORIGIN, "{}: event {:#x} latched while disabled", self.name, event);
                return Ok(());
            }

            slot.flag = false;
            break Pending {
                source,
                event,
                payload,
                callback,
            };
        };

        pending.deliver();
        Ok(())
    }

    /// Mask every event of this driver and snapshot the per-event masks
    pub fn disable(&self) -> Result<DisableKey, NotifyError> {
        let mut state = self.live()?;
        let key = DisableKey(state.next_key);
        state.next_key = state.next_key.wrapping_add(1);

        let snapshot = state
            .lines
            .iter()
            .map(|(line, line_state)| (*line, line_state.enable_mask))
            .collect();
        state.disable_stack.push((key, snapshot));
        Ok(key)
    }

    /// Undo the most recent `disable`.
    ///
    /// The masks captured by that `disable` are re-applied. When no token
    /// remains outstanding, latched events are delivered.
    pub fn restore(&self, key: DisableKey) -> Result<(), NotifyError> {
        let pending = {
            let mut state = self.live()?;
            match state.disable_stack.last() {
                Some((top, _)) if *top == key => {}
                _ => {
                    log_warn!(LOG_ORIGIN, "{}: restore with out-of-order token {:?}", self.name, key);
                    return Err(NotifyError::InvalidArgument);
                }
            }

            let Some((_, snapshot)) = state.disable_stack.pop() else {
                return Err(NotifyError::InvalidArgument);
            };
            for (line, mask) in snapshot {
                if let Some(line_state) = state.lines.get_mut(&line) {
                    line_state.enable_mask = mask;
                }
            }

            if state.disable_stack.is_empty() {
                Self::take_latched(&mut state)
            } else {
                Vec::new()
            }
        };

        pending.into_iter().for_each(Pending::deliver);
        Ok(())
    }

    fn take_latched(state: &mut DriverState) -> Vec<Pending> {
        let mut pending = Vec::new();
        for (key, line_state) in state.lines.iter_mut() {
            let mask = line_state.enable_mask;
            for (index, slot) in line_state.chart.iter_mut().enumerate() {
                if !slot.flag || mask & (1 << index) == 0 {
                    continue;
                }
                let Some(callback) = line_state.callbacks[index].clone() else {
                    continue;
                };
                slot.flag = false;
                pending.push(Pending {
                    source: *key,
                    event: slot.event,
                    payload: slot.payload,
                    callback,
                });
            }
        }
        pending
    }

    pub fn disable_event(&self, proc_id: ProcId, line: LineId, event: EventNo) -> Result<(), NotifyError> {
        self.set_event_enabled(proc_id, line, event, false)
    }

    pub fn enable_event(&self, proc_id: ProcId, line: LineId, event: EventNo) -> Result<(), NotifyError> {
        self.set_event_enabled(proc_id, line, event, true)
    }

    fn set_event_enabled(&self, proc_id: ProcId, line: LineId, event: EventNo, enabled: bool) -> Result<(), NotifyError> {
        self.check_line(line)?;
        let index = self.event_index(event)?;
        let mut state = self.live()?;
        let line_state = state
            .lines
            .get_mut(&(proc_id, line))
            .ok_or(NotifyError::DriverNotInitialized)?;

        if enabled {
            line_state.enable_mask |= 1 << index;
        } else {
            line_state.enable_mask &= !(1 << index);
        }
        Ok(())
    }

    pub fn is_event_enabled(&self, proc_id: ProcId, line: LineId, event: EventNo) -> Result<bool, NotifyError> {
        let index = self.event_index(event)?;
        let state = self.live()?;
        let line_state = state
            .lines
            .get(&(proc_id, line))
            .ok_or(NotifyError::DriverNotInitialized)?;
        Ok(line_state.enabled(index))
    }

    /// Move the driver to Destroyed
    pub fn exit(&self) -> Result<(), NotifyError> {
        let mut state = self.live()?;
        state.destroyed = true;
        state.lines.clear();
        state.disable_stack.clear();
        drop(state);
        self.peers.lock().clear();
        log_info!(LOG_ORIGIN, "driver '{}' destroyed", self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    const EVT: EventNo = 5;

    // Loopback: proc 0 receiving from itself on line 0
    fn driver() -> Arc<NotifyDriver> {
        let driver = NotifyDriver::init("test", 0, NotifyConfig::default()).unwrap();
        assert_eq!(driver.attach(0, 0), Ok(true));
        driver
    }

    fn counter() -> (Arc<AtomicU32>, NotifyCallback) {
        let hits = Arc::new(AtomicU32::new(0));
        let seen = hits.clone();
        let cb: NotifyCallback = Arc::new(move |_, _, _, payload| {
            seen.fetch_add(payload, Ordering::SeqCst);
        });
        (hits, cb)
    }

    #[test]
    fn test_config_is_validated() {
        let bad_lines = NotifyConfig { num_lines: 5, ..Default::default() };
        assert!(NotifyDriver::init("x", 0, bad_lines).is_err());
        let bad_events = NotifyConfig { num_events: 33, ..Default::default() };
        assert!(NotifyDriver::init("x", 0, bad_events).is_err());
    }

    #[test]
    fn test_attach_is_idempotent() {
        let driver = driver();
        assert_eq!(driver.attach(0, 0), Ok(false));
        assert_eq!(driver.attach(1, 1), Err(NotifyError::InvalidArgument));
        driver.detach(0, 0).unwrap();
        assert_eq!(driver.detach(0, 0), Err(NotifyError::DriverNotInitialized));
    }

    #[test]
    fn test_double_registration_rejected() {
        let driver = driver();
        let (_, cb) = counter();
        driver.register_event(0, 0, EVT, cb.clone()).unwrap();
        assert_eq!(driver.register_event(0, 0, EVT, cb.clone()), Err(NotifyError::AlreadyExists));
        assert!(driver.is_registered(0, 0, EVT));

        let (_, other) = counter();
        assert_eq!(driver.unregister_event(0, 0, EVT, &other), Err(NotifyError::NotFound));
        driver.unregister_event(0, 0, EVT, &cb).unwrap();
        assert!(!driver.is_registered(0, 0, EVT));
    }

    #[test]
    fn test_reserved_and_range_checks() {
        let driver = driver();
        let (_, cb) = counter();
        assert_eq!(driver.register_event(0, 0, 1, cb.clone()), Err(NotifyError::EventReserved));
        driver.register_event(0, 0, (SYSTEM_KEY << 16) | 1, cb.clone()).unwrap();
        assert_eq!(driver.register_event(0, 0, 32, cb.clone()), Err(NotifyError::InvalidArgument));
        assert_eq!(driver.register_event(2, 0, EVT, cb), Err(NotifyError::DriverNotInitialized));
    }

    #[test]
    fn test_loopback_send() {
        let driver = driver();
        assert_eq!(driver.send_event(0, 0, EVT, 1, false), Err(NotifyError::NotReady));
        assert_eq!(driver.send_event(3, 0, EVT, 1, false), Err(NotifyError::DriverNotInitialized));

        let (hits, cb) = counter();
        driver.register_event(0, 0, EVT, cb).unwrap();
        driver.disable_event(0, 0, EVT).unwrap();
        assert_eq!(driver.send_event(0, 0, EVT, 1, false), Err(NotifyError::NotReady));
        driver.enable_event(0, 0, EVT).unwrap();
        driver.send_event(0, 0, EVT, 7, true).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_send_reaches_peer_chart() {
        let host = NotifyDriver::init("host", 0, NotifyConfig::default()).unwrap();
        let dsp = NotifyDriver::init("dsp", 1, NotifyConfig::default()).unwrap();
        assert_eq!(host.send_event(1, 0, EVT, 1, false), Err(NotifyError::DriverNotInitialized));

        host.register_peer(&dsp).unwrap();
        assert_eq!(host.register_peer(&dsp), Err(NotifyError::AlreadyExists));
        assert_eq!(host.register_peer(&host), Err(NotifyError::InvalidArgument));
        assert_eq!(host.send_event(1, 0, EVT, 1, false), Err(NotifyError::DriverNotInitialized));

        dsp.attach(0, 0).unwrap();
        let seen = Arc::new(Mutex::new(None));
        let record = seen.clone();
        let cb: NotifyCallback = Arc::new(move |proc_id, line, event, payload| {
            *record.lock() = Some((proc_id, line, event, payload));
        });
        dsp.register_event(0, 0, EVT, cb).unwrap();

        host.send_event(1, 0, EVT, 9, false).unwrap();
        assert_eq!(*seen.lock(), Some((0, 0, EVT, 9)));

        host.unregister_peer(1).unwrap();
        assert_eq!(host.unregister_peer(1), Err(NotifyError::NotFound));
        assert_eq!(host.send_event(1, 0, EVT, 1, false), Err(NotifyError::DriverNotInitialized));
    }

    #[test]
    fn test_event_outside_peer_range() {
        let host = NotifyDriver::init("host", 0, NotifyConfig::default()).unwrap();
        let small = NotifyConfig { num_events: 8, ..Default::default() };
        let dsp = NotifyDriver::init("dsp", 1, small).unwrap();
        host.register_peer(&dsp).unwrap();
        dsp.attach(0, 0).unwrap();
        assert_eq!(host.send_event(1, 0, 20, 1, false), Err(NotifyError::InvalidArgument));
    }

    #[test]
    fn test_dropped_peer_reads_as_not_initialized() {
        let host = NotifyDriver::init("host", 0, NotifyConfig::default()).unwrap();
        let dsp = NotifyDriver::init("dsp", 1, NotifyConfig::default()).unwrap();
        host.register_peer(&dsp).unwrap();
        drop(dsp);
        assert!(host.peer(1).is_none());
        assert_eq!(host.send_event(1, 0, EVT, 1, false), Err(NotifyError::DriverNotInitialized));
    }

    #[test]
    fn test_latched_events_delivered_on_last_restore() {
        let config = NotifyConfig { send_event_poll_count: 3, ..Default::default() };
        let driver = NotifyDriver::init("latch", 0, config).unwrap();
        driver.attach(0, 0).unwrap();
        let (hits, cb) = counter();
        driver.register_event(0, 0, EVT, cb).unwrap();

        let outer = driver.disable().unwrap();
        let inner = driver.disable().unwrap();
        driver.send_event(0, 0, EVT, 10, false).unwrap();
        assert_eq!(driver.send_event(0, 0, EVT, 20, true), Err(NotifyError::Timeout));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        assert_eq!(driver.restore(outer), Err(NotifyError::InvalidArgument));
        driver.restore(inner).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        driver.restore(outer).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_waiting_senders_do_not_overwrite_each_other() {
        let config = NotifyConfig { send_event_poll_count: u32::MAX, ..Default::default() };
        let driver = NotifyDriver::init("race", 0, config).unwrap();
        driver.attach(0, 0).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let cb: NotifyCallback = Arc::new(move |_, _, _, payload| record.lock().push(payload));
        driver.register_event(0, 0, EVT, cb).unwrap();

        let key = driver.disable().unwrap();
        let senders: Vec<_> = [1, 2]
            .into_iter()
            .map(|payload| {
                let driver = driver.clone();
                std::thread::spawn(move || driver.send_event(0, 0, EVT, payload, true))
            })
            .collect();

        // One sender latches, the other keeps polling until the flag clears
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(seen.lock().len(), 0);
        driver.restore(key).unwrap();

        for sender in senders {
            assert_eq!(sender.join().unwrap(), Ok(()));
        }
        let mut payloads = seen.lock().clone();
        payloads.sort_unstable();
        assert_eq!(payloads, vec![1, 2]);
    }

    #[test]
    fn test_callback_may_reenter_driver() {
        let driver = driver();
        let inner = driver.clone();
        let cb: NotifyCallback = Arc::new(move |proc_id, line, event, _| {
            assert!(inner.is_registered(proc_id, line, event));
        });
        driver.register_event(0, 0, EVT, cb).unwrap();
        driver.send_event(0, 0, EVT, 0, false).unwrap();
    }

    #[test]
    fn test_exit_invalidates_handle() {
        let driver = driver();
        let peer = NotifyDriver::init("peer", 1, NotifyConfig::default()).unwrap();
        driver.register_peer(&peer).unwrap();
        driver.exit().unwrap();
        assert!(driver.peer(1).is_none());
        assert_eq!(driver.send_event(0, 0, EVT, 0, false), Err(NotifyError::HandleInvalid));
        assert_eq!(driver.register_peer(&peer), Err(NotifyError::HandleInvalid));
        assert_eq!(driver.disable(), Err(NotifyError::HandleInvalid));
        assert_eq!(driver.exit(), Err(NotifyError::HandleInvalid));
    }
}
