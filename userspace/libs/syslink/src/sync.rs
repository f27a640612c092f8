// Synchronizers
//
// Wait/signal primitives bound to a MessageQ queue. `put` signals after
// every enqueue; the single reader drains the queue completely before it
// waits again, so a binary wake is enough.
//
// Design principles:
// - `SemaphoreSync` is a binary semaphore over std `Mutex` + `Condvar`
// - `NotifySync` wakes a queue on another processor by raising a Notify
//   event through the signalling processor's driver; the receiving side's
//   callback posts the same kind of semaphore
// - `unblock` is sticky: every later wait returns `Unblocked`

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use ipcmgr::{log_debug, log_warn};

use crate::error::NotifyError;
use crate::notify::{EventNo, LineId, NotifyCallback, NotifyDriver};
use crate::ProcId;

const LOG_ORIGIN: &str = "sync";

/// Timeout meaning "wait indefinitely"
pub const FOREVER: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Signaled,
    TimedOut,
    Unblocked,
}

pub trait Synchronizer: Send + Sync {
    /// Block until signalled, unblocked, or `timeout_ms` elapses
    fn wait(&self, timeout_ms: u32) -> WaitStatus;
    fn signal(&self);
    /// Release every current and future waiter
    fn unblock(&self);
}

#[derive(Default)]
struct SemState {
    posted: bool,
    unblocked: bool,
}

/// Binary semaphore
#[derive(Default)]
pub struct SemaphoreSync {
    state: Mutex<SemState>,
    cond: Condvar,
}

impl SemaphoreSync {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Synchronizer for SemaphoreSync {
    fn wait(&self, timeout_ms: u32) -> WaitStatus {
        let deadline = (timeout_ms != FOREVER).then(|| Instant::now() + Duration::from_millis(timeout_ms as u64));
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            if state.unblocked {
                return WaitStatus::Unblocked;
            }
            if state.posted {
                state.posted = false;
                return WaitStatus::Signaled;
            }

            state = match deadline {
                None => self.cond.wait(state).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return WaitStatus::TimedOut;
                    }
                    self.cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn signal(&self) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).posted = true;
        self.cond.notify_one();
    }

    fn unblock(&self) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).unblocked = true;
        self.cond.notify_all();
    }
}

/// Cross-processor synchronizer driven by a Notify event.
///
/// The waiting side constructs it over its own driver, naming the processor
/// that signals. `signal` raises the event from that processor's linked
/// driver towards the waiter's processor, whose callback posts the local
/// semaphore.
pub struct NotifySync {
    driver: Arc<NotifyDriver>,
    proc_id: ProcId,
    line: LineId,
    event: EventNo,
    callback: NotifyCallback,
    sem: Arc<SemaphoreSync>,
}

impl NotifySync {
    pub fn new(driver: Arc<NotifyDriver>, proc_id: ProcId, line: LineId, event: EventNo) -> Result<Self, NotifyError> {
        let sem = Arc::new(SemaphoreSync::new());
        let posted = sem.clone();
        let callback: NotifyCallback = Arc::new(move |_, _, _, _| posted.signal());

        driver.attach(proc_id, line)?;
        driver.register_event(proc_id, line, event, callback.clone())?;
        log_debug!(LOG_ORIGIN, "notify synchronizer on proc {} line {} event {:#x}", proc_id, line, event);

        Ok(Self {
            driver,
            proc_id,
            line,
            event,
            callback,
            sem,
        })
    }
}

impl Synchronizer for NotifySync {
    fn wait(&self, timeout_ms: u32) -> WaitStatus {
        self.sem.wait(timeout_ms)
    }

    fn signal(&self) {
        let waiter = self.driver.proc_id();
        let sender = if self.proc_id == waiter {
            Some(self.driver.clone())
        } else {
            self.driver.peer(self.proc_id)
        };
        let Some(sender) = sender else {
            log_warn!(LOG_ORIGIN, "notify signal: proc {} has no linked driver", self.proc_id);
            return;
        };
        if let Err(err) = sender.send_event(waiter, self.line, self.event, 0, false) {
            log_warn!(LOG_ORIGIN, "notify signal to proc {} failed: {}", waiter, err);
        }
    }

    fn unblock(&self) {
        self.sem.unblock();
    }
}

impl Drop for NotifySync {
    fn drop(&mut self) {
        match self
            .driver
            .unregister_event(self.proc_id, self.line, self.event, &self.callback)
        {
            // Driver already torn down
            Ok(()) | Err(NotifyError::HandleInvalid) => {}
            Err(err) => log_warn!(
                LOG_ORIGIN,
                "notify synchronizer on proc {} event {:#x}: unregister failed: {}",
                self.proc_id,
                self.event,
                err
            ),
        }
    }
}
