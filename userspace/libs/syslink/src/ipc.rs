// Ipc context
//
// Owns one processor's instance of every module and brings them up and
// down in dependency order. Components receive their collaborators from
// here instead of reaching for process-wide state.
//
// Setup order:  NameServer -> Notify -> HeapRegistry -> MessageQ
// Teardown order is the exact reverse. A failure part-way through setup
// tears down the stages already built before the error is returned.
//
// Peers:
// - `attach_peer` wires two in-process contexts together the way a remote
//   processor would be reached: NameServer fan-out, a MessageQ transport,
//   a Notify peer link and a Notify line
// - A failed `attach_peer` releases every piece it had already registered
// - `detach_peer` undoes it

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ipcmgr::{log_error, log_info, log_warn};

use crate::error::{IpcError, MessageQError, NameServerError, NotifyError};
use crate::heap::HeapRegistry;
use crate::messageq::{MessageQ, MessageQConfig};
use crate::nameserver::{LocalRemote, NameServerRegistry};
use crate::notify::{LineId, NotifyConfig, NotifyDriver};
use crate::transport::LoopbackTransport;
use crate::ProcId;

const LOG_ORIGIN: &str = "ipc";

/// Notify line used between attached peers
pub const PEER_LINE: LineId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IpcConfig {
    pub proc_id: ProcId,
    pub notify: NotifyConfig,
    pub messageq: MessageQConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    NameServer,
    Notify,
    Heaps,
    MessageQ,
}

const STAGES: [Stage; 4] = [Stage::NameServer, Stage::Notify, Stage::Heaps, Stage::MessageQ];

#[derive(Default)]
struct Parts {
    name_server: Option<Arc<NameServerRegistry>>,
    notify: Option<Arc<NotifyDriver>>,
    heaps: Option<Arc<HeapRegistry>>,
    messageq: Option<Arc<MessageQ>>,
}

impl Parts {
    fn build(&mut self, stage: Stage, config: &IpcConfig) -> Result<(), IpcError> {
        match stage {
            Stage::NameServer => {
                self.name_server = Some(Arc::new(NameServerRegistry::new(config.proc_id)));
            }
            Stage::Notify => {
                let name = format!("notify{}", config.proc_id);
                self.notify = Some(NotifyDriver::init(&name, config.proc_id, config.notify)?);
            }
            Stage::Heaps => {
                self.heaps = Some(Arc::new(HeapRegistry::new(config.messageq.num_heaps)));
            }
            Stage::MessageQ => {
                let (Some(names), Some(heaps)) = (&self.name_server, &self.heaps) else {
                    return Err(IpcError::InvalidState);
                };
                self.messageq = Some(MessageQ::setup(config.proc_id, config.messageq, names.clone(), heaps.clone())?);
            }
        }
        Ok(())
    }

    /// Undo whatever has been built, last stage first
    fn teardown(&mut self) {
        for stage in STAGES.iter().rev() {
            let result: Result<(), IpcError> = match stage {
                Stage::MessageQ => self.messageq.take().map_or(Ok(()), |mq| mq.destroy().map_err(Into::into)),
                Stage::Heaps => {
                    if let Some(heaps) = self.heaps.take() {
                        heaps.clear();
                    }
                    Ok(())
                }
                Stage::Notify => self.notify.take().map_or(Ok(()), |driver| driver.exit().map_err(Into::into)),
                Stage::NameServer => {
                    if let Some(names) = self.name_server.take() {
                        names.destroy();
                    }
                    Ok(())
                }
            };
            if let Err(err) = result {
                log_error!(LOG_ORIGIN, "teardown of {:?} failed: {}", stage, err);
            }
        }
    }
}

pub struct Ipc {
    proc_id: ProcId,
    name_server: Arc<NameServerRegistry>,
    notify: Arc<NotifyDriver>,
    heaps: Arc<HeapRegistry>,
    messageq: Arc<MessageQ>,
    destroyed: AtomicBool,
}

impl Ipc {
    pub fn setup(config: IpcConfig) -> Result<Self, IpcError> {
        let mut parts = Parts::default();
        for stage in STAGES {
            if let Err(err) = parts.build(stage, &config) {
                log_error!(LOG_ORIGIN, "setup of {:?} failed on proc {}: {}", stage, config.proc_id, err);
                parts.teardown();
                return Err(err);
            }
        }

        let (Some(name_server), Some(notify), Some(heaps), Some(messageq)) =
            (parts.name_server, parts.notify, parts.heaps, parts.messageq)
        else {
            return Err(IpcError::InvalidState);
        };

        log_info!(LOG_ORIGIN, "ipc up on proc {}", config.proc_id);
        Ok(Self {
            proc_id: config.proc_id,
            name_server,
            notify,
            heaps,
            messageq,
            destroyed: AtomicBool::new(false),
        })
    }

    /// Tear every module down in reverse setup order.
    ///
    /// Refused with the MessageQ error while queues are still live; nothing
    /// is torn down in that case.
    pub fn destroy(&self) -> Result<(), IpcError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(IpcError::InvalidState);
        }

        self.messageq.destroy()?;
        self.destroyed.store(true, Ordering::Release);

        let mut rest = Parts {
            name_server: Some(self.name_server.clone()),
            notify: Some(self.notify.clone()),
            heaps: Some(self.heaps.clone()),
            messageq: None,
        };
        rest.teardown();

        log_info!(LOG_ORIGIN, "ipc on proc {} destroyed", self.proc_id);
        Ok(())
    }

    pub fn proc_id(&self) -> ProcId {
        self.proc_id
    }

    pub fn name_server(&self) -> &Arc<NameServerRegistry> {
        &self.name_server
    }

    pub fn notify(&self) -> &Arc<NotifyDriver> {
        &self.notify
    }

    pub fn heaps(&self) -> &Arc<HeapRegistry> {
        &self.heaps
    }

    pub fn messageq(&self) -> &Arc<MessageQ> {
        &self.messageq
    }

    /// Make `peer` reachable from this context
    pub fn attach_peer(&self, peer: &Ipc) -> Result<(), IpcError> {
        if peer.proc_id == self.proc_id {
            return Err(IpcError::InvalidState);
        }

        if !self
            .name_server
            .register_remote(peer.proc_id, Arc::new(LocalRemote::new(&peer.name_server)))
        {
            return Err(NameServerError::AlreadyExists.into());
        }
        if !self
            .messageq
            .register_transport(Arc::new(LoopbackTransport::new(&peer.messageq)), peer.proc_id, 0)
        {
            self.release_remote(peer.proc_id);
            return Err(MessageQError::AlreadyExists.into());
        }
        if let Err(err) = self.link_notify(peer) {
            log_error!(LOG_ORIGIN, "proc {}: notify link to proc {} failed: {}", self.proc_id, peer.proc_id, err);
            self.messageq.unregister_transport(peer.proc_id, 0);
            self.release_remote(peer.proc_id);
            return Err(err.into());
        }

        log_info!(LOG_ORIGIN, "proc {} attached to proc {}", self.proc_id, peer.proc_id);
        Ok(())
    }

    fn link_notify(&self, peer: &Ipc) -> Result<(), NotifyError> {
        self.notify.register_peer(&peer.notify)?;
        if let Err(err) = self.notify.attach(peer.proc_id, PEER_LINE) {
            if let Err(unlink) = self.notify.unregister_peer(peer.proc_id) {
                log_warn!(LOG_ORIGIN, "proc {}: dropping notify peer {} failed: {}", self.proc_id, peer.proc_id, unlink);
            }
            return Err(err);
        }
        Ok(())
    }

    fn release_remote(&self, proc_id: ProcId) {
        if let Err(err) = self.name_server.unregister_remote(proc_id) {
            log_warn!(LOG_ORIGIN, "proc {}: dropping name server remote {} failed: {}", self.proc_id, proc_id, err);
        }
    }

    pub fn detach_peer(&self, proc_id: ProcId) -> Result<(), IpcError> {
        self.messageq.unregister_transport(proc_id, 0);
        self.name_server.unregister_remote(proc_id)?;
        self.notify.unregister_peer(proc_id)?;
        self.notify.detach(proc_id, PEER_LINE)?;
        log_info!(LOG_ORIGIN, "proc {} detached from proc {}", self.proc_id, proc_id);
        Ok(())
    }
}
