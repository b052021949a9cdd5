//! The per-core snoop agent.
//!
//! Each core runs one of these next to its executor. It drains the core's
//! mailbox and applies the snooping half of the MESI protocol to the
//! shared cache: serving read requests out of valid lines, invalidating on
//! read-exclusive traffic, and installing read responses for the executor.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use slog::{debug, trace, Logger};

use crate::cache::{CoreCache, MesiState};
use crate::mailbox::Mail;
use crate::main_memory::MainMemory;
use crate::protocol::{CoreId, Interconnect, MessageKind};
use crate::sim::SimError;

pub struct SnoopAgent {
    core: CoreId,
    cache: Arc<CoreCache>,
    memory: Arc<MainMemory>,
    fabric: Arc<Interconnect>,
    idle: Duration,
    log: Logger,
}

impl SnoopAgent {
    pub fn new(
        core: CoreId,
        cache: Arc<CoreCache>,
        memory: Arc<MainMemory>,
        fabric: Arc<Interconnect>,
        idle: Duration,
        log: Logger,
    ) -> SnoopAgent {
        SnoopAgent {
            core,
            cache,
            memory,
            fabric,
            idle,
            log,
        }
    }

    /// Poll the mailbox until a STOP arrives. An empty mailbox idles for
    /// the configured poll interval; pending messages are drained without
    /// sleeping in between.
    pub fn run(self) -> Result<(), SimError> {
        loop {
            let mail = match self.fabric.mailbox(self.core).take() {
                Some(mail) => mail,
                None => {
                    thread::sleep(self.idle);
                    continue;
                }
            };
            if !self.handle(mail)? {
                debug!(self.log, "snoop agent stopping");
                return Ok(());
            }
        }
    }

    /// Dispatch one message. Returns `false` once a STOP has been seen.
    pub fn handle(&self, mail: Mail) -> Result<bool, SimError> {
        match mail.kind {
            MessageKind::Stop => return Ok(false),
            MessageKind::ReadRequest => self.serve_read(&mail),
            MessageKind::ReadExclusive => self.invalidate(&mail)?,
            MessageKind::ReadResponse => self.accept_fill(&mail),
        }
        Ok(true)
    }

    /// Another cache missed on `mail.address`. If we hold it, reply with
    /// our copy and demote to SHARED; otherwise consume silently.
    fn serve_read(&self, mail: &Mail) {
        let value = {
            let mut store = self.cache.lock();
            let line = store.slot_mut(mail.address);
            if !line.holds(mail.address) {
                return;
            }
            if line.state == MesiState::Modified || line.state == MesiState::Exclusive {
                line.state = MesiState::Shared;
            }
            line.value
        };
        trace!(self.log, "serving read request";
               "address" => %mail.address, "requester" => mail.sender);
        self.fabric.read_response(mail.sender, self.core, mail.address, value);
    }

    /// Another cache is taking ownership of `mail.address`. A MODIFIED
    /// copy is written back before the line is dropped so the owner-to-be
    /// never hides the last committed value.
    fn invalidate(&self, mail: &Mail) -> Result<(), SimError> {
        let mut store = self.cache.lock();
        let line = store.slot_mut(mail.address);
        if !line.holds(mail.address) {
            return Ok(());
        }
        if line.state == MesiState::Modified {
            self.memory.write(line.address, line.value)?;
        }
        line.state = MesiState::Invalid;
        trace!(self.log, "invalidated line"; "address" => %mail.address);
        Ok(())
    }

    /// A reply to our executor's read request: install the payload as a
    /// SHARED copy and wake the executor out of its response window.
    fn accept_fill(&self, mail: &Mail) {
        self.cache.install_shared(mail.address, mail.value);
        trace!(self.log, "installed read response";
               "address" => %mail.address, "value" => mail.value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheLine;
    use crate::main_memory::Address;
    use slog::o;

    fn agent(fabric: &Arc<Interconnect>, memory: &Arc<MainMemory>, core: CoreId) -> SnoopAgent {
        SnoopAgent::new(
            core,
            Arc::new(CoreCache::new(2)),
            Arc::clone(memory),
            Arc::clone(fabric),
            Duration::from_millis(1),
            Logger::root(slog::Discard, o!()),
        )
    }

    fn set_line(agent: &SnoopAgent, address: Address, value: i32, state: MesiState) {
        let mut store = agent.cache.lock();
        *store.slot_mut(address) = CacheLine { address, value, state };
    }

    #[test]
    fn read_request_demotes_and_replies() {
        let fabric = Arc::new(Interconnect::new(2, 4));
        let memory = Arc::new(MainMemory::new(16));
        let snoop = agent(&fabric, &memory, 1);
        set_line(&snoop, Address(4), 9, MesiState::Modified);

        assert!(snoop.handle(Mail::read_request(0, Address(4))).unwrap());

        assert_eq!(snoop.cache.lock().slot(Address(4)).state, MesiState::Shared);
        assert_eq!(
            fabric.mailbox(0).take(),
            Some(Mail::read_response(1, Address(4), 9))
        );
        // No write-back on a plain demotion; memory catches up on eviction.
        assert_eq!(memory.read(Address(4)).unwrap(), 0);
    }

    #[test]
    fn read_request_for_unheld_address_is_consumed_silently() {
        let fabric = Arc::new(Interconnect::new(2, 4));
        let memory = Arc::new(MainMemory::new(16));
        let snoop = agent(&fabric, &memory, 1);

        assert!(snoop.handle(Mail::read_request(0, Address(4))).unwrap());
        assert!(fabric.mailbox(0).is_empty());
    }

    #[test]
    fn invalidation_writes_back_modified_lines() {
        let fabric = Arc::new(Interconnect::new(2, 4));
        let memory = Arc::new(MainMemory::new(16));
        let snoop = agent(&fabric, &memory, 1);
        set_line(&snoop, Address(4), 9, MesiState::Modified);

        assert!(snoop.handle(Mail::read_exclusive(0, Address(4))).unwrap());

        assert_eq!(snoop.cache.lock().slot(Address(4)).state, MesiState::Invalid);
        assert_eq!(memory.read(Address(4)).unwrap(), 9);
    }

    #[test]
    fn invalidation_of_clean_lines_skips_memory() {
        let fabric = Arc::new(Interconnect::new(2, 4));
        let memory = Arc::new(MainMemory::new(16));
        let snoop = agent(&fabric, &memory, 1);
        set_line(&snoop, Address(4), 9, MesiState::Shared);

        assert!(snoop.handle(Mail::read_exclusive(0, Address(4))).unwrap());

        assert_eq!(snoop.cache.lock().slot(Address(4)).state, MesiState::Invalid);
        assert_eq!(memory.read(Address(4)).unwrap(), 0);
    }

    #[test]
    fn invalidation_of_foreign_address_is_a_no_op() {
        let fabric = Arc::new(Interconnect::new(2, 4));
        let memory = Arc::new(MainMemory::new(16));
        let snoop = agent(&fabric, &memory, 1);
        set_line(&snoop, Address(4), 9, MesiState::Exclusive);

        // Address 6 maps to the same slot but does not match the line.
        assert!(snoop.handle(Mail::read_exclusive(0, Address(6))).unwrap());
        assert_eq!(snoop.cache.lock().slot(Address(4)).state, MesiState::Exclusive);
    }

    #[test]
    fn response_installs_shared_copy() {
        let fabric = Arc::new(Interconnect::new(2, 4));
        let memory = Arc::new(MainMemory::new(16));
        let snoop = agent(&fabric, &memory, 1);

        assert!(snoop.handle(Mail::read_response(0, Address(4), 7)).unwrap());

        let store = snoop.cache.lock();
        assert!(store.has_shared(Address(4)));
        assert_eq!(store.slot(Address(4)).value, 7);
    }

    #[test]
    fn stop_ends_the_loop() {
        let fabric = Arc::new(Interconnect::new(2, 4));
        let memory = Arc::new(MainMemory::new(16));
        let snoop = agent(&fabric, &memory, 1);
        assert!(!snoop.handle(Mail::stop(1)).unwrap());
    }
}
