//! The per-core trace executor.
//!
//! Walks one instruction trace against the core's private cache, invoking
//! the coherence protocol on misses and upgrades. Each executed
//! instruction produces one observation record for the output stream.

use std::fmt;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use slog::{debug, error, trace, Logger};

use crate::cache::{CacheLine, CacheStore, CoreCache, Lookup, MesiState};
use crate::main_memory::{Address, MainMemory, Value};
use crate::protocol::{CoreId, Interconnect};
use crate::sim::SimError;
use crate::trace::{Instruction, TraceSource};

/// Whether an observation came from a load or a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpKind {
    Read,
    Write,
}

impl OpKind {
    fn mnemonic(self) -> &'static str {
        match self {
            OpKind::Read => "RD",
            OpKind::Write => "WR",
        }
    }
}

/// One executed instruction: the value it produced and the state of the
/// line once the operation completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Observation {
    pub core: CoreId,
    pub kind: OpKind,
    pub address: Address,
    pub value: Value,
    pub state: MesiState,
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Thread {}: {} {}: {} state = {}",
            self.core,
            self.kind.mnemonic(),
            self.address,
            self.value,
            self.state.encode()
        )
    }
}

pub struct Executor {
    core: CoreId,
    cache: Arc<CoreCache>,
    memory: Arc<MainMemory>,
    fabric: Arc<Interconnect>,
    observations: mpsc::Sender<Observation>,
    response_window: Duration,
    drain_period: Duration,
    log: Logger,
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        core: CoreId,
        cache: Arc<CoreCache>,
        memory: Arc<MainMemory>,
        fabric: Arc<Interconnect>,
        observations: mpsc::Sender<Observation>,
        response_window: Duration,
        drain_period: Duration,
        log: Logger,
    ) -> Executor {
        Executor {
            core,
            cache,
            memory,
            fabric,
            observations,
            response_window,
            drain_period,
            log,
        }
    }

    /// Execute the whole trace, then retire the core's snoop agent. The
    /// STOP is preceded by a grace period so in-flight requests from other
    /// cores can still be served, and is posted on error exits too so the
    /// snoop agent never outlives its executor.
    pub fn run(self, instructions: TraceSource) -> Result<(), SimError> {
        let outcome = self.run_trace(instructions);
        if let Err(err) = &outcome {
            error!(self.log, "executor failed"; "error" => %err);
        }
        thread::sleep(self.drain_period);
        self.fabric.stop(self.core);
        outcome
    }

    fn run_trace(&self, instructions: TraceSource) -> Result<(), SimError> {
        let mut executed = 0usize;
        for instruction in instructions {
            let observation = self.execute(instruction?)?;
            trace!(self.log, "executed"; "observation" => %observation);
            self.observations
                .send(observation)
                .expect("observation stream closed");
            executed += 1;
        }
        debug!(self.log, "trace finished"; "instructions" => executed);
        Ok(())
    }

    /// Apply one instruction to the cache, driving the local half of the
    /// MESI state machine.
    pub fn execute(&self, instruction: Instruction) -> Result<Observation, SimError> {
        self.memory.check(instruction.address())?;
        match instruction {
            Instruction::Read { address } => self.read(address),
            Instruction::Write { address, value } => self.write(address, value),
        }
    }

    fn read(&self, address: Address) -> Result<Observation, SimError> {
        let mut store = self.cache.lock();

        if store.classify(address) == Lookup::Hit {
            let line = store.slot(address);
            return Ok(self.observe(OpKind::Read, address, line.value, line.state));
        }

        // Miss: free the slot, ask the other caches, and give them one
        // response window to come back with a SHARED copy.
        self.write_back_victim(&mut store, address)?;
        store.slot_mut(address).state = MesiState::Invalid;
        self.fabric.read_request(self.core, address);
        let mut store = self
            .cache
            .wait_for_share(store, address, self.response_window);

        if store.has_shared(address) {
            let value = store.slot(address).value;
            return Ok(self.observe(OpKind::Read, address, value, MesiState::Shared));
        }

        // Nobody answered, so no other cache holds the line: memory is
        // authoritative and the copy is ours alone.
        let value = self.memory.read(address)?;
        *store.slot_mut(address) = CacheLine {
            address,
            value,
            state: MesiState::Exclusive,
        };
        debug!(self.log, "read served from memory"; "address" => %address);
        Ok(self.observe(OpKind::Read, address, value, MesiState::Exclusive))
    }

    fn write(&self, address: Address, value: Value) -> Result<Observation, SimError> {
        let mut store = self.cache.lock();

        match store.classify(address) {
            Lookup::Hit => {
                let state = store.slot(address).state;
                match state {
                    MesiState::Modified => {
                        let old = store.slot(address).value;
                        self.memory.write(address, old)?;
                        store.slot_mut(address).value = value;
                    }
                    MesiState::Exclusive => {
                        let line = store.slot_mut(address);
                        line.value = value;
                        line.state = MesiState::Modified;
                    }
                    MesiState::Shared => {
                        // Upgrade: take ownership by invalidating every
                        // other copy. The broadcast is fire-and-forget.
                        self.fabric.read_exclusive(self.core, address);
                        let line = store.slot_mut(address);
                        line.value = value;
                        line.state = MesiState::Modified;
                    }
                    MesiState::Invalid => unreachable!("hit on an invalid line"),
                }
            }
            Lookup::AddressMiss | Lookup::ConflictMiss => {
                self.fabric.read_exclusive(self.core, address);
                self.write_back_victim(&mut store, address)?;
                *store.slot_mut(address) = CacheLine {
                    address,
                    value,
                    state: MesiState::Modified,
                };
            }
        }

        Ok(self.observe(OpKind::Write, address, value, MesiState::Modified))
    }

    /// Write the current occupant of `address`'s slot back to memory if it
    /// is a valid MODIFIED or SHARED line. SHARED lines are written back
    /// too: a line demoted out of MODIFIED keeps a value memory has never
    /// seen.
    fn write_back_victim(&self, store: &mut CacheStore, address: Address) -> Result<(), SimError> {
        let victim = *store.slot(address);
        if victim.state == MesiState::Modified || victim.state == MesiState::Shared {
            self.memory.write(victim.address, victim.value)?;
            trace!(self.log, "victim written back";
                   "address" => %victim.address, "value" => victim.value);
        }
        Ok(())
    }

    fn observe(
        &self,
        kind: OpKind,
        address: Address,
        value: Value,
        state: MesiState,
    ) -> Observation {
        Observation {
            core: self.core,
            kind,
            address,
            value,
            state,
        }
    }
}
