//! Simulation wiring.
//!
//! Builds the shared state (memory, caches, mailboxes), spawns the
//! executor/snoop thread pair for every core, streams observations while
//! the traces run, and collects the final report once everything joins.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use slog::{info, o, Logger};
use thiserror::Error;

use crate::cache::{CacheLine, CoreCache};
use crate::executor::{Executor, Observation};
use crate::main_memory::{Address, MainMemory, MemoryError, Value};
use crate::protocol::{CoreId, Interconnect};
use crate::snoop::SnoopAgent;
use crate::trace::{TraceError, TraceSource};

pub const DEFAULT_NUM_CORES: usize = 2;
pub const DEFAULT_CACHE_SIZE: usize = 2;
pub const DEFAULT_MEMORY_SIZE: usize = 24;
/// Idle poll interval of a snoop agent with an empty mailbox.
pub const DEFAULT_SNOOP_IDLE: Duration = Duration::from_millis(5);
/// How long an executor waits for a READ_RES after broadcasting a read
/// request. Comfortably larger than the snoop poll so a single slow agent
/// still makes the window.
pub const DEFAULT_RESPONSE_WINDOW: Duration = Duration::from_millis(205);
/// Grace period between a core's last instruction and its STOP, leaving
/// the snoop agent alive to serve stragglers from slower cores.
pub const DEFAULT_DRAIN_PERIOD: Duration = Duration::from_secs(2);
pub const DEFAULT_MAILBOX_DEPTH: usize = 8;

/// Anything that can take a core (or the whole run) down.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Trace(#[from] TraceError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("core {0} thread panicked")]
    Panicked(CoreId),
}

/// Geometry and pacing of one simulation run.
#[derive(Clone, Debug)]
pub struct SimConfig {
    pub num_cores: usize,
    pub cache_size: usize,
    pub memory_size: usize,
    pub snoop_idle: Duration,
    pub response_window: Duration,
    pub drain_period: Duration,
    /// Pending messages a mailbox can hold. Values below `num_cores` are
    /// raised to it so a full broadcast always fits.
    pub mailbox_depth: usize,
}

impl Default for SimConfig {
    fn default() -> SimConfig {
        SimConfig {
            num_cores: DEFAULT_NUM_CORES,
            cache_size: DEFAULT_CACHE_SIZE,
            memory_size: DEFAULT_MEMORY_SIZE,
            snoop_idle: DEFAULT_SNOOP_IDLE,
            response_window: DEFAULT_RESPONSE_WINDOW,
            drain_period: DEFAULT_DRAIN_PERIOD,
            mailbox_depth: DEFAULT_MAILBOX_DEPTH,
        }
    }
}

/// Everything a finished run leaves behind.
#[derive(Debug)]
pub struct SimReport {
    /// Every observation, in per-core order.
    pub observations: Vec<Observation>,
    /// Final cache lines, indexed by core.
    pub caches: Vec<Vec<CacheLine>>,
    /// Final memory image.
    pub memory: Vec<Value>,
    /// Cells that were ever written.
    pub written: Vec<Address>,
    /// Cores that did not finish their trace, with the reason.
    pub failures: Vec<(CoreId, SimError)>,
    /// Whether every mailbox was drained when the run ended.
    pub quiescent: bool,
}

pub struct Simulation {
    config: SimConfig,
    log: Logger,
    memory: Arc<MainMemory>,
    caches: Vec<Arc<CoreCache>>,
    fabric: Arc<Interconnect>,
}

impl Simulation {
    pub fn new(config: SimConfig, log: Logger) -> Simulation {
        assert!(config.num_cores > 0, "need at least one core");
        let memory = Arc::new(MainMemory::new(config.memory_size));
        let caches = (0..config.num_cores)
            .map(|_| Arc::new(CoreCache::new(config.cache_size)))
            .collect();
        let fabric = Arc::new(Interconnect::new(
            config.num_cores,
            config.mailbox_depth.max(config.num_cores),
        ));
        Simulation {
            config,
            log,
            memory,
            caches,
            fabric,
        }
    }

    /// Main memory, exposed so callers can preload an image before the
    /// run starts.
    pub fn memory(&self) -> &MainMemory {
        &self.memory
    }

    /// Run one trace per core to completion. Observations are handed to
    /// `on_observation` as they arrive; the full set is also collected in
    /// the returned report.
    pub fn run<F>(&self, sources: Vec<TraceSource>, mut on_observation: F) -> SimReport
    where
        F: FnMut(&Observation),
    {
        assert_eq!(
            sources.len(),
            self.config.num_cores,
            "one trace source per core"
        );
        info!(self.log, "starting simulation";
              "cores" => self.config.num_cores,
              "cache_size" => self.config.cache_size,
              "memory_size" => self.config.memory_size);

        let (obs_tx, obs_rx) = mpsc::channel();
        let mut executors = Vec::with_capacity(self.config.num_cores);
        let mut snoops = Vec::with_capacity(self.config.num_cores);

        for (core, source) in sources.into_iter().enumerate() {
            let snoop = SnoopAgent::new(
                core,
                Arc::clone(&self.caches[core]),
                Arc::clone(&self.memory),
                Arc::clone(&self.fabric),
                self.config.snoop_idle,
                self.log.new(o!("core" => core, "task" => "snoop")),
            );
            snoops.push(
                thread::Builder::new()
                    .name(format!("core-{core}-snoop"))
                    .spawn(move || snoop.run())
                    .expect("failed to spawn snoop agent thread"),
            );

            let executor = Executor::new(
                core,
                Arc::clone(&self.caches[core]),
                Arc::clone(&self.memory),
                Arc::clone(&self.fabric),
                obs_tx.clone(),
                self.config.response_window,
                self.config.drain_period,
                self.log.new(o!("core" => core, "task" => "exec")),
            );
            executors.push(
                thread::Builder::new()
                    .name(format!("core-{core}-exec"))
                    .spawn(move || executor.run(source))
                    .expect("failed to spawn executor thread"),
            );
        }
        drop(obs_tx);

        // Stream until every executor has dropped its sender.
        let mut observations = Vec::new();
        for observation in obs_rx {
            on_observation(&observation);
            observations.push(observation);
        }

        let mut failures = Vec::new();
        for (core, handle) in executors.into_iter().enumerate() {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => failures.push((core, err)),
                Err(_) => failures.push((core, SimError::Panicked(core))),
            }
        }
        for (core, handle) in snoops.into_iter().enumerate() {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => failures.push((core, err)),
                Err(_) => failures.push((core, SimError::Panicked(core))),
            }
        }

        info!(self.log, "simulation finished";
              "instructions" => observations.len(),
              "failures" => failures.len());

        SimReport {
            observations,
            caches: self.caches.iter().map(|cache| cache.snapshot()).collect(),
            memory: self.memory.snapshot(),
            written: self.memory.written_cells(),
            failures,
            quiescent: self.fabric.quiescent(),
        }
    }
}
