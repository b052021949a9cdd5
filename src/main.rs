//! Process entry point: CLI parsing, logging setup, simulation launch.

use std::iter;
use std::path::PathBuf;
use std::process;

use chrono::Utc;
use clap::{Arg, ArgAction, Command};
use slog::{debug, error, info};
use sloggers::types::Severity;

use mesi_sim::cache::MesiState;
use mesi_sim::logging;
use mesi_sim::sim::{SimConfig, Simulation};
use mesi_sim::trace::{TraceFile, TraceSource};

fn main() {
    let matches = Command::new("mesi-sim")
        .about("Simulates multi-core write-back caches kept coherent by a snooping MESI protocol")
        .arg(
            Arg::new("TRACE_DIR")
                .help("Directory holding one input_<core>.txt trace per core")
                .default_value("."),
        )
        .arg(
            Arg::new("cores")
                .long("cores")
                .value_parser(clap::value_parser!(usize))
                .default_value("2")
                .help("Number of simulated cores"),
        )
        .arg(
            Arg::new("cache-size")
                .long("cache-size")
                .value_parser(clap::value_parser!(usize))
                .default_value("2")
                .help("Lines per private cache"),
        )
        .arg(
            Arg::new("memory-size")
                .long("memory-size")
                .value_parser(clap::value_parser!(usize))
                .default_value("24")
                .help("Cells of main memory"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("Increase diagnostic verbosity (repeatable)"),
        )
        .get_matches();

    let trace_dir = PathBuf::from(matches.get_one::<String>("TRACE_DIR").expect("has default"));
    let num_cores = *matches.get_one::<usize>("cores").expect("has default");
    let cache_size = *matches.get_one::<usize>("cache-size").expect("has default");
    let memory_size = *matches.get_one::<usize>("memory-size").expect("has default");
    let level = match matches.get_count("verbose") {
        0 => Severity::Info,
        1 => Severity::Debug,
        _ => Severity::Trace,
    };

    let log = logging::init(level);
    let config = SimConfig {
        num_cores,
        cache_size,
        memory_size,
        ..SimConfig::default()
    };

    let sources: Vec<TraceSource> = (0..num_cores)
        .map(|core| {
            let source: TraceSource = match TraceFile::open(&trace_dir, core) {
                Ok(file) => {
                    debug!(log, "opened trace"; "core" => core, "path" => %file.path().display());
                    Box::new(file)
                }
                Err(err) => {
                    error!(log, "cannot open trace"; "core" => core, "error" => %err);
                    Box::new(iter::once(Err(err)))
                }
            };
            source
        })
        .collect();

    let started = Utc::now();
    let sim = Simulation::new(config, log.clone());
    let report = sim.run(sources, |observation| println!("{observation}"));
    let elapsed = Utc::now() - started;

    info!(log, "run complete";
          "elapsed_ms" => elapsed.num_milliseconds(),
          "instructions" => report.observations.len());

    for (core, lines) in report.caches.iter().enumerate() {
        for line in lines.iter().filter(|line| line.state != MesiState::Invalid) {
            debug!(log, "final cache line";
                   "core" => core,
                   "address" => %line.address,
                   "value" => line.value,
                   "state" => ?line.state);
        }
    }
    for &address in &report.written {
        debug!(log, "memory cell written";
               "address" => %address,
               "value" => report.memory[address.0]);
    }

    if !report.failures.is_empty() {
        for (core, err) in &report.failures {
            error!(log, "core failed"; "core" => *core, "error" => %err);
        }
        process::exit(1);
    }
}
