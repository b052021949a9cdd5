//! An educational simulator of a multi-processor write-back cache kept
//! coherent by a snooping MESI protocol.
//!
//! Every simulated core runs two threads against one private
//! direct-mapped cache: an executor walking a trace of loads and stores,
//! and a snoop agent draining the core's mailbox of coherence traffic.
//! There is no bus object; broadcasts are posts into every other core's
//! mailbox, and replies are point-to-point.

pub mod cache;
pub mod executor;
pub mod logging;
pub mod mailbox;
pub mod main_memory;
pub mod protocol;
pub mod sim;
pub mod snoop;
pub mod trace;
