//! The coherence protocol glue: message kinds and the mailbox fabric that
//! stands in for a shared snooping bus.

use crate::mailbox::{Mail, Mailbox};
use crate::main_memory::{Address, Value};

/// The id of a simulated core, in `[0, num_cores)`.
pub type CoreId = usize;

/// The kinds of messages exchanged between caches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// A read miss asking other caches for their copy of an address.
    ReadRequest,
    /// The reply to a `ReadRequest`, carrying the line's value.
    ReadResponse,
    /// A read-for-ownership: every other copy of the address must be
    /// invalidated (MODIFIED copies write back first).
    ReadExclusive,
    /// Retires the receiving core's snoop agent. Only ever self-addressed.
    Stop,
}

/// Every core's mailbox, plus the broadcast and reply rules.
///
/// A broadcast posts into the mailbox of every core except the sender;
/// replies are point-to-point back to the requester. When several caches
/// hold an address SHARED they all reply, which is harmless because the
/// replies carry identical payloads.
pub struct Interconnect {
    mailboxes: Vec<Mailbox>,
}

impl Interconnect {
    pub fn new(num_cores: usize, mailbox_depth: usize) -> Interconnect {
        assert!(num_cores > 0, "need at least one core");
        Interconnect {
            mailboxes: (0..num_cores).map(|_| Mailbox::new(mailbox_depth)).collect(),
        }
    }

    pub fn num_cores(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn mailbox(&self, core: CoreId) -> &Mailbox {
        &self.mailboxes[core]
    }

    /// Broadcast a read request for `address` to every core but `from`.
    pub fn read_request(&self, from: CoreId, address: Address) {
        self.broadcast(from, Mail::read_request(from, address));
    }

    /// Broadcast an invalidation of `address` to every core but `from`.
    pub fn read_exclusive(&self, from: CoreId, address: Address) {
        self.broadcast(from, Mail::read_exclusive(from, address));
    }

    /// Reply to core `to` with `from`'s copy of `address`.
    pub fn read_response(&self, to: CoreId, from: CoreId, address: Address, value: Value) {
        self.mailboxes[to].post(Mail::read_response(from, address, value));
    }

    /// Post STOP into `core`'s own mailbox, retiring its snoop agent.
    pub fn stop(&self, core: CoreId) {
        self.mailboxes[core].post(Mail::stop(core));
    }

    /// Whether every mailbox is drained.
    pub fn quiescent(&self) -> bool {
        self.mailboxes.iter().all(Mailbox::is_empty)
    }

    fn broadcast(&self, from: CoreId, mail: Mail) {
        for (core, mailbox) in self.mailboxes.iter().enumerate() {
            if core != from {
                mailbox.post(mail);
            }
        }
    }
}
