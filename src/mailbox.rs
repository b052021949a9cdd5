//! Per-core mailboxes.
//!
//! There is no bus object: all coherence traffic lands in the receiving
//! core's mailbox, a small mutex-guarded FIFO drained by that core's snoop
//! agent. Traffic is best-effort; when a mailbox overflows the oldest
//! droppable message is discarded.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::cache::MesiState;
use crate::main_memory::{Address, Value};
use crate::protocol::{CoreId, MessageKind};

/// One bus message as it sits in a mailbox.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mail {
    pub sender: CoreId,
    pub address: Address,
    pub value: Value,
    pub sender_state: MesiState,
    pub kind: MessageKind,
}

impl Mail {
    /// A broadcast asking whoever holds `address` to share it.
    pub fn read_request(sender: CoreId, address: Address) -> Mail {
        Mail {
            sender,
            address,
            value: 0,
            sender_state: MesiState::Invalid,
            kind: MessageKind::ReadRequest,
        }
    }

    /// A point-to-point reply carrying the responder's copy of `address`.
    /// The responder holds the line SHARED once the reply is posted.
    pub fn read_response(sender: CoreId, address: Address, value: Value) -> Mail {
        Mail {
            sender,
            address,
            value,
            sender_state: MesiState::Shared,
            kind: MessageKind::ReadResponse,
        }
    }

    /// A broadcast invalidating every other copy of `address` ahead of a
    /// write; the sender will hold the line MODIFIED.
    pub fn read_exclusive(sender: CoreId, address: Address) -> Mail {
        Mail {
            sender,
            address,
            value: 0,
            sender_state: MesiState::Modified,
            kind: MessageKind::ReadExclusive,
        }
    }

    /// The self-addressed message that retires a snoop agent.
    pub fn stop(sender: CoreId) -> Mail {
        Mail {
            sender,
            address: Address(0),
            value: 0,
            sender_state: MesiState::Invalid,
            kind: MessageKind::Stop,
        }
    }
}

/// A bounded FIFO of bus messages with a single consumer.
pub struct Mailbox {
    depth: usize,
    queue: Mutex<VecDeque<Mail>>,
}

impl Mailbox {
    pub fn new(depth: usize) -> Mailbox {
        assert!(depth >= 2, "mailbox depth must allow a STOP plus traffic");
        Mailbox {
            depth,
            queue: Mutex::new(VecDeque::with_capacity(depth)),
        }
    }

    /// Enqueue `mail`, discarding the oldest message if the box is full.
    /// A queued STOP is never the one discarded: dropping it would leave
    /// the snoop agent polling forever.
    pub fn post(&self, mail: Mail) {
        let mut queue = self.queue.lock().expect("mailbox lock poisoned");
        if queue.len() == self.depth {
            let victim = queue
                .iter()
                .position(|m| m.kind != MessageKind::Stop)
                .unwrap_or(0);
            queue.remove(victim);
        }
        queue.push_back(mail);
    }

    /// Dequeue the oldest pending message, if any.
    pub fn take(&self) -> Option<Mail> {
        let mut queue = self.queue.lock().expect("mailbox lock poisoned");
        queue.pop_front()
    }

    /// Whether the mailbox has no pending messages.
    pub fn is_empty(&self) -> bool {
        let queue = self.queue.lock().expect("mailbox lock poisoned");
        queue.is_empty()
    }
}
