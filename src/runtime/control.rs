//! Control channel between workers and the supervisor
//!
//! A multi-producer single-consumer path: every worker holds a sender and
//! reports its lifecycle over it; the supervisor's entire view of graph
//! state derives from these messages. No other shared mutable state is used
//! for control flow.

use crossbeam_channel::{Receiver, Sender, unbounded};

use super::errors::BlockFault;

/// One worker lifecycle event.
#[derive(Debug, Clone)]
pub enum ControlMessage {
    /// The worker's loop is running
    Started { block: String },
    /// The worker terminated cleanly, having moved `items` items
    Stopped { block: String, items: u64 },
    /// The worker terminated on a fatal `process` error
    Fault { block: String, detail: String },
}

/// Supervisor-side aggregation of control messages.
#[derive(Debug, Clone, Default)]
pub struct Status {
    pub started: usize,
    pub stopped: usize,
    pub faults: Vec<BlockFault>,
}

impl Status {
    /// Workers started but not yet terminated.
    pub fn running(&self) -> usize {
        self.started.saturating_sub(self.stopped + self.faults.len())
    }

    pub(crate) fn absorb(&mut self, message: &ControlMessage) {
        match message {
            ControlMessage::Started { .. } => self.started += 1,
            ControlMessage::Stopped { .. } => self.stopped += 1,
            ControlMessage::Fault { block, detail } => self.faults.push(BlockFault {
                block: block.clone(),
                detail: detail.clone(),
            }),
        }
    }
}

pub(crate) fn channel() -> (Sender<ControlMessage>, Receiver<ControlMessage>) {
    unbounded()
}
