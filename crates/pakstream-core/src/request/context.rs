use std::collections::VecDeque;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::request::{RequestGraph, RequestId};

/// Wakes the scheduling thread. Cheap to clone and callable from any thread.
///
/// Signals coalesce: any number of wakes before the scheduler waits count once.
#[derive(Debug, Clone)]
pub struct Waker {
    sender: Sender<()>,
}

impl Waker {
    pub fn wake(&self) {
        let _ = self.sender.try_send(());
    }
}

/// Scheduler-side state shared by every stage in a stack.
#[derive(Debug)]
pub struct StreamContext {
    pub graph: RequestGraph,
    prepared: VecDeque<RequestId>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl Default for StreamContext {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamContext {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            graph: RequestGraph::new(),
            prepared: VecDeque::new(),
            wake_tx,
            wake_rx,
        }
    }

    pub fn waker(&self) -> Waker {
        Waker {
            sender: self.wake_tx.clone(),
        }
    }

    /// Hands a prepared request back to the scheduler for queueing at the top stage.
    pub fn push_prepared(&mut self, request: RequestId) {
        self.prepared.push_back(request);
    }

    pub fn pop_prepared(&mut self) -> Option<RequestId> {
        self.prepared.pop_front()
    }

    pub fn prepared_len(&self) -> usize {
        self.prepared.len()
    }

    /// Blocks until woken or `timeout` passes. Returns true when woken.
    pub fn wait_for_wake(&self, timeout: Duration) -> bool {
        self.wake_rx.recv_timeout(timeout).is_ok()
    }

    /// Consumes a pending wake signal without blocking.
    pub fn take_wake(&self) -> bool {
        self.wake_rx.try_recv().is_ok()
    }
}
