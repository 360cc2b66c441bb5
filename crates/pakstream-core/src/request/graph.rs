use std::fmt;
use std::time::Instant;

use crate::request::RequestKind;
use crate::types::RequestStatus;
use crate::{Result, StreamError};

/// Generational handle to a node in a [`RequestGraph`].
///
/// A handle outlives its node safely: once the slot is reused the generation
/// no longer matches and every lookup misses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId {
    index: u32,
    generation: u32,
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Who created a request and therefore who frees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOrigin {
    /// Submitted by a caller; stays in the graph until released.
    External,
    /// Synthetic request created by a stage; freed as soon as it finishes.
    Internal,
}

/// Work a stage still has to do when a request finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Raw read issued for the given read slot.
    ReadSlot(usize),
    /// Loose-file probe gating the publication of `synthetic`.
    ExistsProbe { synthetic: RequestId },
}

/// A finished request whose continuation has not run yet.
///
/// The request stays allocated until the owning stage retires it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionRecord {
    pub request: RequestId,
    pub continuation: Continuation,
}

#[derive(Debug)]
struct Node {
    kind: RequestKind,
    parent: Option<RequestId>,
    origin: RequestOrigin,
    status: RequestStatus,
    pending_children: usize,
    child_failed: bool,
    continuation: Option<Continuation>,
    estimated_completion: Option<Instant>,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Arena of requests linked child to parent.
///
/// A parent finishes when its last child is retired, failing if any child
/// failed. Only the scheduling thread touches the graph.
#[derive(Debug, Default)]
pub struct RequestGraph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    completions: Vec<CompletionRecord>,
    live: usize,
}

impl RequestGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live requests.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Allocates a caller-owned request.
    pub fn create(&mut self, kind: RequestKind) -> RequestId {
        self.insert(Node::new(kind, None, RequestOrigin::External))
    }

    /// Allocates a synthetic request, optionally as a child of `parent`.
    pub fn create_internal(
        &mut self,
        parent: Option<RequestId>,
        kind: RequestKind,
    ) -> Result<RequestId> {
        if let Some(parent_id) = parent {
            let parent_node = self.node_mut(parent_id).ok_or(StreamError::UnknownRequest)?;
            parent_node.pending_children += 1;
        }
        Ok(self.insert(Node::new(kind, parent, RequestOrigin::Internal)))
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.node(id).is_some()
    }

    pub fn kind(&self, id: RequestId) -> Option<&RequestKind> {
        self.node(id).map(|node| &node.kind)
    }

    pub fn kind_mut(&mut self, id: RequestId) -> Option<&mut RequestKind> {
        self.node_mut(id).map(|node| &mut node.kind)
    }

    pub fn status(&self, id: RequestId) -> Option<RequestStatus> {
        self.node(id).map(|node| node.status)
    }

    pub fn set_status(&mut self, id: RequestId, status: RequestStatus) {
        if let Some(node) = self.node_mut(id) {
            node.status = status;
        }
    }

    pub fn parent(&self, id: RequestId) -> Option<RequestId> {
        self.node(id).and_then(|node| node.parent)
    }

    pub fn set_continuation(&mut self, id: RequestId, continuation: Continuation) -> Result<()> {
        let node = self.node_mut(id).ok_or(StreamError::UnknownRequest)?;
        node.continuation = Some(continuation);
        Ok(())
    }

    pub fn estimated_completion(&self, id: RequestId) -> Option<Instant> {
        self.node(id).and_then(|node| node.estimated_completion)
    }

    /// Records an estimate on `id` and every ancestor.
    pub fn set_estimated_completion(&mut self, id: RequestId, at: Instant) {
        let mut current = Some(id);
        while let Some(current_id) = current {
            match self.node_mut(current_id) {
                Some(node) => {
                    node.estimated_completion = Some(at);
                    current = node.parent;
                }
                None => break,
            }
        }
    }

    /// Finishes `id` with `status`.
    ///
    /// A request with a continuation is parked as a [`CompletionRecord`] for the
    /// owning stage; anything else is retired immediately, which may in turn
    /// finish its parent.
    pub fn complete(&mut self, id: RequestId, status: RequestStatus) -> bool {
        let Some(node) = self.node_mut(id) else {
            tracing::warn!(request = %id, "completion for unknown request ignored");
            return false;
        };
        node.status = status;
        match node.continuation.take() {
            Some(continuation) => {
                self.completions.push(CompletionRecord {
                    request: id,
                    continuation,
                });
            }
            None => self.retire(id),
        }
        true
    }

    /// Frees a finished internal request and notifies its parent.
    ///
    /// External requests are left in place for their caller to release.
    pub fn retire(&mut self, id: RequestId) {
        let Some(node) = self.node(id) else {
            return;
        };
        if node.origin == RequestOrigin::External {
            return;
        }

        let Some(node) = self.remove(id) else {
            return;
        };
        let Some(parent_id) = node.parent else {
            return;
        };
        let failed = node.status != RequestStatus::Completed;
        let finished = match self.node_mut(parent_id) {
            Some(parent) => {
                parent.pending_children = parent.pending_children.saturating_sub(1);
                parent.child_failed |= failed;
                (parent.pending_children == 0).then_some(parent.child_failed)
            }
            None => None,
        };
        if let Some(child_failed) = finished {
            let status = if child_failed {
                RequestStatus::Failed
            } else {
                RequestStatus::Completed
            };
            self.complete(parent_id, status);
        }
    }

    /// Discards a synthetic chain and returns the external request it was built for.
    ///
    /// Walks up from `id` freeing every internal layer. Parents lose the child
    /// without being completed.
    pub fn reject(&mut self, id: RequestId) -> Option<RequestId> {
        let mut current = id;
        loop {
            match self.node(current)?.origin {
                RequestOrigin::External => return Some(current),
                RequestOrigin::Internal => {
                    let node = self.remove(current)?;
                    let parent_id = node.parent?;
                    if let Some(parent) = self.node_mut(parent_id) {
                        parent.pending_children = parent.pending_children.saturating_sub(1);
                    }
                    current = parent_id;
                }
            }
        }
    }

    /// Removes an external request and hands back its payload.
    pub fn release(&mut self, id: RequestId) -> Result<RequestKind> {
        match self.node(id) {
            Some(node) if node.origin == RequestOrigin::External => {}
            _ => return Err(StreamError::UnknownRequest),
        }
        self.remove(id)
            .map(|node| node.kind)
            .ok_or(StreamError::UnknownRequest)
    }

    /// Drains the completion records produced since the last call.
    pub fn take_completions(&mut self) -> Vec<CompletionRecord> {
        std::mem::take(&mut self.completions)
    }

    pub fn has_completions(&self) -> bool {
        !self.completions.is_empty()
    }

    fn insert(&mut self, node: Node) -> RequestId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return RequestId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        RequestId {
            index,
            generation: 0,
        }
    }

    fn remove(&mut self, id: RequestId) -> Option<Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Some(node)
    }

    fn node(&self, id: RequestId) -> Option<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, id: RequestId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }
}

impl Node {
    fn new(kind: RequestKind, parent: Option<RequestId>, origin: RequestOrigin) -> Self {
        Self {
            kind,
            parent,
            origin,
            status: RequestStatus::Pending,
            pending_children: 0,
            child_failed: false,
            continuation: None,
            estimated_completion: None,
        }
    }
}
