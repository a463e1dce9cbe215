//! Pure admission bookkeeping: no tasks, no channels, no clocks.
//!
//! [`QueueState`] is owned by exactly one task (the admission worker), so
//! every mutation is naturally serialised and a drain pass can never be
//! re-entered.  It is generic over the responder `R` each waiting request
//! carries so the worker can use oneshot senders while tests use plain
//! labels.
//!
//! Invariants:
//! * `active.len() <= capacity` after every public call.
//! * A slot id is either waiting or active, never both.
//! * Waiting requests are granted strictly in submission order.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::config::SessionKind;

// ---------------------------------------------------------------------------
// SlotId
// ---------------------------------------------------------------------------

/// Opaque identifier of one admission request and, once granted, of the
/// slot it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(Uuid);

impl SlotId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session_{}", self.0.simple())
    }
}

// ---------------------------------------------------------------------------
// QueueStatus
// ---------------------------------------------------------------------------

/// Point-in-time view of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    pub active_count: usize,
    pub queue_length: usize,
    pub max_concurrent: usize,
}

// ---------------------------------------------------------------------------
// Waiting / Grant / Submission
// ---------------------------------------------------------------------------

/// A request sitting in the waiting collection.
#[derive(Debug)]
pub struct Waiting<R> {
    pub id: SlotId,
    pub kind: SessionKind,
    pub submitted_at: Instant,
    pub responder: R,
}

/// A request that has just been moved into the active set.  The owner of
/// the state must settle `responder` with `id`.
#[derive(Debug)]
pub struct Grant<R> {
    pub id: SlotId,
    pub kind: SessionKind,
    pub submitted_at: Instant,
    pub responder: R,
}

impl<R> From<Waiting<R>> for Grant<R> {
    fn from(w: Waiting<R>) -> Self {
        Self {
            id: w.id,
            kind: w.kind,
            submitted_at: w.submitted_at,
            responder: w.responder,
        }
    }
}

/// Outcome of [`QueueState::submit`].
#[derive(Debug)]
pub enum Submission<R> {
    /// A slot was free; the request is already active.
    Admitted(Grant<R>),
    /// The request was appended to the waiting collection at the 1-based
    /// `position`.
    Queued { id: SlotId, position: usize },
}

// ---------------------------------------------------------------------------
// QueueState
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct QueueState<R> {
    waiting: VecDeque<Waiting<R>>,
    active: HashSet<SlotId>,
    capacity: usize,
}

impl<R> QueueState<R> {
    /// `capacity` is clamped to at least one slot.
    pub fn new(capacity: usize) -> Self {
        Self {
            waiting: VecDeque::new(),
            active: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// Reserve a slot immediately when one is free, otherwise append to the
    /// tail of the waiting collection.
    pub fn submit(&mut self, kind: SessionKind, now: Instant, responder: R) -> Submission<R> {
        let id = SlotId::generate();

        if self.waiting.is_empty() && self.active.len() < self.capacity {
            self.active.insert(id);
            return Submission::Admitted(Grant {
                id,
                kind,
                submitted_at: now,
                responder,
            });
        }

        self.waiting.push_back(Waiting {
            id,
            kind,
            submitted_at: now,
            responder,
        });
        Submission::Queued {
            id,
            position: self.waiting.len(),
        }
    }

    /// Remove `id` from the active set.  Unknown or already-released ids
    /// are a no-op; returns whether anything was removed.
    pub fn release(&mut self, id: &SlotId) -> bool {
        self.active.remove(id)
    }

    /// Admit waiting requests head-first until capacity is reached or the
    /// waiting collection is empty.
    pub fn drain(&mut self) -> Vec<Grant<R>> {
        let mut grants = Vec::new();
        while self.active.len() < self.capacity {
            let Some(next) = self.waiting.pop_front() else {
                break;
            };
            self.active.insert(next.id);
            grants.push(next.into());
        }
        debug_assert!(self.active.len() <= self.capacity);
        grants
    }

    /// Remove every waiting request older than `max_age`, preserving the
    /// relative order of the survivors.
    pub fn sweep(&mut self, now: Instant, max_age: Duration) -> Vec<Waiting<R>> {
        let (stale, fresh): (VecDeque<_>, VecDeque<_>) = self
            .waiting
            .drain(..)
            .partition(|w| now.saturating_duration_since(w.submitted_at) > max_age);
        self.waiting = fresh;
        stale.into_iter().collect()
    }

    /// Empty the waiting collection, e.g. on shutdown.
    pub fn take_waiting(&mut self) -> Vec<Waiting<R>> {
        self.waiting.drain(..).collect()
    }

    pub fn is_active(&self, id: &SlotId) -> bool {
        self.active.contains(id)
    }

    /// 1-based position of a waiting request.
    pub fn position(&self, id: &SlotId) -> Option<usize> {
        self.waiting.iter().position(|w| &w.id == id).map(|p| p + 1)
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            active_count: self.active.len(),
            queue_length: self.waiting.len(),
            max_concurrent: self.capacity,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
