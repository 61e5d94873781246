//! Per-item outcomes and the result store
//!
//! The result store is a fixed-length slot array aligned with collection
//! indices. Each slot starts `Pending` and moves to exactly one terminal
//! outcome, written by bypass reconciliation, by the single worker that
//! dequeued the item, or by the coordinator's lost-item sweep.

use crate::backup::ArtifactRef;
use crate::error::{ItemError, StoreError, StoreResult};
use parking_lot::Mutex;
use std::time::Duration;

/// Processing state of one item
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// Not processed (yet)
    Pending,

    /// Reused from an artifact persisted by an earlier run
    Bypassed { artifact: ArtifactRef, value: T },

    /// Operation completed in this run
    Success(T),

    /// Operation exceeded the per-item deadline
    TimedOut { after: Duration },

    /// Operation reported an error
    Failed(ItemError),

    /// Item was dequeued but its worker died before recording anything
    Lost,
}

impl<T> Outcome<T> {
    /// Check if this outcome is final
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Pending)
    }

    /// Short label for logs and reports
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Pending => "pending",
            Outcome::Bypassed { .. } => "bypassed",
            Outcome::Success(_) => "success",
            Outcome::TimedOut { .. } => "timed_out",
            Outcome::Failed(_) => "failed",
            Outcome::Lost => "lost",
        }
    }

    /// The successful value, whether computed now or reused
    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Success(value) | Outcome::Bypassed { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Consume the outcome, keeping only a successful value
    pub fn into_value(self) -> Option<T> {
        match self {
            Outcome::Success(value) | Outcome::Bypassed { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Aggregate counts over the result store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub total: usize,
    pub success: usize,
    pub timed_out: usize,
    pub failed: usize,
    pub bypassed: usize,
    pub pending: usize,
    pub lost: usize,
}

impl StatusSnapshot {
    /// Items that had to be (or still have to be) processed in this run
    pub fn attempted_total(&self) -> usize {
        self.total - self.bypassed
    }

    /// Items that ended badly: timed out, failed or lost
    pub fn failures(&self) -> usize {
        self.timed_out + self.failed + self.lost
    }

    /// Fraction of non-bypassed items that succeeded
    pub fn success_rate(&self) -> f64 {
        match self.attempted_total() {
            0 => 0.0,
            n => self.success as f64 / n as f64,
        }
    }

    /// Fraction of non-bypassed items that failed
    pub fn failure_rate(&self) -> f64 {
        match self.attempted_total() {
            0 => 0.0,
            n => self.failures() as f64 / n as f64,
        }
    }

    /// Check if no item is left pending
    pub fn is_complete(&self) -> bool {
        self.pending == 0
    }
}

/// Fixed-length, index-aligned outcome slots
#[derive(Debug)]
pub struct ResultStore<T> {
    slots: Mutex<Vec<Outcome<T>>>,
}

impl<T> ResultStore<T> {
    /// Create a store with `len` pending slots
    pub fn new(len: usize) -> Self {
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, || Outcome::Pending);
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Check if the store has no slots
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Record the terminal outcome for `index`
    ///
    /// Fails if the slot is already terminal: a slot has exactly one writer.
    pub fn set(&self, index: usize, outcome: Outcome<T>) -> StoreResult<()> {
        if !outcome.is_terminal() {
            return Err(StoreError::NotTerminal(index));
        }

        let mut slots = self.slots.lock();
        let len = slots.len();
        let slot = slots
            .get_mut(index)
            .ok_or(StoreError::OutOfRange { index, len })?;

        if slot.is_terminal() {
            return Err(StoreError::AlreadyTerminal {
                index,
                existing: slot.label(),
            });
        }

        *slot = outcome;
        Ok(())
    }

    /// Check if a slot is still pending
    pub fn is_pending(&self, index: usize) -> bool {
        matches!(self.slots.lock().get(index), Some(Outcome::Pending))
    }

    /// Count outcomes by kind
    pub fn snapshot(&self) -> StatusSnapshot {
        let slots = self.slots.lock();
        let mut snapshot = StatusSnapshot {
            total: slots.len(),
            ..Default::default()
        };

        for outcome in slots.iter() {
            match outcome {
                Outcome::Pending => snapshot.pending += 1,
                Outcome::Bypassed { .. } => snapshot.bypassed += 1,
                Outcome::Success(_) => snapshot.success += 1,
                Outcome::TimedOut { .. } => snapshot.timed_out += 1,
                Outcome::Failed(_) => snapshot.failed += 1,
                Outcome::Lost => snapshot.lost += 1,
            }
        }

        snapshot
    }

    /// Hand the outcomes back, index-aligned with the collection
    pub fn into_outcomes(self) -> Vec<Outcome<T>> {
        self.slots.into_inner()
    }
}

impl<T: Clone> ResultStore<T> {
    /// Clone the outcome at `index`
    pub fn get(&self, index: usize) -> Option<Outcome<T>> {
        self.slots.lock().get(index).cloned()
    }
}
