//! # Action Queue
//!
//! Requests waiting for an execution slot. Selection order is priority (highest first), then
//! ready time (scheduled time, or creation time for unscheduled requests), then submission
//! order. Requests whose scheduled time is still in the future stay queued, and expired
//! requests are handed back for the caller to mark `expired`.
//!
//! The queue is not synchronized; the scheduler owns it behind its state lock.

use crate::error::{ActionError, Result};
use crate::models::ActionRequest;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct QueuedAction {
    request: Arc<ActionRequest>,
    sequence: u64,
}

/// Result of one selection pass
#[derive(Debug, Default)]
pub struct QueueSelection {
    /// Removed because their expiry passed while waiting
    pub expired: Vec<Arc<ActionRequest>>,
    /// Removed for dispatch, in dispatch order
    pub dispatched: Vec<Arc<ActionRequest>>,
}

#[derive(Debug, Default)]
pub struct ActionQueue {
    entries: Vec<QueuedAction>,
    next_sequence: u64,
    /// `None` means unbounded
    capacity: Option<usize>,
}

impl ActionQueue {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: Vec::new(),
            next_sequence: 0,
            capacity,
        }
    }

    /// Admit a new submission, rejecting it when the queue is full
    pub fn push(&mut self, request: Arc<ActionRequest>) -> Result<()> {
        if let Some(capacity) = self.capacity {
            if self.entries.len() >= capacity {
                return Err(ActionError::QueueFull { capacity });
            }
        }
        self.push_unchecked(request);
        Ok(())
    }

    /// Re-queue a request whose retry delay elapsed. Already-admitted work is never refused.
    pub fn push_retry(&mut self, request: Arc<ActionRequest>) {
        self.push_unchecked(request);
    }

    fn push_unchecked(&mut self, request: Arc<ActionRequest>) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push(QueuedAction { request, sequence });
    }

    pub fn remove(&mut self, request_id: Uuid) -> Option<Arc<ActionRequest>> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.request.id == request_id)?;
        Some(self.entries.remove(index).request)
    }

    pub fn get(&self, request_id: Uuid) -> Option<Arc<ActionRequest>> {
        self.entries
            .iter()
            .find(|entry| entry.request.id == request_id)
            .map(|entry| entry.request.clone())
    }

    pub fn contains(&self, request_id: Uuid) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.request.id == request_id)
    }

    /// Drop expired entries and remove up to `free_slots` due entries in dispatch order
    pub fn take_ready(&mut self, now: DateTime<Utc>, free_slots: usize) -> QueueSelection {
        let mut selection = QueueSelection::default();
        let mut due: Vec<QueuedAction> = Vec::new();
        let mut waiting: Vec<QueuedAction> = Vec::with_capacity(self.entries.len());

        for entry in self.entries.drain(..) {
            if entry.request.is_expired(now) {
                selection.expired.push(entry.request);
            } else if entry.request.is_due(now) {
                due.push(entry);
            } else {
                waiting.push(entry);
            }
        }

        due.sort_by(|a, b| {
            b.request
                .priority
                .cmp(&a.request.priority)
                .then_with(|| a.request.ready_at().cmp(&b.request.ready_at()))
                .then_with(|| a.sequence.cmp(&b.sequence))
        });

        let take = free_slots.min(due.len());
        let remaining = due.split_off(take);
        selection.dispatched = due.into_iter().map(|entry| entry.request).collect();

        waiting.extend(remaining);
        waiting.sort_by_key(|entry| entry.sequence);
        self.entries = waiting;

        selection
    }

    /// Empty the queue, oldest submission first
    pub fn drain(&mut self) -> Vec<Arc<ActionRequest>> {
        self.entries.sort_by_key(|entry| entry.sequence);
        self.entries.drain(..).map(|entry| entry.request).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}
