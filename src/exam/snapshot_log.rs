//! Append-only snapshot log.
//!
//! The session owns the [`SnapshotLog`]; the supervision task only ever sees a
//! [`SnapshotProducer`], which can append and nothing else. Sealing the log is
//! part of the `Active -> Finished` transition, after which every append is
//! dropped.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::models::Snapshot;

#[derive(Debug, Default)]
struct LogInner {
    entries: Vec<Snapshot>,
    sealed_at: Option<DateTime<Utc>>,
}

fn lock(inner: &Mutex<LogInner>) -> MutexGuard<'_, LogInner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
pub struct SnapshotLog {
    inner: Arc<Mutex<LogInner>>,
}

impl SnapshotLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn producer(&self) -> SnapshotProducer {
        SnapshotProducer {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Refuse all further appends and return the seal time. Idempotent; the
    /// first seal time sticks. The seal time is raised to the newest entry's
    /// `taken_at`, so no logged snapshot is later than the seal.
    pub fn seal(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let mut guard = lock(&self.inner);
        if let Some(sealed_at) = guard.sealed_at {
            return sealed_at;
        }
        let sealed_at = guard
            .entries
            .iter()
            .map(|snapshot| snapshot.taken_at)
            .fold(at, |latest, taken_at| latest.max(taken_at));
        guard.sealed_at = Some(sealed_at);
        sealed_at
    }

    pub fn sealed_at(&self) -> Option<DateTime<Utc>> {
        lock(&self.inner).sealed_at
    }

    pub fn entries(&self) -> Vec<Snapshot> {
        lock(&self.inner).entries.clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_taken_at(&self) -> Option<DateTime<Utc>> {
        lock(&self.inner).entries.last().map(|s| s.taken_at)
    }
}

/// Append-only handle held by the supervision loop.
#[derive(Debug, Clone)]
pub struct SnapshotProducer {
    inner: Arc<Mutex<LogInner>>,
}

impl SnapshotProducer {
    /// Returns `false` when the snapshot was dropped because the log is sealed.
    pub fn append(&self, snapshot: Snapshot) -> bool {
        let mut guard = lock(&self.inner);
        if guard.sealed_at.is_some() {
            return false;
        }
        guard.entries.push(snapshot);
        true
    }

    pub fn is_sealed(&self) -> bool {
        lock(&self.inner).sealed_at.is_some()
    }
}
