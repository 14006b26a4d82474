//! Bounded status history with synchronous fan-out.
//!
//! Every status line published anywhere in the process lands here. The
//! broadcaster keeps the most recent [`HISTORY_CAPACITY`] entries (oldest
//! evicted first) and delivers each line to every attached [`Observer`].
//!
//! # Ordering
//!
//! One mutex guards the ring and the observer set, and it is held across the
//! push *and* the fan-out. That gives three properties:
//!
//! - every observer receives lines in the single global publish order;
//! - a line is never split or interleaved with another;
//! - [`Broadcaster::attach`] replays the ring and registers the observer under
//!   the same lock, so a new observer sees history with no gap and no
//!   duplicate relative to live delivery.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::LogEntry;

/// Number of entries replayed to a newly attached observer.
pub const HISTORY_CAPACITY: usize = 20;

/// Lines a channel observer may have queued before it counts as stalled.
pub const OBSERVER_BUFFER: usize = 1024;

pub type ObserverId = u64;

/// Returned by an observer that can no longer accept lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("observer disconnected")]
pub struct ObserverGone;

/// A live subscriber to the status stream.
///
/// `deliver` is called with the broadcaster lock held and must not block.
pub trait Observer: Send {
    fn deliver(&self, line: &str) -> Result<(), ObserverGone>;
}

/// A channel observer whose reader stops draining fills up and is dropped,
/// the same as one whose reader has gone away.
impl Observer for mpsc::Sender<String> {
    fn deliver(&self, line: &str) -> Result<(), ObserverGone> {
        self.try_send(line.to_owned()).map_err(|_| ObserverGone)
    }
}

// ---------------------------------------------------------------------------
// Broadcaster
// ---------------------------------------------------------------------------

struct Inner {
    ring: VecDeque<LogEntry>,
    capacity: usize,
    observers: HashMap<ObserverId, Box<dyn Observer>>,
    next_observer: ObserverId,
    next_seq: u64,
    timezone: chrono_tz::Tz,
}

pub struct Broadcaster {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Broadcaster")
            .field("history", &inner.ring.len())
            .field("observers", &inner.observers.len())
            .field("timezone", &inner.timezone)
            .finish()
    }
}

impl Broadcaster {
    pub fn new(timezone: chrono_tz::Tz) -> Self {
        Self::with_capacity(timezone, HISTORY_CAPACITY)
    }

    pub fn with_capacity(timezone: chrono_tz::Tz, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                ring: VecDeque::with_capacity(capacity),
                capacity,
                observers: HashMap::new(),
                next_observer: 1,
                next_seq: 1,
                timezone,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Zone used to stamp lines published from now on.
    pub fn set_timezone(&self, timezone: chrono_tz::Tz) {
        self.lock().timezone = timezone;
    }

    pub fn timezone(&self) -> chrono_tz::Tz {
        self.lock().timezone
    }

    /// Stamp `message`, append it to the history, and deliver it to every
    /// observer. Observers that fail are dropped; the rest still receive it.
    pub fn publish(&self, message: impl Into<String>) -> LogEntry {
        let mut inner = self.lock();

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let ts = chrono::Utc::now().with_timezone(&inner.timezone);
        let entry = LogEntry::new(seq, ts, message.into());
        tracing::info!(target: "offload::status", "{}", entry.line);

        if inner.ring.len() == inner.capacity {
            inner.ring.pop_front();
        }
        inner.ring.push_back(entry.clone());

        let failed: Vec<ObserverId> = inner
            .observers
            .iter()
            .filter(|(_, observer)| observer.deliver(&entry.line).is_err())
            .map(|(id, _)| *id)
            .collect();
        for id in failed {
            inner.observers.remove(&id);
            tracing::warn!(observer = id, "dropping observer after failed write");
        }

        entry
    }

    /// Replay the current history to `observer`, then register it for live
    /// lines. Fails (and registers nothing) if the replay write fails.
    pub fn attach<O>(&self, observer: O) -> Result<ObserverId, ObserverGone>
    where
        O: Observer + 'static,
    {
        let mut inner = self.lock();
        for entry in &inner.ring {
            observer.deliver(&entry.line)?;
        }
        let id = inner.next_observer;
        inner.next_observer += 1;
        inner.observers.insert(id, Box::new(observer));
        tracing::debug!(observer = id, "observer attached");
        Ok(id)
    }

    /// Attach a channel-backed observer and hand back its receiving end.
    pub fn subscribe(&self) -> Result<(ObserverId, mpsc::Receiver<String>), ObserverGone> {
        self.subscribe_with_buffer(OBSERVER_BUFFER)
    }

    /// Like [`Broadcaster::subscribe`], with room for `buffer` queued lines
    /// (never less than the history it is handed on attach).
    pub fn subscribe_with_buffer(
        &self,
        buffer: usize,
    ) -> Result<(ObserverId, mpsc::Receiver<String>), ObserverGone> {
        let (tx, rx) = mpsc::channel(buffer.max(HISTORY_CAPACITY).max(self.lock().capacity));
        let id = self.attach(tx)?;
        Ok((id, rx))
    }

    /// Idempotent. Returns whether the observer was still attached.
    pub fn detach(&self, id: ObserverId) -> bool {
        let removed = self.lock().observers.remove(&id).is_some();
        if removed {
            tracing::debug!(observer = id, "observer detached");
        }
        removed
    }

    /// Current history, oldest first.
    pub fn history(&self) -> Vec<LogEntry> {
        self.lock().ring.iter().cloned().collect()
    }

    pub fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
