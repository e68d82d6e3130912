//! Bounded concurrent work pool
//!
//! The single hand-off point between producer (watcher) and consumer
//! (worker) threads. Producers block once their own outstanding-item count
//! reaches their reservation ceiling; consumers block while the pool is
//! empty. Backpressure is per-owner, never global: one slow producer
//! throttles only itself.
//!
//! Two locks split the state on purpose: the entry deque (scanned by
//! `remove_by_key`/`add_unique`) and the per-owner quota book (the fast
//! counter path) never contend with each other.

use crate::error::{Error, Result};
use crate::handle::WorkItem;
use crate::metrics::{POOL_ADD_TOTAL, POOL_DEPTH, POOL_REMOVE_TOTAL, POOL_SHUTDOWN_TOTAL};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default outstanding-item ceiling applied to a producer thread that never
/// called [`BoundedWorkPool::reserve`]
pub const DEFAULT_RESERVATION: usize = 10;

/// One queued unit of work
struct Entry<T> {
    key: String,
    item: WorkItem<T>,
}

/// Per-owner reservation bookkeeping
#[derive(Default)]
struct QuotaBook {
    /// Outstanding-item ceiling per producer thread
    reservations: HashMap<ThreadId, usize>,
    /// Items currently queued per producer thread
    outstanding: HashMap<ThreadId, usize>,
}

/// Thread-safe bounded FIFO of `(key, WorkItem)` pairs with keyed lookup.
///
/// Created once per logical channel and torn down with [`shutdown`], which
/// is idempotent and wakes every blocked caller. Keys are not required to be
/// unique unless the caller goes through [`add_unique`].
///
/// [`shutdown`]: BoundedWorkPool::shutdown
/// [`add_unique`]: BoundedWorkPool::add_unique
pub struct BoundedWorkPool<T> {
    entries: Mutex<VecDeque<Entry<T>>>,
    quota: Mutex<QuotaBook>,
    /// Signals a freed reservation slot (paired with `quota`)
    space: Condvar,
    /// Signals an appended entry (paired with `entries`)
    items: Condvar,
    /// Signals the pool draining to empty (paired with `entries`)
    drained: Condvar,
    shutdown: AtomicBool,
    default_reservation: usize,
}

impl<T> BoundedWorkPool<T> {
    /// Create a pool with the default reservation ceiling
    pub fn new() -> Self {
        Self::with_default_reservation(DEFAULT_RESERVATION)
    }

    /// Create a pool with a custom default reservation ceiling
    pub fn with_default_reservation(default_reservation: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            quota: Mutex::new(QuotaBook::default()),
            space: Condvar::new(),
            items: Condvar::new(),
            drained: Condvar::new(),
            shutdown: AtomicBool::new(false),
            default_reservation,
        }
    }

    /// Set the outstanding-item ceiling for the calling thread.
    ///
    /// Takes effect for the next `add`; an already-blocked `add` keeps the
    /// ceiling it read when it started waiting.
    pub fn reserve(&self, ceiling: usize) {
        let mut quota = self.quota.lock();
        quota.reservations.insert(thread::current().id(), ceiling);
    }

    /// Append an entry, blocking while the item owner's outstanding count
    /// is at its ceiling.
    ///
    /// Fails with [`Error::ShuttingDown`] if the pool is shut down before
    /// the entry could be queued.
    pub fn add(&self, key: impl Into<String>, item: WorkItem<T>) -> Result<()> {
        let owner = item.owner();

        {
            let mut quota = self.quota.lock();
            let ceiling = *quota
                .reservations
                .entry(owner)
                .or_insert(self.default_reservation);

            loop {
                if self.shutdown.load(Ordering::SeqCst) {
                    return Err(Error::ShuttingDown);
                }
                let used = quota.outstanding.get(&owner).copied().unwrap_or(0);
                if used < ceiling {
                    break;
                }
                self.space.wait(&mut quota);
            }

            *quota.outstanding.entry(owner).or_insert(0) += 1;
        }

        let mut entries = self.entries.lock();
        if self.shutdown.load(Ordering::SeqCst) {
            // Shutdown raced in between the quota grant and the append:
            // hand the slot back before reporting it.
            drop(entries);
            let mut quota = self.quota.lock();
            if let Some(used) = quota.outstanding.get_mut(&owner) {
                *used = used.saturating_sub(1);
            }
            return Err(Error::ShuttingDown);
        }

        entries.push_back(Entry {
            key: key.into(),
            item,
        });
        POOL_DEPTH.set(entries.len() as i64);
        POOL_ADD_TOTAL.with_label_values(&["accepted"]).inc();
        self.items.notify_one();

        Ok(())
    }

    /// As [`add`], but a silent no-op when the key is already queued.
    ///
    /// Returns `true` when the entry was queued, `false` when the new item
    /// was dropped as a duplicate. The duplicate scan and the append are two
    /// separate critical sections, so two producers racing on the same fresh
    /// key can both insert; duplicate suppression is a best-effort policy
    /// for repeated notifications, not a uniqueness guarantee.
    ///
    /// [`add`]: BoundedWorkPool::add
    pub fn add_unique(&self, key: impl Into<String>, item: WorkItem<T>) -> Result<bool> {
        let key = key.into();

        {
            let entries = self.entries.lock();
            if self.shutdown.load(Ordering::SeqCst) {
                return Err(Error::ShuttingDown);
            }
            if entries.iter().any(|e| e.key == key) {
                debug!(key = %key, "duplicate notification dropped");
                POOL_ADD_TOTAL.with_label_values(&["duplicate"]).inc();
                return Ok(false);
            }
        }

        self.add(key, item)?;
        Ok(true)
    }

    /// Pop the head entry, blocking while the pool is empty when `block` is
    /// set.
    ///
    /// Fails with [`Error::Empty`] when non-blocking on an empty pool and
    /// with [`Error::ShuttingDown`] once the pool is shut down.
    pub fn remove_front(&self, block: bool) -> Result<(String, WorkItem<T>)> {
        let entry = {
            let mut entries = self.entries.lock();
            let entry = loop {
                if self.shutdown.load(Ordering::SeqCst) {
                    return Err(Error::ShuttingDown);
                }
                if let Some(entry) = entries.pop_front() {
                    break entry;
                }
                if !block {
                    return Err(Error::Empty);
                }
                self.items.wait(&mut entries);
            };
            POOL_DEPTH.set(entries.len() as i64);
            if entries.is_empty() {
                self.drained.notify_all();
            }
            entry
        };

        POOL_REMOVE_TOTAL.with_label_values(&["front"]).inc();
        self.release_slot(entry.item.owner());
        Ok((entry.key, entry.item))
    }

    /// Remove the first entry with a matching key, out of FIFO order.
    ///
    /// Fails with [`Error::NotFound`] when no entry matches; callers that
    /// treat a miss as benign use [`try_remove_by_key`].
    ///
    /// [`try_remove_by_key`]: BoundedWorkPool::try_remove_by_key
    pub fn remove_by_key(&self, key: &str) -> Result<WorkItem<T>> {
        self.try_remove_by_key(key)?
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    /// As [`remove_by_key`], but a miss returns `Ok(None)`.
    ///
    /// [`remove_by_key`]: BoundedWorkPool::remove_by_key
    pub fn try_remove_by_key(&self, key: &str) -> Result<Option<WorkItem<T>>> {
        let entry = {
            let mut entries = self.entries.lock();
            if self.shutdown.load(Ordering::SeqCst) {
                return Err(Error::ShuttingDown);
            }
            let pos = match entries.iter().position(|e| e.key == key) {
                Some(pos) => pos,
                None => return Ok(None),
            };
            let entry = entries.remove(pos).ok_or_else(|| Error::NotFound(key.to_string()))?;
            POOL_DEPTH.set(entries.len() as i64);
            if entries.is_empty() {
                self.drained.notify_all();
            }
            entry
        };

        POOL_REMOVE_TOTAL.with_label_values(&["keyed"]).inc();
        self.release_slot(entry.item.owner());
        Ok(Some(entry.item))
    }

    /// Like [`remove_front`] but leaves the entry queued, returning a
    /// cloned handle.
    ///
    /// [`remove_front`]: BoundedWorkPool::remove_front
    pub fn peek_front(&self, block: bool) -> Result<(String, WorkItem<T>)> {
        let mut entries = self.entries.lock();
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Err(Error::ShuttingDown);
            }
            if let Some(entry) = entries.front() {
                return Ok((entry.key.clone(), entry.item.clone()));
            }
            if !block {
                return Err(Error::Empty);
            }
            self.items.wait(&mut entries);
        }
    }

    /// Current entry count (best-effort snapshot under lock)
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the pool currently holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Block until the pool is empty.
    ///
    /// Returns `Ok(true)` once drained, `Ok(false)` if the timeout elapsed
    /// first, and [`Error::ShuttingDown`] if the pool was shut down while
    /// waiting.
    pub fn wait_until_empty(&self, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut entries = self.entries.lock();

        while !entries.is_empty() {
            if self.shutdown.load(Ordering::SeqCst) {
                return Err(Error::ShuttingDown);
            }
            match deadline {
                Some(deadline) => {
                    if self.drained.wait_until(&mut entries, deadline).timed_out() {
                        return Ok(entries.is_empty());
                    }
                }
                None => self.drained.wait(&mut entries),
            }
        }

        if self.shutdown.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        Ok(true)
    }

    /// Shut the pool down: idempotent, one-shot, permanent.
    ///
    /// Wakes every thread blocked in `add`/`remove_front`/`peek_front`/
    /// `wait_until_empty`; all such calls fail with
    /// [`Error::ShuttingDown`] from then on. The broadcast has to reach all
    /// waiters because different waiters block for different reasons (empty
    /// pool vs over-reservation).
    pub fn shutdown(&self) {
        {
            let _quota = self.quota.lock();
            if !self.shutdown.swap(true, Ordering::SeqCst) {
                POOL_SHUTDOWN_TOTAL.inc();
            }
            self.space.notify_all();
        }
        {
            let _entries = self.entries.lock();
            self.items.notify_all();
            self.drained.notify_all();
        }
        debug!("work pool shut down");
    }

    /// Whether [`shutdown`] has been called
    ///
    /// [`shutdown`]: BoundedWorkPool::shutdown
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Hand a reservation slot back to `owner` and wake one blocked adder
    fn release_slot(&self, owner: ThreadId) {
        let mut quota = self.quota.lock();
        if let Some(used) = quota.outstanding.get_mut(&owner) {
            *used = used.saturating_sub(1);
        }
        self.space.notify_one();
    }
}

impl<T> Default for BoundedWorkPool<T> {
    fn default() -> Self {
        Self::new()
    }
}
