//! Shared-ownership handle for discovered work items
//!
//! A `WorkItem` wraps one notification payload and is shared between the
//! pool slot and every in-flight consumer copy. The payload is dropped
//! exactly once, when the last handle goes away. Ownership is `Arc`-based,
//! so concurrent clone/drop from any thread is safe without a hand-rolled
//! reference count.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Shared-ownership reference to a unit of work.
///
/// The creating thread is recorded as the item's *owner* and is the thread
/// whose pool reservation the item counts against. Cloning aliases the same
/// payload and keeps the original owner; the owner tag plays no part in
/// payload lifetime.
pub struct WorkItem<T> {
    payload: Arc<T>,
    owner: ThreadId,
}

impl<T> WorkItem<T> {
    /// Wrap a payload, owned by the calling thread
    pub fn new(payload: T) -> Self {
        Self {
            payload: Arc::new(payload),
            owner: thread::current().id(),
        }
    }

    /// Borrow the wrapped payload
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Thread that created this item (backpressure accounting only)
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Number of live handles aliasing this payload (diagnostics only;
    /// stale by the time the caller reads it)
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.payload)
    }
}

impl<T> Clone for WorkItem<T> {
    fn clone(&self) -> Self {
        Self {
            payload: Arc::clone(&self.payload),
            owner: self.owner,
        }
    }
}

impl<T> Deref for WorkItem<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.payload
    }
}

impl<T: fmt::Debug> fmt::Debug for WorkItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("payload", &self.payload)
            .field("owner", &self.owner)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct DropCounter<'a>(&'a AtomicUsize);

    impl Drop for DropCounter<'_> {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_payload_accessible_through_clones() {
        let item = WorkItem::new("notify-123".to_string());
        let copy = item.clone();

        assert_eq!(item.payload(), "notify-123");
        assert_eq!(copy.payload(), "notify-123");
        assert_eq!(item.ref_count(), 2);
    }

    #[test]
    fn test_clone_preserves_owner() {
        let item = WorkItem::new(42u32);
        let from_other_thread = std::thread::spawn({
            let copy = item.clone();
            move || copy.owner()
        })
        .join()
        .unwrap();

        assert_eq!(from_other_thread, item.owner());
    }

    #[test]
    fn test_payload_dropped_exactly_once() {
        let drops = AtomicUsize::new(0);

        let item = WorkItem::new(DropCounter(&drops));
        let a = item.clone();
        let b = a.clone();

        drop(item);
        drop(a);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        drop(b);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
