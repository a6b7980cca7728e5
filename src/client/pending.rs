use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::messaging::message::Response;
use crate::messaging::request_id::RequestId;


struct PendingEntry {
    slot: oneshot::Sender<Response>,
    created_at: Instant,
}

#[derive(Debug, Default)]
pub struct PendingStats {
    pub registered: AtomicU64,
    pub completed: AtomicU64,
    pub removed: AtomicU64,
    pub discarded: AtomicU64,
}

/// Requests that were sent and are waiting for their response, keyed by request id.
///
/// The table is shared by the calling side, which registers and (on timeout) removes entries, and
///  the receiver task, which completes them. Whoever removes an entry first owns it, so each
///  entry is resolved at most once: a late or duplicate response finds no entry and is discarded.
#[derive(Default)]
pub struct PendingRequestTable {
    pending: DashMap<RequestId, PendingEntry>,
    stats: PendingStats,
}

impl PendingRequestTable {
    pub fn new() -> PendingRequestTable {
        Default::default()
    }

    /// Returns `None` if there is already an entry for this id: ids must never be reused.
    pub fn register(&self, request_id: RequestId) -> Option<oneshot::Receiver<Response>> {
        match self.pending.entry(request_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(e) => {
                let (slot, receiver) = oneshot::channel();
                e.insert(PendingEntry {
                    slot,
                    created_at: Instant::now(),
                });
                self.stats.registered.fetch_add(1, Ordering::Relaxed);
                trace!(%request_id, "registered pending request");
                Some(receiver)
            }
        }
    }

    /// Resolves the entry matching the response's request id. Returns `false` if there is no such
    ///  entry, which is always the case for broadcasts since they carry no request id.
    pub fn complete(&self, response: Response) -> bool {
        let Some(request_id) = response.request_id() else {
            self.stats.discarded.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        let Some((_, entry)) = self.pending.remove(&request_id) else {
            self.stats.discarded.fetch_add(1, Ordering::Relaxed);
            debug!(%request_id, "discarding response for unknown or expired request");
            return false;
        };

        let elapsed = entry.created_at.elapsed();
        match entry.slot.send(response) {
            Ok(()) => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                trace!(%request_id, elapsed_ms = elapsed.as_millis() as u64, "completed pending request");
                true
            }
            Err(_) => {
                // the caller stopped waiting between its timeout and removing the entry
                self.stats.discarded.fetch_add(1, Ordering::Relaxed);
                debug!(%request_id, "caller no longer waiting for response");
                false
            }
        }
    }

    /// Removes an entry without resolving it. Returns `false` if it was already gone.
    pub fn remove(&self, request_id: RequestId) -> bool {
        let removed = self.pending.remove(&request_id).is_some();
        if removed {
            self.stats.removed.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Drops entries whose caller stopped waiting without removing its entry, e.g. because the
    ///  waiting future was cancelled. Returns how many were removed.
    pub fn remove_abandoned(&self) -> usize {
        let mut removed = 0;
        self.pending.retain(|request_id, entry| {
            if entry.slot.is_closed() {
                debug!(%request_id, age_ms = entry.created_at.elapsed().as_millis() as u64, "removing abandoned pending request");
                removed += 1;
                false
            }
            else {
                true
            }
        });
        self.stats.removed.fetch_add(removed, Ordering::Relaxed);
        removed as usize
    }

    /// Drops all entries; waiting callers see their result slot closed.
    pub fn clear(&self) -> usize {
        let mut removed = 0;
        self.pending.retain(|_, _| {
            removed += 1;
            false
        });
        self.stats.removed.fetch_add(removed, Ordering::Relaxed);
        removed as usize
    }

    pub fn contains(&self, request_id: RequestId) -> bool {
        self.pending.contains_key(&request_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use super::*;

    fn id(n: u128) -> RequestId {
        RequestId::from_u128(n)
    }

    #[tokio::test]
    async fn test_complete_resolves_once() {
        let table = PendingRequestTable::new();
        let receiver = table.register(id(1)).unwrap();

        assert!(table.complete(Response::normal(id(1), "first")));
        assert!(!table.complete(Response::normal(id(1), "second")));
        assert!(table.is_empty());

        assert_eq!(receiver.await.unwrap().message(), "first");
        assert_eq!(table.stats().discarded.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_register_rejects_duplicate_id() {
        let table = PendingRequestTable::new();
        let _receiver = table.register(id(1)).unwrap();
        assert!(table.register(id(1)).is_none());
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_response_does_not_affect_others() {
        let table = PendingRequestTable::new();
        let receiver = table.register(id(1)).unwrap();

        assert!(!table.complete(Response::normal(id(2), "stray")));
        assert!(table.contains(id(1)));

        assert!(table.complete(Response::normal(id(1), "mine")));
        assert_eq!(receiver.await.unwrap().message(), "mine");
    }

    #[test]
    fn test_broadcast_never_resolves() {
        let table = PendingRequestTable::new();
        let _receiver = table.register(id(1)).unwrap();

        assert!(!table.complete(Response::broadcast("bob: hi")));
        assert!(table.contains(id(1)));
    }

    #[tokio::test]
    async fn test_removed_entry_is_not_resolved() {
        let table = PendingRequestTable::new();
        let receiver = table.register(id(1)).unwrap();

        assert!(table.remove(id(1)));
        assert!(!table.remove(id(1)));
        assert!(!table.complete(Response::normal(id(1), "late")));
        assert!(receiver.await.is_err());
    }

    #[test]
    fn test_complete_after_caller_gave_up() {
        let table = PendingRequestTable::new();
        let receiver = table.register(id(1)).unwrap();
        drop(receiver);

        assert!(!table.complete(Response::normal(id(1), "late")));
        assert!(table.is_empty());
    }

    #[test]
    fn test_remove_abandoned() {
        let table = PendingRequestTable::new();
        let abandoned = table.register(id(1)).unwrap();
        let _waiting = table.register(id(2)).unwrap();
        drop(abandoned);

        assert_eq!(table.remove_abandoned(), 1);
        assert!(!table.contains(id(1)));
        assert!(table.contains(id(2)));
        assert_eq!(table.remove_abandoned(), 0);
        assert_eq!(table.stats().removed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_clear_counts_removed_entries() {
        let table = PendingRequestTable::new();
        let mut a = table.register(id(1)).unwrap();
        let _b = table.register(id(2)).unwrap();

        assert_eq!(table.clear(), 2);
        assert!(table.is_empty());
        assert_eq!(table.stats().removed.load(Ordering::Relaxed), 2);
        assert!(a.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_and_complete() {
        let table = Arc::new(PendingRequestTable::new());

        let receivers = (0..1000u128)
            .map(|n| (n, table.register(id(n)).unwrap()))
            .collect::<Vec<_>>();

        let completer = {
            let table = table.clone();
            tokio::spawn(async move {
                for n in (0..1000u128).rev() {
                    assert!(table.complete(Response::normal(id(n), n.to_string())));
                }
            })
        };

        for (n, receiver) in receivers {
            assert_eq!(receiver.await.unwrap().message(), n.to_string());
        }
        completer.await.unwrap();
        assert!(table.is_empty());
    }
}
