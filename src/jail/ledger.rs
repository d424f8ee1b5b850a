//! Visit ledger: per-client history of recent request instants.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;
use tracing::trace;

use super::client::ClientId;

/// Storage for client visits.
///
/// Implementations must be safe to share across request tasks: concurrent
/// `record` calls for one client must not lose appends, and `count_since`
/// must see a consistent sequence.
pub trait VisitLedger: Send + Sync {
    /// Append a visit at `at` to the client's history.
    fn record(&self, client: &ClientId, at: Instant);

    /// Count visits at or after `since`, and drop everything older.
    ///
    /// Counting and pruning happen as one atomic step. Pruned visits are
    /// gone for good, so callers must query with a cutoff that only moves
    /// forward.
    fn count_since(&self, client: &ClientId, since: Instant) -> usize;

    /// Forget clients with no visit at or after `cutoff`.
    ///
    /// Returns the number of clients removed. Backends that bound their
    /// memory some other way can keep the default no-op.
    fn evict_before(&self, _cutoff: Instant) -> usize {
        0
    }
}

/// In-memory ledger guarded by a single lock.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    visits: Mutex<HashMap<ClientId, Vec<Instant>>>,
}

impl MemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of clients with stored history.
    pub fn client_count(&self) -> usize {
        self.visits.lock().len()
    }

    /// Number of visits currently stored for a client, without pruning.
    #[cfg(test)]
    pub(crate) fn stored_visits(&self, client: &ClientId) -> usize {
        self.visits.lock().get(client).map_or(0, Vec::len)
    }
}

impl VisitLedger for MemoryLedger {
    fn record(&self, client: &ClientId, at: Instant) {
        self.visits
            .lock()
            .entry(client.clone())
            .or_default()
            .push(at);
    }

    fn count_since(&self, client: &ClientId, since: Instant) -> usize {
        let mut visits = self.visits.lock();
        let Some(history) = visits.get_mut(client) else {
            return 0;
        };

        // Visits are appended in time order, so the fresh ones are a suffix.
        let stale = history.partition_point(|visit| *visit < since);
        history.drain(..stale);

        trace!(client = %client, pruned = stale, remaining = history.len(), "Counted visits");
        history.len()
    }

    fn evict_before(&self, cutoff: Instant) -> usize {
        let mut visits = self.visits.lock();
        let before = visits.len();
        visits.retain(|_, history| history.last().is_some_and(|last| *last >= cutoff));
        before - visits.len()
    }
}
