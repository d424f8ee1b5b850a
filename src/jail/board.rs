//! Sentence board: active cooloffs per client.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use super::client::ClientId;

/// Tracks when each sentenced client is released.
///
/// Expired entries stay in the map until overwritten or swept; reads treat
/// them as absent.
#[derive(Debug, Default)]
pub struct SentenceBoard {
    releases: DashMap<ClientId, Instant>,
}

impl SentenceBoard {
    /// Create an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the client is serving a sentence that ends strictly after `now`.
    pub fn is_sentenced(&self, client: &ClientId, now: Instant) -> bool {
        self.releases
            .get(client)
            .is_some_and(|release| *release > now)
    }

    /// Sentence the client until `now + cooloff`, replacing any existing release.
    pub fn impose(&self, client: &ClientId, now: Instant, cooloff: Duration) -> Instant {
        let release = now + cooloff;
        self.releases.insert(client.clone(), release);
        release
    }

    /// Release instant currently stored for a client, expired or not.
    #[cfg(test)]
    pub(crate) fn release_of(&self, client: &ClientId) -> Option<Instant> {
        self.releases.get(client).map(|release| *release)
    }

    /// Remove entries whose release is at or before `now`.
    ///
    /// Those entries already read as not sentenced, so this never changes the
    /// outcome of [`SentenceBoard::is_sentenced`].
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let before = self.releases.len();
        self.releases.retain(|_, release| *release > now);
        before - self.releases.len()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.releases.len()
    }

    /// Whether the board holds no entries.
    pub fn is_empty(&self) -> bool {
        self.releases.is_empty()
    }
}
