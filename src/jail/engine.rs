//! Admission and sentencing decisions.

use axum::http::{HeaderMap, HeaderName, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::board::SentenceBoard;
use super::client::ClientId;
use super::clock::{Clock, SystemClock};
use super::identity::{IdentityResolver, DEFAULT_FORWARDED_HEADER};
use super::ledger::{MemoryLedger, VisitLedger};

/// Default number of requests admitted per window.
const DEFAULT_ALLOWED_REQUESTS: usize = 5;
/// Default trailing window.
const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

/// Settings for a [`Jail`], fixed once the jail is built.
///
/// Zero windows or thresholds are not rejected here; the jail behaves
/// unhelpfully but consistently with them.
#[derive(Debug, Clone)]
pub struct JailConfig {
    /// Requests admitted per window, inclusive
    pub allowed_requests: usize,
    /// Trailing duration over which requests are counted
    pub window: Duration,
    /// How long an offending client stays denied
    pub cooloff: Duration,
    /// Trust `forwarded_header` instead of the peer address
    pub proxied: bool,
    /// Deny without an explanatory body
    pub silent: bool,
    /// Header consulted in proxied mode
    pub forwarded_header: HeaderName,
    /// In direct mode, key clients by peer IP instead of `ip:port`
    pub peer_ip_only: bool,
    /// Status of a denial response that carries the message
    pub deny_status: StatusCode,
}

impl Default for JailConfig {
    fn default() -> Self {
        Self {
            allowed_requests: DEFAULT_ALLOWED_REQUESTS,
            window: DEFAULT_WINDOW,
            cooloff: Duration::ZERO,
            proxied: false,
            silent: false,
            forwarded_header: HeaderName::from_static(DEFAULT_FORWARDED_HEADER),
            peer_ip_only: false,
            deny_status: StatusCode::OK,
        }
    }
}

impl JailConfig {
    /// Create a configuration with no cooloff.
    pub fn new(allowed_requests: usize, window: Duration) -> Self {
        Self {
            allowed_requests,
            window,
            ..Self::default()
        }
    }

    /// Set the cooloff imposed on offending clients.
    pub fn with_cooloff(mut self, cooloff: Duration) -> Self {
        self.cooloff = cooloff;
        self
    }

    /// Identify clients by the forwarded header.
    pub fn proxied(mut self) -> Self {
        self.proxied = true;
        self
    }

    /// Use a non-default forwarded header in proxied mode.
    pub fn with_forwarded_header(mut self, header: HeaderName) -> Self {
        self.forwarded_header = header;
        self
    }

    /// Deny without a response body.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Treat every connection from one peer IP as the same client.
    pub fn by_peer_ip(mut self) -> Self {
        self.peer_ip_only = true;
        self
    }

    /// Answer denials with `status` instead of 200.
    pub fn with_deny_status(mut self, status: StatusCode) -> Self {
        self.deny_status = status;
        self
    }

    fn resolver(&self) -> IdentityResolver {
        if self.proxied {
            IdentityResolver::proxied(self.forwarded_header.clone())
        } else if self.peer_ip_only {
            IdentityResolver::direct_ip()
        } else {
            IdentityResolver::direct()
        }
    }
}

/// Outcome of a single admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Let the request through.
    Admit,
    /// Reject the request, with or without an explanation.
    Deny {
        /// Whether the denial should carry no response body
        silent: bool,
    },
}

impl Verdict {
    /// Whether the request may proceed.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Verdict::Admit)
    }
}

/// Housekeeping results from [`Jail::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Expired sentences removed
    pub sentences: usize,
    /// Idle clients dropped from the visit ledger
    pub clients: usize,
}

/// Request-rate jail.
///
/// Every request is recorded. A client whose visits within the trailing
/// window exceed `allowed_requests` is sentenced for `cooloff`, and every
/// further request during the sentence restarts it from that request's
/// time.
///
/// The stores lock themselves but the decision as a whole is not atomic:
/// two concurrent requests from one client can both be admitted at the
/// threshold.
pub struct Jail {
    config: JailConfig,
    resolver: IdentityResolver,
    ledger: Box<dyn VisitLedger>,
    board: SentenceBoard,
    clock: Arc<dyn Clock>,
    /// No visit can predate this, so it bounds window cutoffs
    opened_at: Instant,
}

impl Jail {
    /// Create a jail with the in-memory ledger and the system clock.
    pub fn new(config: JailConfig) -> Self {
        Self::with_parts(config, Box::new(MemoryLedger::new()), Arc::new(SystemClock))
    }

    /// Create a jail with a custom ledger and time source.
    pub fn with_parts(
        config: JailConfig,
        ledger: Box<dyn VisitLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let opened_at = clock.now();
        Self {
            resolver: config.resolver(),
            config,
            ledger,
            board: SentenceBoard::new(),
            clock,
            opened_at,
        }
    }

    /// The configuration this jail was built with.
    pub fn config(&self) -> &JailConfig {
        &self.config
    }

    /// Resolve the client for a request and decide whether to admit it.
    pub fn decide(&self, peer: Option<SocketAddr>, headers: &HeaderMap) -> Verdict {
        let client = self.resolver.resolve(peer, headers);
        self.decide_for(&client)
    }

    /// Decide whether to admit a request from an already resolved client.
    pub fn decide_for(&self, client: &ClientId) -> Verdict {
        let now = self.clock.now();
        self.ledger.record(client, now);

        if self.board.is_sentenced(client, now) {
            let release = self.board.impose(client, now, self.config.cooloff);
            debug!(client = %client, cooloff = ?self.config.cooloff, ?release, "Sentence extended");
            return self.deny();
        }

        let visits = self.ledger.count_since(client, self.window_start(now));
        trace!(
            client = %client,
            visits = visits,
            allowed = self.config.allowed_requests,
            "Checking visit count"
        );

        if visits <= self.config.allowed_requests {
            return Verdict::Admit;
        }

        self.board.impose(client, now, self.config.cooloff);
        debug!(
            client = %client,
            visits = visits,
            cooloff = ?self.config.cooloff,
            "Client sentenced"
        );
        self.deny()
    }

    /// Whether the client is currently serving a sentence.
    pub fn is_sentenced(&self, client: &ClientId) -> bool {
        self.board.is_sentenced(client, self.clock.now())
    }

    /// Drop expired sentences and clients with no visit inside the window.
    ///
    /// Only state that can no longer influence a decision is removed.
    pub fn sweep(&self) -> SweepStats {
        let now = self.clock.now();
        let stats = SweepStats {
            sentences: self.board.sweep_expired(now),
            clients: self.ledger.evict_before(self.window_start(now)),
        };
        if stats != SweepStats::default() {
            debug!(
                sentences = stats.sentences,
                clients = stats.clients,
                "Swept stale jail state"
            );
        }
        stats
    }

    /// Number of sentence entries held, expired ones included.
    pub fn sentence_count(&self) -> usize {
        self.board.len()
    }

    fn window_start(&self, now: Instant) -> Instant {
        now.checked_sub(self.config.window)
            .map_or(self.opened_at, |cutoff| cutoff.max(self.opened_at))
    }

    fn deny(&self) -> Verdict {
        Verdict::Deny {
            silent: self.config.silent,
        }
    }
}

impl std::fmt::Debug for Jail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jail")
            .field("config", &self.config)
            .field("sentences", &self.sentence_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jail::clock::MockClock;
    use axum::http::HeaderValue;

    const SECOND: Duration = Duration::from_secs(1);

    fn jail_with_clock(config: JailConfig) -> (Jail, MockClock) {
        let clock = MockClock::default();
        let jail = Jail::with_parts(config, Box::new(MemoryLedger::new()), Arc::new(clock.clone()));
        (jail, clock)
    }

    fn deny() -> Verdict {
        Verdict::Deny { silent: false }
    }

    #[test]
    fn test_admits_up_to_threshold_then_sentences() {
        let config = JailConfig::new(3, 5 * SECOND).with_cooloff(5 * SECOND);
        let (jail, _clock) = jail_with_clock(config);
        let client = ClientId::from("1.1.1.1");

        for i in 1..=3 {
            assert_eq!(jail.decide_for(&client), Verdict::Admit, "request {} should be admitted", i);
        }
        assert_eq!(jail.decide_for(&client), deny());
        assert!(jail.is_sentenced(&client));
    }

    #[test]
    fn test_clients_are_judged_separately() {
        let (jail, _clock) = jail_with_clock(JailConfig::new(1, 5 * SECOND).with_cooloff(SECOND));
        let a = ClientId::from("a");
        let b = ClientId::from("b");

        assert!(jail.decide_for(&a).is_admitted());
        assert!(!jail.decide_for(&a).is_admitted());
        assert!(jail.decide_for(&b).is_admitted());
    }

    #[test]
    fn test_window_without_cooloff_recovers() {
        let (jail, clock) = jail_with_clock(JailConfig::new(5, 5 * SECOND));
        let client = ClientId::from("c");

        for _ in 0..5 {
            assert!(jail.decide_for(&client).is_admitted());
        }
        assert_eq!(jail.decide_for(&client), deny());

        // A zero cooloff never leaves an active sentence behind.
        assert!(!jail.is_sentenced(&client));

        clock.advance(5 * SECOND + Duration::from_millis(1));
        assert!(jail.decide_for(&client).is_admitted());
    }

    #[test]
    fn test_window_cutoff_is_inclusive() {
        let (jail, clock) = jail_with_clock(JailConfig::new(1, 5 * SECOND));
        let client = ClientId::from("edge");

        assert!(jail.decide_for(&client).is_admitted());

        // The first visit sits exactly on the cutoff and still counts.
        clock.advance(5 * SECOND);
        assert_eq!(jail.decide_for(&client), deny());
    }

    #[test]
    fn test_sentence_blocks_even_when_window_clears() {
        let config = JailConfig::new(1, SECOND).with_cooloff(10 * SECOND);
        let (jail, clock) = jail_with_clock(config);
        let client = ClientId::from("d");

        assert!(jail.decide_for(&client).is_admitted());
        assert_eq!(jail.decide_for(&client), deny());

        // Window is long gone but the sentence is not.
        clock.advance(3 * SECOND);
        assert_eq!(jail.decide_for(&client), deny());
    }

    #[test]
    fn test_offense_during_sentence_restarts_cooloff() {
        let config = JailConfig::new(1, SECOND).with_cooloff(5 * SECOND);
        let (jail, clock) = jail_with_clock(config);
        let client = ClientId::from("e");

        assert!(jail.decide_for(&client).is_admitted());
        assert_eq!(jail.decide_for(&client), deny());

        clock.advance(4 * SECOND);
        assert_eq!(jail.decide_for(&client), deny());

        // Original sentence would have ended by now; the renewed one has not.
        clock.advance(2 * SECOND);
        assert!(jail.is_sentenced(&client));

        clock.advance(3 * SECOND + Duration::from_millis(1));
        assert!(!jail.is_sentenced(&client));
        assert!(jail.decide_for(&client).is_admitted());
    }

    #[test]
    fn test_released_after_quiet_cooloff() {
        let config = JailConfig::new(1, SECOND).with_cooloff(5 * SECOND);
        let (jail, clock) = jail_with_clock(config);
        let client = ClientId::from("f");

        assert!(jail.decide_for(&client).is_admitted());
        assert_eq!(jail.decide_for(&client), deny());

        clock.advance(5 * SECOND);
        assert!(jail.decide_for(&client).is_admitted());
    }

    #[test]
    fn test_documented_walkthrough() {
        let config = JailConfig::new(5, 5 * SECOND).with_cooloff(5 * SECOND);
        let (jail, clock) = jail_with_clock(config);
        let client = ClientId::from("127.0.0.1");
        let step = Duration::from_millis(200);

        for _ in 0..5 {
            assert!(jail.decide_for(&client).is_admitted());
            clock.advance(step);
        }

        // Sixth request inside the window: sentenced until now + 5s.
        assert_eq!(jail.decide_for(&client), deny());

        // Seventh request one second later resets the sentence.
        clock.advance(SECOND);
        assert_eq!(jail.decide_for(&client), deny());

        clock.advance(6 * SECOND);
        assert!(jail.decide_for(&client).is_admitted());
    }

    #[test]
    fn test_silent_denial() {
        let (jail, _clock) = jail_with_clock(JailConfig::new(0, SECOND).silent());
        assert_eq!(
            jail.decide_for(&ClientId::from("g")),
            Verdict::Deny { silent: true }
        );
    }

    #[test]
    fn test_decide_resolves_proxied_identity() {
        let (jail, _clock) = jail_with_clock(JailConfig::new(1, 5 * SECOND).proxied());
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4"));
        let a: SocketAddr = "10.0.0.1:1000".parse().unwrap();
        let b: SocketAddr = "10.0.0.2:1000".parse().unwrap();

        assert!(jail.decide(Some(a), &headers).is_admitted());
        assert!(!jail.decide(Some(b), &headers).is_admitted());
    }

    #[test]
    fn test_decide_direct_identity_uses_peer() {
        let (jail, _clock) = jail_with_clock(JailConfig::new(1, 5 * SECOND));
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4"));
        let a: SocketAddr = "10.0.0.1:1000".parse().unwrap();
        let b: SocketAddr = "10.0.0.2:1000".parse().unwrap();

        assert!(jail.decide(Some(a), &headers).is_admitted());
        assert!(jail.decide(Some(b), &headers).is_admitted());
    }

    #[test]
    fn test_direct_identity_keeps_port() {
        let (jail, _clock) = jail_with_clock(JailConfig::new(1, 5 * SECOND));
        let headers = HeaderMap::new();
        let a: SocketAddr = "10.0.0.1:4000".parse().unwrap();
        let b: SocketAddr = "10.0.0.1:4001".parse().unwrap();

        assert!(jail.decide(Some(a), &headers).is_admitted());
        assert!(jail.decide(Some(b), &headers).is_admitted());
        assert!(!jail.decide(Some(a), &headers).is_admitted());
    }

    #[test]
    fn test_peer_ip_keying_is_opt_in() {
        let config = JailConfig::new(1, 5 * SECOND).with_cooloff(5 * SECOND).by_peer_ip();
        let (jail, _clock) = jail_with_clock(config);
        let headers = HeaderMap::new();
        let a: SocketAddr = "10.0.0.1:4000".parse().unwrap();
        let b: SocketAddr = "10.0.0.1:4001".parse().unwrap();

        assert!(jail.decide(Some(a), &headers).is_admitted());
        assert!(!jail.decide(Some(b), &headers).is_admitted());
        assert!(jail.is_sentenced(&ClientId::from("10.0.0.1")));
    }

    #[test]
    fn test_sweep_does_not_change_verdicts() {
        let config = JailConfig::new(1, SECOND).with_cooloff(2 * SECOND);
        let (jail, clock) = jail_with_clock(config);
        let jailed = ClientId::from("jailed");
        let idle = ClientId::from("idle");

        assert!(jail.decide_for(&idle).is_admitted());
        assert!(jail.decide_for(&jailed).is_admitted());
        assert!(!jail.decide_for(&jailed).is_admitted());

        // Nothing is stale yet.
        assert_eq!(jail.sweep(), SweepStats::default());
        assert!(jail.is_sentenced(&jailed));

        clock.advance(3 * SECOND);
        let stats = jail.sweep();
        assert_eq!(stats.sentences, 1);
        assert_eq!(stats.clients, 2);
        assert_eq!(jail.sentence_count(), 0);

        assert!(jail.decide_for(&jailed).is_admitted());
        assert!(jail.decide_for(&idle).is_admitted());
    }

    #[test]
    fn test_concurrent_decisions_never_exceed_threshold() {
        let jail = Arc::new(Jail::new(JailConfig::new(50, 60 * SECOND).with_cooloff(60 * SECOND)));
        let client = ClientId::from("burst");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let jail = jail.clone();
                let client = client.clone();
                std::thread::spawn(move || {
                    (0..50).filter(|_| jail.decide_for(&client).is_admitted()).count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        // Each admitted request saw its own visit among the first 50 recorded.
        assert!(admitted <= 50, "admitted {}", admitted);
        assert!(jail.is_sentenced(&client));
    }
}
