//! Request-rate jail: visit counting, sentencing and client identity.

mod board;
mod client;
mod clock;
mod engine;
mod identity;
mod ledger;

pub use board::SentenceBoard;
pub use client::ClientId;
pub use clock::{Clock, MockClock, SystemClock};
pub use engine::{Jail, JailConfig, SweepStats, Verdict};
pub use identity::{IdentityResolver, DEFAULT_FORWARDED_HEADER};
pub use ledger::{MemoryLedger, VisitLedger};
