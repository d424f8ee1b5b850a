//! Warden - request-rate jail for HTTP services
//!
//! Warden counts each client's requests over a trailing window and jails
//! clients that go over the limit: a jailed client is denied until a cooloff
//! passes with no further requests. Clients are identified by peer address or,
//! behind a proxy, by a trusted forwarded header.

pub mod config;
pub mod error;
pub mod http;
pub mod jail;
