//! Client identity resolution.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use std::net::SocketAddr;

use super::client::ClientId;

/// Default header trusted in proxied mode.
pub const DEFAULT_FORWARDED_HEADER: &str = "x-forwarded-for";

/// Leads identifiers built from non-UTF-8 header bytes. Header values never
/// contain NUL, so escaped keys cannot collide with verbatim ones.
const ESCAPED_MARKER: char = '\0';

#[derive(Debug, Clone)]
enum Source {
    Peer,
    PeerIp,
    Header(HeaderName),
}

/// Derives a [`ClientId`] from an inbound request.
///
/// In direct mode the peer address reported by the transport is used as is,
/// port included. In proxied mode the forwarded header is taken verbatim:
/// comma-separated chains are not split, and a missing header yields the
/// empty identifier, which every header-less request then shares.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    source: Source,
}

impl IdentityResolver {
    /// Resolve identities from the transport peer address (`ip:port`).
    pub fn direct() -> Self {
        Self {
            source: Source::Peer,
        }
    }

    /// Resolve identities from the peer IP alone, so every connection from
    /// one host is the same client.
    pub fn direct_ip() -> Self {
        Self {
            source: Source::PeerIp,
        }
    }

    /// Resolve identities from a trusted forwarded header.
    pub fn proxied(header: HeaderName) -> Self {
        Self {
            source: Source::Header(header),
        }
    }

    /// Resolve the client identifier. Never fails.
    pub fn resolve(&self, peer: Option<SocketAddr>, headers: &HeaderMap) -> ClientId {
        match &self.source {
            Source::Header(name) => headers.get(name).map(header_identity).unwrap_or_default(),
            Source::Peer => peer
                .map(|addr| ClientId::from(addr.to_string()))
                .unwrap_or_default(),
            Source::PeerIp => peer
                .map(|addr| ClientId::from(addr.ip().to_string()))
                .unwrap_or_default(),
        }
    }
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::direct()
    }
}

fn header_identity(value: &HeaderValue) -> ClientId {
    match std::str::from_utf8(value.as_bytes()) {
        Ok(text) => ClientId::from(text),
        Err(_) => {
            let mut escaped = String::from(ESCAPED_MARKER);
            escaped.push_str(&value.as_bytes().escape_ascii().to_string());
            ClientId::from(escaped)
        }
    }
}
