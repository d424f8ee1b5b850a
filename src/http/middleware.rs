//! Axum middleware that puts the jail in front of a router.

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

use crate::jail::{Jail, Verdict};

/// Body sent to denied clients unless the jail is silent.
pub const DENIAL_MESSAGE: &str =
    "You are doing that too much. Please slow down and try again later.";

/// Admit or deny a request according to the jail.
///
/// The peer address is read from axum's [`ConnectInfo`] extension; serve the
/// router with `into_make_service_with_connect_info::<SocketAddr>()` or every
/// direct-mode request shares the empty identity.
pub async fn jail_middleware(State(jail): State<Arc<Jail>>, req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    match jail.decide(peer, req.headers()) {
        Verdict::Admit => next.run(req).await,
        Verdict::Deny { silent: true } => {
            debug!(peer = ?peer, path = %req.uri().path(), "Request denied silently");
            Response::default()
        }
        Verdict::Deny { silent: false } => {
            debug!(peer = ?peer, path = %req.uri().path(), "Request denied");
            (jail.config().deny_status, DENIAL_MESSAGE).into_response()
        }
    }
}

/// Wrap every route of `router` with the jail.
pub fn protect<S>(router: Router<S>, jail: Arc<Jail>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(jail, jail_middleware))
}
