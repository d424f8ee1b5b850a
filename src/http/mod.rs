//! HTTP adapter: axum middleware and server wiring around the jail.

mod middleware;
mod server;

pub use middleware::{jail_middleware, protect, DENIAL_MESSAGE};
pub use server::HttpServer;
