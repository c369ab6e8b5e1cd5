//! Edge tier
//!
//! Request-time enforcement in front of the application: a middleware that
//! resolves the session from the cookie and applies the gate before any page
//! is rendered, plus the server that hosts the auth endpoints.

mod guard;
mod pages;
mod router;
mod server;

pub use guard::{EdgeGuard, edge_guard_middleware};
pub use router::{AUTH_STATE_HEADER, EdgeState, create_router};
pub use server::EdgeServer;
