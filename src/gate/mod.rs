//! The authentication gate
//!
//! Request interceptor, login flow controller, upstream forwarder, and the
//! HTTP server that ties them together.

pub mod cookie;
pub mod interceptor;
pub mod login;
pub mod proxy;
pub mod router;
pub mod server;

pub use router::{AppState, create_router};
pub use server::Gate;
