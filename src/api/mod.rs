//! HTTP API surface
//!
//! Route registration plus the handlers that expose the storage engine.
//! Every route is gated by the request-signing authenticator.

pub mod handlers;

pub use handlers::configure;
