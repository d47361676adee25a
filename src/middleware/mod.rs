//! Cross-cutting HTTP middleware.
//!
//! Request logging with latency tracking and request ids. Authentication
//! gates live in [`crate::auth::middleware`].

pub mod logging;

pub use logging::request_logging;
