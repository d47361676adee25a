//! Gatehouse Backend Library
//!
//! User management API with JWT sessions. Exposes every module so the binary
//! and the integration tests build the same router.

pub mod api;
pub mod auth;
pub mod config;
pub mod middleware;
