//! HTTP surface for notification dispatch.
//!
//! Endpoints:
//! - GET  /health
//! - POST /api/notifications/dispatch

pub mod routes;
pub mod state;
