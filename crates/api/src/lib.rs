//! Price sync service library.
//!
//! Exposes configuration, service wiring, the event ingress routes and the
//! background reconciliation loop so the server binary, the `reconcile`
//! CLI and the integration tests share one implementation.

pub mod background;
pub mod config;
pub mod engine;
pub mod error;
pub mod router;
pub mod routes;
pub mod services;
pub mod state;
pub mod telemetry;
