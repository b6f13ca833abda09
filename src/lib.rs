//! skyforge: a cloud provisioning orchestrator.
//!
//! Each accepted request runs a blueprint's phases in order, reports every step
//! to an optional webhook and, on failure, deletes what the run created in
//! reverse order.

pub mod config;
pub mod credentials;
pub mod dns;
pub mod errors;
pub mod lifecycle;
pub mod notify;
pub mod orchestrator;
pub mod server;
pub mod staging;
pub mod status;
