//! Shared domain types for the skyforge provisioning orchestrator.
//!
//! These are plain value types shared between the orchestrator, the HTTP
//! entrypoint and anything that consumes the webhook stream:
//!
//! - [`ResourceKind`] / [`ResourceHandle`]: references to cloud resources a
//!   run has created or adopted.
//! - [`RunStatus`]: the lifecycle of one orchestrator run.
//! - [`StatusEvent`]: the progress event posted to a caller's webhook.

pub mod event;
pub mod resource;
pub mod status;

pub use event::{StatusDetails, StatusEvent};
pub use resource::{ResourceHandle, ResourceKind};
pub use status::{EventStatus, InvalidTransition, RunStatus};
