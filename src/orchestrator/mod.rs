//! Provisioning orchestration: blueprints, per-run state, the phase driver
//! and compensating cleanup.

pub mod blueprint;
pub mod cleanup;
pub mod context;
pub mod runner;

pub use blueprint::{Blueprint, BlueprintKind, BlueprintRegistry, Phase};
pub use cleanup::{CleanupReport, CompensatingCleanup};
pub use context::{
    IndexSize, ProvisioningContext, ProvisioningRequest, RunSnapshot, SearchOptions,
    TargetOptions, VmOptions,
};
pub use runner::{Collaborators, Provisioner};
