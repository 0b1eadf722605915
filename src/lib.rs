//! Module puller for OCI registries.
//!
//! `modpull` fetches a configuration module published as an OCI artifact,
//! optionally logging in to the registry and checking the artifact's cosign
//! signature first, and unpacks its layers into a local directory. It is used
//! by the `modpull` CLI binary and can be driven programmatically through
//! [`acquire::acquire_with`] with injected collaborators.
//!
//! # Modules
//!
//! - [`acquire`] - Acquisition orchestration and stage sequencing
//! - [`command`] - External command execution with timeouts
//! - [`config`] - Settings file and per-invocation configuration
//! - [`credentials`] - Registry credential parsing
//! - [`deadline`] - Run-wide time budget
//! - [`error`] - Stage-attributed acquisition errors
//! - [`inventory`] - Applied instance listing
//! - [`output`] - User-facing progress output
//! - [`reference`] - Module locator resolution
//! - [`registry`] - OCI distribution client, layer fetch, and extraction
//! - [`trust`] - Signature verification policy and providers

pub mod acquire;
pub mod command;
pub mod config;
pub mod credentials;
pub mod deadline;
pub mod error;
pub mod inventory;
pub mod output;
pub mod reference;
pub mod registry;
pub mod trust;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
