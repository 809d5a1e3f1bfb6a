//! Container reconciliation for convoy.
//!
//! Takes a validated manifest and drives a container runtime until the
//! host matches it: missing containers are created, drifted ones are
//! recreated, stopped ones are started. Pre-start hooks and one-off
//! commands run in transient containers that never outlive the call.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod backend;
pub mod drift;
pub mod hooks;
pub mod options;
pub mod reconciler;
pub mod status;

pub use reconciler::{ReconcileOptions, ReconcileReport, Reconciler, RunFlags};
