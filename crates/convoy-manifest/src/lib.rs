//! # convoy-manifest
//!
//! The declarative side of convoy: what should run on this host.
//!
//! Handles:
//! - **Model**: Typed container definitions, decided once at load time.
//! - **Loader**: Reading JSON or YAML manifests from disk.
//! - **Validator**: Required fields, dangling links, unknown functions.
//! - **Graph**: Link graph and deterministic execution order.
//! - **Environment**: Resolution of environment directives.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod environment;
pub mod graph;
pub mod loader;
pub mod model;
pub mod validator;

pub use model::{ContainerSpec, Manifest};
