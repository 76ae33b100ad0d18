//! Cluster compliance checker
//!
//! Validates that a Kubernetes cluster meets the operational prerequisites of
//! the product before installation, and produces a structured report.
//!
//! # Architecture
//!
//! A run is driven by the [`engine`]: it walks the sections of a
//! [`registry::Registry`], asks the [`deps::Resolver`] for the dependencies
//! each check declares, and folds the outcomes into a [`report::Report`].
//! Checks that need workloads in the cluster get them through the
//! [`spawner`], which guarantees the objects are deleted again.
//!
//! # Modules
//!
//! - [`config`] - Validated run configuration
//! - [`requirements`] - Hardware requirement tables per traffic tier
//! - [`manifest`] - Builders for the ephemeral objects checks create
//! - [`spawner`] - Scoped acquisition and guaranteed cleanup of cluster objects
//! - [`deps`] - Lazily constructed, memoized dependencies
//! - [`registry`] - Check trait, sections and selection
//! - [`engine`] - Concurrent execution with failure containment
//! - [`report`] - Outcomes and the report document
//! - [`checks`] - The built-in check battery

#![deny(missing_docs)]

pub mod checks;
pub mod config;
pub mod deps;
pub mod engine;
pub mod manifest;
pub mod registry;
pub mod report;
pub mod requirements;
pub mod spawner;

pub use compliance_common::{Error, Result};
