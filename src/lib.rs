//! Feature lifecycle engine for optional platform subsystems.
//!
//! Trellis installs capability areas (a service mesh control plane and a
//! Knative-based serverless runtime) into a Kubernetes cluster. Each area is
//! a [`feature::FeatureSet`] of ordered [`feature::Feature`]s, and each
//! feature runs a fixed pipeline: preconditions gate it, manifest templates
//! are rendered and reconciled, postconditions prove the subsystem settled.
//!
//! All cluster access flows through the [`cluster::ClusterAccess`] trait, so
//! the whole pipeline can run against an in-memory cluster in tests. Waiting
//! is uniformly handled by the bounded poller in [`poll`].

#![deny(missing_docs)]

pub mod areas;
pub mod cluster;
pub mod conditions;
pub mod error;
pub mod feature;
pub mod manifest;
pub mod poll;
pub mod target;

pub use error::Error;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
