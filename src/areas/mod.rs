//! Capability area catalogs
//!
//! An area is a named group of features that together install one platform
//! subsystem. Each catalog function builds a fully wired [`FeatureSet`] for
//! its area from the target configuration and a manifest root on disk.

mod serverless;
mod servicemesh;

pub use serverless::serverless_features;
pub use servicemesh::mesh_features;

/// CRD that must exist before any service mesh feature can run
pub const SERVICE_MESH_CRD: &str = "servicemeshcontrolplanes.maistra.io";

/// CRD that must exist before the serverless operator can be configured
pub const KNATIVE_SERVING_CRD: &str = "knativeservings.operator.knative.dev";
