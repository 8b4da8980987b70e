//! Target configuration the feature engine operates on
//!
//! A [`TargetSpec`] is built once per invocation and shared read-only by every
//! feature in a run. Nothing in the engine mutates it; concurrent runs against
//! different targets therefore never interfere through shared process state.

use serde::{Deserialize, Serialize};

/// Whether a subsystem is managed by the operator or removed from the cluster
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum ManagementState {
    /// The subsystem is installed and reconciled
    Managed,
    /// The subsystem is absent; its manifests are pruned instead of applied
    #[default]
    Removed,
}

impl ManagementState {
    /// True when the subsystem should be present in the cluster
    pub fn is_managed(self) -> bool {
        matches!(self, Self::Managed)
    }
}

/// Immutable configuration a feature run operates on
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TargetSpec {
    /// Namespace the platform applications live in
    pub applications_namespace: String,
    /// Service mesh configuration
    pub service_mesh: MeshConfig,
    /// Serverless runtime configuration
    pub serverless: ServerlessConfig,
}

impl Default for TargetSpec {
    fn default() -> Self {
        Self {
            applications_namespace: "trellis-applications".to_string(),
            service_mesh: MeshConfig::default(),
            serverless: ServerlessConfig::default(),
        }
    }
}

/// Service mesh control plane reference
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MeshConfig {
    /// Name of the mesh control plane resource
    pub name: String,
    /// Namespace the mesh control plane is deployed in
    pub namespace: String,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            name: "minimal".to_string(),
            namespace: "istio-system".to_string(),
        }
    }
}

/// Serverless runtime configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerlessConfig {
    /// Whether the serverless runtime is installed or removed
    pub management_state: ManagementState,
    /// Serving layer configuration
    pub serving: ServingConfig,
}

/// Knative serving layer configuration
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ServingConfig {
    /// Name of the serving installation
    pub name: String,
    /// Namespace the serving components are deployed in
    pub namespace: String,
    /// Service name of the local (cluster-internal) gateway
    pub local_gateway_service_name: String,
    /// Ingress gateway configuration
    pub ingress_gateway: IngressGatewayConfig,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            name: "knative-serving".to_string(),
            namespace: "knative-serving".to_string(),
            local_gateway_service_name: "knative-local-gateway".to_string(),
            ingress_gateway: IngressGatewayConfig::default(),
        }
    }
}

/// Ingress gateway TLS configuration
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct IngressGatewayConfig {
    /// Certificate policy for the ingress gateway
    pub certificate: CertificateConfig,
}

impl Default for IngressGatewayConfig {
    fn default() -> Self {
        Self {
            certificate: CertificateConfig::default(),
        }
    }
}

/// TLS certificate policy
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CertificateConfig {
    /// Name of the TLS secret the gateway serves
    pub secret_name: String,
    /// Whether the secret is generated or user provided
    pub generate: bool,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            secret_name: "knative-serving-cert".to_string(),
            generate: true,
        }
    }
}
