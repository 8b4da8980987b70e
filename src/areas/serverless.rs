//! Serverless (Knative serving) area

use std::path::Path;
use std::sync::Arc;

use kube::api::GroupVersionKind;

use crate::conditions::{ControlPlaneReady, CrdInstalled, PodsReady, ResourceCreated};
use crate::error::Error;
use crate::feature::{Feature, FeatureSet};
use crate::manifest::ManifestSource;
use crate::poll::PollConfig;
use crate::target::TargetSpec;

use super::{KNATIVE_SERVING_CRD, SERVICE_MESH_CRD};

/// Build the serverless feature set.
///
/// Serving rides on the mesh, so the first feature gates on both operator
/// CRDs and a ready control plane before configuring the KnativeServing
/// instance. A second feature wires the mesh ingress gateways once the
/// serving instance exists. With the serverless management state set to
/// `Removed` both features prune their manifests instead.
pub fn serverless_features(
    target: &Arc<TargetSpec>,
    manifest_root: &Path,
) -> Result<FeatureSet, Error> {
    let serving = &target.serverless.serving;
    let enabled = target.serverless.management_state.is_managed();
    let serverless_root = manifest_root.join("serverless");

    let mut serving_deployment = Feature::builder("serverless-serving-deployment")
        .target(target.clone())
        .precondition(CrdInstalled::new(KNATIVE_SERVING_CRD))
        .precondition(CrdInstalled::new(SERVICE_MESH_CRD));
    // Readiness gates only matter for installation; pruning a removed area
    // must not wait on the mesh or on serving pods.
    if enabled {
        serving_deployment = serving_deployment
            .precondition(ControlPlaneReady::default())
            .postcondition(PodsReady::new(
                &serving.namespace,
                PollConfig::control_plane(),
            ));
    }
    let serving_deployment = serving_deployment
        .manifests(ManifestSource::new(
            serverless_root.join("serving-install"),
            enabled,
        ))
        .param("serving_name", &serving.name)
        .param("serving_namespace", &serving.namespace)
        .param(
            "local_gateway_service_name",
            &serving.local_gateway_service_name,
        )
        .param(
            "certificate_secret_name",
            &serving.ingress_gateway.certificate.secret_name,
        )
        .param("applications_namespace", &target.applications_namespace)
        .build()?;

    // The serving operator materializes the KnativeServing instance
    // asynchronously, so the gateway wiring gates on it existing. When
    // pruning there is nothing to wait for.
    let mut gateways = Feature::builder("serverless-serving-gateways").target(target.clone());
    if enabled {
        let serving_gvk =
            GroupVersionKind::gvk("operator.knative.dev", "v1beta1", "KnativeServing");
        gateways = gateways.precondition(ResourceCreated::new(
            serving_gvk,
            &serving.namespace,
            PollConfig::control_plane(),
        ));
    }
    let gateways = gateways
        .manifests(ManifestSource::new(
            serverless_root.join("serving-istio-gateways"),
            enabled,
        ))
        .param("serving_namespace", &serving.namespace)
        .param("mesh_namespace", &target.service_mesh.namespace)
        .param(
            "local_gateway_service_name",
            &serving.local_gateway_service_name,
        )
        .param(
            "certificate_secret_name",
            &serving.ingress_gateway.certificate.secret_name,
        )
        .param("applications_namespace", &target.applications_namespace)
        .build()?;

    let mut set = FeatureSet::new("serverless");
    set.register(serving_deployment)?;
    set.register(gateways)?;
    Ok(set)
}
