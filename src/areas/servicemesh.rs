//! Service mesh area

use std::path::Path;
use std::sync::Arc;

use crate::conditions::{CrdInstalled, PodsReady};
use crate::error::Error;
use crate::feature::{Feature, FeatureSet};
use crate::manifest::ManifestSource;
use crate::poll::PollConfig;
use crate::target::TargetSpec;

use super::SERVICE_MESH_CRD;

/// Build the service mesh feature set.
///
/// One feature creates the mesh control plane from the templates under
/// `<manifest_root>/servicemesh/base` and waits for its pods to settle.
pub fn mesh_features(
    target: &Arc<TargetSpec>,
    manifest_root: &Path,
) -> Result<FeatureSet, Error> {
    let mesh = &target.service_mesh;

    let control_plane = Feature::builder("control-plane-creation")
        .target(target.clone())
        .precondition(CrdInstalled::new(SERVICE_MESH_CRD))
        .manifests(ManifestSource::new(
            manifest_root.join("servicemesh").join("base"),
            true,
        ))
        .param("mesh_name", &mesh.name)
        .param("mesh_namespace", &mesh.namespace)
        .param("applications_namespace", &target.applications_namespace)
        .postcondition(PodsReady::new(&mesh.namespace, PollConfig::control_plane()))
        .build()?;

    let mut set = FeatureSet::new("service-mesh");
    set.register(control_plane)?;
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::FeatureStatus;

    #[test]
    fn catalog_builds_the_control_plane_feature() {
        let target = Arc::new(TargetSpec::default());
        let set = mesh_features(&target, Path::new("/opt/manifests")).unwrap();

        assert_eq!(set.area(), "service-mesh");
        let names: Vec<_> = set.features().iter().map(Feature::name).collect();
        assert_eq!(names, vec!["control-plane-creation"]);
        assert!(set
            .features()
            .iter()
            .all(|f| *f.status() == FeatureStatus::Pending));
    }
}
