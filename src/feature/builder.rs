//! Validating factory for [`Feature`]

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::conditions::Condition;
use crate::error::Error;
use crate::manifest::ManifestSource;
use crate::target::TargetSpec;

use super::{Feature, FeatureStatus};

/// Accumulates feature parts and validates them at [`FeatureBuilder::build`].
///
/// Every setter is infallible; problems surface once, at build time, so a
/// misconfigured feature can never enter a set.
#[derive(Default)]
pub struct FeatureBuilder {
    name: String,
    target: Option<Arc<TargetSpec>>,
    preconditions: Vec<Box<dyn Condition>>,
    sources: Vec<ManifestSource>,
    params: BTreeMap<String, String>,
    postconditions: Vec<Box<dyn Condition>>,
}

impl FeatureBuilder {
    /// Start a builder for a feature with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the target configuration the feature installs against
    pub fn target(mut self, target: Arc<TargetSpec>) -> Self {
        self.target = Some(target);
        self
    }

    /// Add a manifest source; sources apply in the order they are added
    pub fn manifests(mut self, source: ManifestSource) -> Self {
        self.sources.push(source);
        self
    }

    /// Add a template parameter available to every manifest source
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Add a precondition; preconditions run in the order they are added
    pub fn precondition(mut self, condition: impl Condition + 'static) -> Self {
        self.preconditions.push(Box::new(condition));
        self
    }

    /// Add a postcondition; postconditions run in the order they are added
    pub fn postcondition(mut self, condition: impl Condition + 'static) -> Self {
        self.postconditions.push(Box::new(condition));
        self
    }

    /// Validate the accumulated parts and produce a [`Feature`] in the
    /// `Pending` state
    pub fn build(self) -> Result<Feature, Error> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("feature name must not be empty"));
        }
        let target = self.target.ok_or_else(|| {
            Error::validation(format!("feature {} has no target configuration", self.name))
        })?;
        if self.sources.is_empty() && self.preconditions.is_empty() && self.postconditions.is_empty()
        {
            return Err(Error::validation(format!(
                "feature {} declares no manifests and no conditions",
                self.name
            )));
        }

        Ok(Feature {
            name: self.name,
            target,
            preconditions: self.preconditions,
            sources: self.sources,
            params: self.params,
            postconditions: self.postconditions,
            status: FeatureStatus::Pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_requires_a_name() {
        let err = FeatureBuilder::new("  ")
            .target(Arc::new(TargetSpec::default()))
            .manifests(ManifestSource::new("manifests/mesh", true))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn build_requires_a_target() {
        let err = FeatureBuilder::new("mesh-install")
            .manifests(ManifestSource::new("manifests/mesh", true))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("target"));
    }

    #[test]
    fn build_rejects_an_empty_feature() {
        let err = FeatureBuilder::new("mesh-install")
            .target(Arc::new(TargetSpec::default()))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn built_features_start_pending() {
        let feature = FeatureBuilder::new("mesh-install")
            .target(Arc::new(TargetSpec::default()))
            .manifests(ManifestSource::new("manifests/mesh", true))
            .param("ns", "istio-system")
            .build()
            .unwrap();
        assert_eq!(feature.name(), "mesh-install");
        assert_eq!(*feature.status(), FeatureStatus::Pending);
    }
}
