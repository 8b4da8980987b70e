//! Ordered collection of features for one platform area

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cluster::ClusterAccess;
use crate::error::{Error, Stage};

use super::Feature;

/// Features belonging to one area, applied strictly in registration order.
///
/// The first failing feature aborts the run; later features keep their
/// `Pending` status and nothing already applied is rolled back.
pub struct FeatureSet {
    area: String,
    features: Vec<Feature>,
}

impl FeatureSet {
    /// Create an empty set for the named area
    pub fn new(area: impl Into<String>) -> Self {
        Self {
            area: area.into(),
            features: Vec::new(),
        }
    }

    /// The area this set installs
    pub fn area(&self) -> &str {
        &self.area
    }

    /// Registered features in application order
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Add a feature; names must be unique within the set
    pub fn register(&mut self, feature: Feature) -> Result<(), Error> {
        if self.features.iter().any(|f| f.name() == feature.name()) {
            return Err(Error::validation(format!(
                "feature {} is already registered in area {}",
                feature.name(),
                self.area
            )));
        }
        self.features.push(feature);
        Ok(())
    }

    /// Apply every feature in order, stopping at the first failure
    pub async fn run(
        &mut self,
        cluster: &dyn ClusterAccess,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        info!(area = %self.area, features = self.features.len(), "Applying feature set");
        for feature in &mut self.features {
            let name = feature.name().to_string();
            if let Err(e) = feature.apply(cluster, cancel).await {
                // Cancellation propagates as-is; only genuine feature
                // failures get the aggregate wrapper.
                if matches!(e, Error::Cancelled) {
                    info!(area = %self.area, feature = %name, "Run cancelled");
                    return Err(e);
                }
                let stage = e.stage().unwrap_or(Stage::Apply);
                error!(area = %self.area, feature = %name, %stage, error = %e, "Feature failed");
                return Err(Error::FeatureSet {
                    area: self.area.clone(),
                    feature: name,
                    stage,
                    source: Box::new(e),
                });
            }
        }
        info!(area = %self.area, "Feature set applied");
        Ok(())
    }
}
