//! Feature pipeline
//!
//! A [`Feature`] is one installable unit: preconditions that gate it,
//! manifest sources that realize it, and postconditions that prove it
//! settled. [`Feature::apply`] drives the pipeline through each stage in
//! order and records the outcome in [`FeatureStatus`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cluster::ClusterAccess;
use crate::conditions::Condition;
use crate::error::{Error, Stage};
use crate::manifest::{render_dir, Applier, ManifestSource};
use crate::target::TargetSpec;

mod builder;
mod registry;

pub use builder::FeatureBuilder;
pub use registry::FeatureSet;

/// Lifecycle state of a feature
#[derive(Clone, Debug, Default, PartialEq)]
pub enum FeatureStatus {
    /// Built but not yet applied
    #[default]
    Pending,
    /// Pipeline in flight
    Applying,
    /// Pipeline completed, postconditions satisfied
    Ready,
    /// Pipeline aborted
    Failed {
        /// Stage the pipeline failed in
        stage: Stage,
        /// Rendered failure cause
        message: String,
    },
}

/// One installable unit of platform functionality
pub struct Feature {
    pub(crate) name: String,
    pub(crate) target: Arc<TargetSpec>,
    pub(crate) preconditions: Vec<Box<dyn Condition>>,
    pub(crate) sources: Vec<ManifestSource>,
    pub(crate) params: BTreeMap<String, String>,
    pub(crate) postconditions: Vec<Box<dyn Condition>>,
    pub(crate) status: FeatureStatus,
}

impl std::fmt::Debug for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feature")
            .field("name", &self.name)
            .field("target", &self.target)
            .field(
                "preconditions",
                &self.preconditions.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .field("sources", &self.sources)
            .field("params", &self.params)
            .field(
                "postconditions",
                &self.postconditions.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .field("status", &self.status)
            .finish()
    }
}

impl Feature {
    /// Start building a feature with the given name
    pub fn builder(name: impl Into<String>) -> FeatureBuilder {
        FeatureBuilder::new(name)
    }

    /// The feature's unique name within its set
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state
    pub fn status(&self) -> &FeatureStatus {
        &self.status
    }

    /// Run the pipeline: preconditions, manifest reconciliation, then
    /// postconditions. Each stage must fully succeed before the next starts,
    /// and the first failure aborts the rest.
    ///
    /// A feature applies at most once; calling this again after any outcome
    /// is a validation error.
    pub async fn apply(
        &mut self,
        cluster: &dyn ClusterAccess,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        if self.status != FeatureStatus::Pending {
            return Err(Error::validation(format!(
                "feature {} has already been applied",
                self.name
            )));
        }
        self.status = FeatureStatus::Applying;

        match self.run_pipeline(cluster, cancel).await {
            Ok(()) => {
                self.status = FeatureStatus::Ready;
                info!(feature = %self.name, "Feature is ready");
                Ok(())
            }
            Err(e) => {
                self.status = FeatureStatus::Failed {
                    stage: e.stage().unwrap_or(Stage::Apply),
                    message: e.to_string(),
                };
                Err(e)
            }
        }
    }

    async fn run_pipeline(
        &self,
        cluster: &dyn ClusterAccess,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        for condition in &self.preconditions {
            debug!(feature = %self.name, condition = condition.name(), "Checking precondition");
            condition
                .check(&self.target, cluster, cancel)
                .await
                .map_err(|e| match e {
                    // Caller-initiated abort is not a refuted gate; surface
                    // it as-is so the caller can tell the two apart.
                    Error::Cancelled => Error::Cancelled,
                    e => Error::Precondition {
                        feature: self.name.clone(),
                        condition: condition.name().to_string(),
                        source: Box::new(e),
                    },
                })?;
        }

        let applier = Applier::new(cluster);
        for source in &self.sources {
            let docs = self.render_source(source)?;
            if source.enabled {
                applier.reconcile(&docs).await?;
            } else {
                applier.prune(&docs).await?;
            }
        }

        for condition in &self.postconditions {
            debug!(feature = %self.name, condition = condition.name(), "Checking postcondition");
            condition
                .check(&self.target, cluster, cancel)
                .await
                .map_err(|e| match e {
                    Error::Cancelled => Error::Cancelled,
                    e => Error::Postcondition {
                        feature: self.name.clone(),
                        condition: condition.name().to_string(),
                        source: Box::new(e),
                    },
                })?;
        }
        Ok(())
    }

    fn render_source(&self, source: &ManifestSource) -> Result<Vec<Value>, Error> {
        render_dir(&source.path, &self.params)
    }
}
