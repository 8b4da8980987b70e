//! Error types for the trellis feature engine

use std::time::Duration;

use thiserror::Error;

/// Pipeline stage at which a feature failed.
///
/// Used by [`crate::feature::FeatureStatus::Failed`] and by the aggregate
/// feature-set error so callers can tell a definition error apart from a
/// runtime one without parsing messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Feature declaration was rejected before any cluster access.
    Build,
    /// A gating check before manifest application failed.
    Precondition,
    /// Manifest rendering or application failed.
    Apply,
    /// A readiness check after manifest application failed.
    Postcondition,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Build => write!(f, "build"),
            Self::Precondition => write!(f, "precondition"),
            Self::Apply => write!(f, "apply"),
            Self::Postcondition => write!(f, "postcondition"),
        }
    }
}

/// Main error type for trellis operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed feature declaration; fatal at build time, never reaches execution
    #[error("validation error: {0}")]
    Validation(String),

    /// Cluster API failure (query or mutation)
    #[error("cluster error: {0}")]
    Cluster(String),

    /// Manifest rendering failure
    #[error("render error in {path}: {message}")]
    Render {
        /// Render root or file the failure was observed in
        path: String,
        /// What went wrong
        message: String,
    },

    /// A one-shot readiness check reported a negative result
    #[error("not ready: {0}")]
    NotReady(String),

    /// Readiness was not achieved within the poll window
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Caller-initiated abort; distinct from timeout and propagated as-is
    #[error("cancelled by caller")]
    Cancelled,

    /// A precondition failed; names the feature and the failing check
    #[error("feature {feature}: precondition {condition} failed: {source}")]
    Precondition {
        /// Owning feature
        feature: String,
        /// Name of the failing condition
        condition: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Resource create/update failure during manifest application
    #[error("failed to apply {resource}: {source}")]
    Apply {
        /// Resource path or kind/name the failure was observed on
        resource: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// A postcondition failed; names the feature and the failing check
    #[error("feature {feature}: postcondition {condition} failed: {source}")]
    Postcondition {
        /// Owning feature
        feature: String,
        /// Name of the failing condition
        condition: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Aggregate failure of a feature-set run
    #[error("capability area {area}: feature {feature} failed at {stage} stage: {source}")]
    FeatureSet {
        /// Capability area the registry was running
        area: String,
        /// Feature whose apply failed
        feature: String,
        /// Stage the feature failed at
        stage: Stage,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a cluster error with the given message
    pub fn cluster(msg: impl Into<String>) -> Self {
        Self::Cluster(msg.into())
    }

    /// Create a not-ready error with the given message
    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady(msg.into())
    }

    /// Pipeline stage this error is attributable to, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Validation(_) => Some(Stage::Build),
            Self::Precondition { .. } => Some(Stage::Precondition),
            Self::Apply { .. } => Some(Stage::Apply),
            Self::Postcondition { .. } => Some(Stage::Postcondition),
            Self::FeatureSet { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        Self::Cluster(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_carry_the_offending_field() {
        let err = Error::validation("feature 'serving' has no target configuration");
        assert!(err.to_string().contains("validation error"));
        assert!(err.to_string().contains("no target configuration"));
        assert_eq!(err.stage(), Some(Stage::Build));
    }

    #[test]
    fn precondition_errors_name_feature_and_condition() {
        let err = Error::Precondition {
            feature: "serverless-serving-deployment".to_string(),
            condition: "crd-installed/knativeservings.operator.knative.dev".to_string(),
            source: Box::new(Error::not_ready("custom resource definition not installed")),
        };
        let msg = err.to_string();
        assert!(msg.contains("serverless-serving-deployment"));
        assert!(msg.contains("knativeservings.operator.knative.dev"));
        assert_eq!(err.stage(), Some(Stage::Precondition));
    }

    #[test]
    fn timeout_and_cancellation_are_distinct() {
        let timeout = Error::Timeout(Duration::from_secs(300));
        let cancelled = Error::Cancelled;
        assert!(timeout.to_string().contains("timed out"));
        assert!(cancelled.to_string().contains("cancelled"));
        assert!(!matches!(timeout, Error::Cancelled));
        assert_eq!(timeout.stage(), None);
    }

    #[test]
    fn feature_set_error_reports_area_feature_and_stage() {
        let err = Error::FeatureSet {
            area: "serverless".to_string(),
            feature: "serverless-serving-gateways".to_string(),
            stage: Stage::Postcondition,
            source: Box::new(Error::Timeout(Duration::from_secs(300))),
        };
        let msg = err.to_string();
        assert!(msg.contains("serverless"));
        assert!(msg.contains("serverless-serving-gateways"));
        assert!(msg.contains("postcondition"));
        assert_eq!(err.stage(), Some(Stage::Postcondition));
    }
}
