//! Condition library
//!
//! Domain-specific readiness checks used as feature pre- and postconditions.
//! Every condition observes cluster state and logs; none of them mutate
//! anything. Checks that wait are built on [`crate::poll::poll_until_ready`]
//! and inherit its fatal-on-error and cancellation semantics.

use async_trait::async_trait;
use futures::future::BoxFuture;
use kube::api::GroupVersionKind;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cluster::ClusterAccess;
use crate::error::Error;
use crate::poll::{poll_until_ready, PollConfig};
use crate::target::TargetSpec;

/// A gating check run before or after manifest application.
///
/// Pre- and postconditions share this contract; the flavors differ only by
/// the slot a feature declares them in. Implementations must be free of
/// side effects beyond observing cluster state and logging.
#[async_trait]
pub trait Condition: Send + Sync {
    /// Stable name used in error reporting
    fn name(&self) -> &str;

    /// Evaluate the check against the target configuration and the cluster
    async fn check(
        &self,
        target: &TargetSpec,
        cluster: &dyn ClusterAccess,
        cancel: &CancellationToken,
    ) -> Result<(), Error>;
}

type CheckFn = Box<
    dyn for<'a> Fn(&'a TargetSpec, &'a dyn ClusterAccess) -> BoxFuture<'a, Result<(), Error>>
        + Send
        + Sync,
>;

/// Adapter turning a closure into a [`Condition`], for one-off checks that
/// do not warrant a named type
pub struct FnCondition {
    name: String,
    check: CheckFn,
}

impl FnCondition {
    /// Wrap a closure under the given condition name
    pub fn new(
        name: impl Into<String>,
        check: impl for<'a> Fn(&'a TargetSpec, &'a dyn ClusterAccess) -> BoxFuture<'a, Result<(), Error>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            check: Box::new(check),
        }
    }
}

#[async_trait]
impl Condition for FnCondition {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(
        &self,
        target: &TargetSpec,
        cluster: &dyn ClusterAccess,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        (self.check)(target, cluster).await
    }
}

fn crd_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("apiextensions.k8s.io", "v1", "CustomResourceDefinition")
}

fn deployment_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("apps", "v1", "Deployment")
}

fn pod_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("", "v1", "Pod")
}

fn control_plane_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("maistra.io", "v2", "ServiceMeshControlPlane")
}

/// One-shot check that a CustomResourceDefinition exists by fully-qualified
/// name. Absence is a direct failure; use [`CrdEstablished`] to wait instead.
pub struct CrdInstalled {
    crd_name: String,
    name: String,
}

impl CrdInstalled {
    /// Check for the CRD with the given fully-qualified name
    pub fn new(crd_name: impl Into<String>) -> Self {
        let crd_name = crd_name.into();
        let name = format!("crd-installed/{crd_name}");
        Self { crd_name, name }
    }
}

#[async_trait]
impl Condition for CrdInstalled {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(
        &self,
        _target: &TargetSpec,
        cluster: &dyn ClusterAccess,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        match cluster.get(&crd_gvk(), None, &self.crd_name).await? {
            Some(_) => {
                debug!(crd = %self.crd_name, "CRD is installed");
                Ok(())
            }
            None => Err(Error::not_ready(format!(
                "custom resource definition {} is not installed",
                self.crd_name
            ))),
        }
    }
}

/// Polling variant of [`CrdInstalled`]: waits for the CRD to appear within
/// the configured window
pub struct CrdEstablished {
    crd_name: String,
    poll: PollConfig,
    name: String,
}

impl CrdEstablished {
    /// Wait for the CRD with the given fully-qualified name
    pub fn new(crd_name: impl Into<String>, poll: PollConfig) -> Self {
        let crd_name = crd_name.into();
        let name = format!("crd-established/{crd_name}");
        Self {
            crd_name,
            poll,
            name,
        }
    }
}

#[async_trait]
impl Condition for CrdEstablished {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(
        &self,
        _target: &TargetSpec,
        cluster: &dyn ClusterAccess,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let crd_name = self.crd_name.as_str();
        poll_until_ready(&self.poll, cancel, || {
            let gvk = crd_gvk();
            async move { Ok(cluster.get(&gvk, None, crd_name).await?.is_some()) }
        })
        .await
    }
}

/// Waits for a Deployment to report an `Available=True` status condition.
///
/// A missing deployment or one that is not yet available is retried until the
/// attempts are exhausted; a genuine API error stops the wait immediately.
pub struct DeploymentAvailable {
    deployment: String,
    namespace: String,
    poll: PollConfig,
    name: String,
}

impl DeploymentAvailable {
    /// Wait for `deployment` in `namespace`, checking `retries` times
    /// `interval` apart
    pub fn new(
        deployment: impl Into<String>,
        namespace: impl Into<String>,
        retries: u32,
        interval: std::time::Duration,
    ) -> Self {
        let deployment = deployment.into();
        let namespace = namespace.into();
        let name = format!("deployment-available/{namespace}/{deployment}");
        Self {
            deployment,
            namespace,
            poll: PollConfig::retries(retries, interval),
            name,
        }
    }
}

#[async_trait]
impl Condition for DeploymentAvailable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(
        &self,
        _target: &TargetSpec,
        cluster: &dyn ClusterAccess,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let deployment = self.deployment.as_str();
        let namespace = self.namespace.as_str();
        poll_until_ready(&self.poll, cancel, || {
            let gvk = deployment_gvk();
            async move {
                match cluster.get(&gvk, Some(namespace), deployment).await? {
                    Some(obj) => Ok(deployment_is_available(&obj)),
                    None => Ok(false),
                }
            }
        })
        .await
    }
}

fn deployment_is_available(deployment: &Value) -> bool {
    deployment
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .is_some_and(|conditions| {
            conditions.iter().any(|c| {
                c.get("type").and_then(Value::as_str) == Some("Available")
                    && c.get("status").and_then(Value::as_str) == Some("True")
            })
        })
}

/// Waits for the service mesh control plane named in the target spec to
/// report fully ready components.
///
/// The control plane resource lists its child components under
/// `status.readiness.components` as `ready`, `pending` and `unready` arrays.
/// Ready means no pending, no unready and at least one ready component.
/// A missing resource or a missing status section stops the poll immediately;
/// neither is a "not yet ready" signal.
pub struct ControlPlaneReady {
    poll: PollConfig,
}

impl ControlPlaneReady {
    /// Wait with the given poll tuning
    pub fn new(poll: PollConfig) -> Self {
        Self { poll }
    }
}

impl Default for ControlPlaneReady {
    fn default() -> Self {
        Self::new(PollConfig::control_plane())
    }
}

#[async_trait]
impl Condition for ControlPlaneReady {
    fn name(&self) -> &str {
        "control-plane-ready"
    }

    async fn check(
        &self,
        target: &TargetSpec,
        cluster: &dyn ClusterAccess,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let mesh = target.service_mesh.name.as_str();
        let namespace = target.service_mesh.namespace.as_str();
        info!(
            control_plane = %mesh,
            namespace = %namespace,
            timeout_secs = self.poll.timeout.as_secs(),
            "Waiting for control plane components to be ready"
        );
        poll_until_ready(&self.poll, cancel, || {
            let gvk = control_plane_gvk();
            async move {
                let obj = cluster
                    .get(&gvk, Some(namespace), mesh)
                    .await?
                    .ok_or_else(|| {
                        Error::cluster(format!(
                            "service mesh control plane {namespace}/{mesh} not found"
                        ))
                    })?;
                control_plane_components_ready(&obj)
            }
        })
        .await?;
        info!(control_plane = %mesh, namespace = %namespace, "Control plane components are ready");
        Ok(())
    }
}

fn control_plane_components_ready(control_plane: &Value) -> Result<bool, Error> {
    let components = control_plane
        .pointer("/status/readiness/components")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            Error::cluster("control plane reports no status.readiness.components section")
        })?;

    let count = |key: &str| {
        components
            .get(key)
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    };

    Ok(count("pending") == 0 && count("unready") == 0 && count("ready") > 0)
}

/// Waits until every pod in a namespace reports ready.
///
/// Used as a postcondition after a subsystem's manifests have been applied.
/// Completed (`Succeeded`) pods count as ready; an empty namespace does not.
pub struct PodsReady {
    namespace: String,
    poll: PollConfig,
    name: String,
}

impl PodsReady {
    /// Wait for the pods in `namespace` with the given poll tuning
    pub fn new(namespace: impl Into<String>, poll: PollConfig) -> Self {
        let namespace = namespace.into();
        let name = format!("pods-ready/{namespace}");
        Self {
            namespace,
            poll,
            name,
        }
    }
}

#[async_trait]
impl Condition for PodsReady {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(
        &self,
        _target: &TargetSpec,
        cluster: &dyn ClusterAccess,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let namespace = self.namespace.as_str();
        info!(namespace = %namespace, "Waiting for pods to be ready");
        poll_until_ready(&self.poll, cancel, || {
            let gvk = pod_gvk();
            async move {
                let pods = cluster.list(&gvk, Some(namespace)).await?;
                Ok(!pods.is_empty() && pods.iter().all(pod_is_ready))
            }
        })
        .await
    }
}

fn pod_is_ready(pod: &Value) -> bool {
    if pod.pointer("/status/phase").and_then(Value::as_str) == Some("Succeeded") {
        return true;
    }
    pod.pointer("/status/conditions")
        .and_then(Value::as_array)
        .is_some_and(|conditions| {
            conditions.iter().any(|c| {
                c.get("type").and_then(Value::as_str) == Some("Ready")
                    && c.get("status").and_then(Value::as_str) == Some("True")
            })
        })
}

/// Waits for at least one instance of an arbitrary resource kind to exist in
/// a namespace. Used to gate on a custom resource being created by another
/// controller (e.g. a KnativeServing instance appearing after the operator
/// installs it).
pub struct ResourceCreated {
    gvk: GroupVersionKind,
    namespace: String,
    poll: PollConfig,
    name: String,
}

impl ResourceCreated {
    /// Wait for any `gvk` instance in `namespace`
    pub fn new(gvk: GroupVersionKind, namespace: impl Into<String>, poll: PollConfig) -> Self {
        let namespace = namespace.into();
        let name = format!(
            "resource-created/{namespace}/{}.{}",
            gvk.kind.to_lowercase(),
            gvk.group
        );
        Self {
            gvk,
            namespace,
            poll,
            name,
        }
    }
}

#[async_trait]
impl Condition for ResourceCreated {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(
        &self,
        _target: &TargetSpec,
        cluster: &dyn ClusterAccess,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let gvk = &self.gvk;
        let namespace = self.namespace.as_str();
        poll_until_ready(&self.poll, cancel, || {
            let gvk = gvk.clone();
            async move { Ok(!cluster.list(&gvk, Some(namespace)).await?.is_empty()) }
        })
        .await
    }
}
