//! Cluster access handle
//!
//! The engine talks to the cluster through the [`ClusterAccess`] trait rather
//! than a concrete client, so conditions and the manifest applier can be
//! exercised against mocks and in-memory fakes. [`KubeClusterAccess`] is the
//! production implementation over a `kube` client, using dynamic typing and
//! server-side apply for object management.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::Client;
use serde_json::Value;

#[cfg(test)]
use mockall::automock;

use crate::error::Error;

/// Field manager name used for server-side apply
pub const FIELD_MANAGER: &str = "trellis";

/// Address of a single cluster object
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectRef {
    /// Group, version and kind of the object
    pub gvk: GroupVersionKind,
    /// Namespace, `None` for cluster-scoped objects
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.gvk.kind, ns, self.name),
            None => write!(f, "{} {}", self.gvk.kind, self.name),
        }
    }
}

/// Extract the [`ObjectRef`] of a manifest document.
///
/// Fails with a validation error when `apiVersion`, `kind` or `metadata.name`
/// are missing, so malformed templates are rejected before any cluster call.
pub fn object_ref(doc: &Value) -> Result<ObjectRef, Error> {
    let api_version = doc
        .get("apiVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::validation("manifest document is missing apiVersion"))?;
    let kind = doc
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::validation("manifest document is missing kind"))?;
    let name = doc
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::validation("manifest document is missing metadata.name"))?;
    let namespace = doc
        .pointer("/metadata/namespace")
        .and_then(Value::as_str)
        .map(String::from);

    let (group, version) = match api_version.split_once('/') {
        Some((g, v)) => (g, v),
        None => ("", api_version),
    };

    Ok(ObjectRef {
        gvk: GroupVersionKind::gvk(group, version, kind),
        namespace,
        name: name.to_string(),
    })
}

/// Capability surface the engine requires from the cluster.
///
/// Mirrors the generic Get/List/Create/Update/Delete a dynamic Kubernetes
/// client offers. Consistency of concurrent mutations is delegated to the API
/// server's optimistic concurrency; no lock is held here.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterAccess: Send + Sync {
    /// Fetch one object; `Ok(None)` when it does not exist
    async fn get<'a>(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&'a str>,
        name: &str,
    ) -> Result<Option<Value>, Error>;

    /// List all objects of a kind in a namespace (or cluster-wide for `None`)
    async fn list<'a>(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&'a str>,
    ) -> Result<Vec<Value>, Error>;

    /// Create or update an object via server-side apply
    async fn apply(&self, manifest: &Value) -> Result<(), Error>;

    /// Delete one object; absent objects are not an error
    async fn delete<'a>(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&'a str>,
        name: &str,
    ) -> Result<(), Error>;
}

/// Production [`ClusterAccess`] over a `kube` client
#[derive(Clone)]
pub struct KubeClusterAccess {
    client: Client,
}

impl KubeClusterAccess {
    /// Wrap a connected `kube` client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic_api(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = ApiResource::from_gvk(gvk);
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }
}

#[async_trait]
impl ClusterAccess for KubeClusterAccess {
    async fn get<'a>(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&'a str>,
        name: &str,
    ) -> Result<Option<Value>, Error> {
        let api = self.dynamic_api(gvk, namespace);
        let obj = api.get_opt(name).await?;
        match obj {
            Some(obj) => {
                let value = serde_json::to_value(&obj).map_err(|e| {
                    Error::cluster(format!("failed to serialize {}/{}: {}", gvk.kind, name, e))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn list<'a>(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&'a str>,
    ) -> Result<Vec<Value>, Error> {
        let api = self.dynamic_api(gvk, namespace);
        let objs = api.list(&ListParams::default()).await?;
        objs.items
            .iter()
            .map(|obj| {
                serde_json::to_value(obj).map_err(|e| {
                    Error::cluster(format!("failed to serialize listed {}: {}", gvk.kind, e))
                })
            })
            .collect()
    }

    async fn apply(&self, manifest: &Value) -> Result<(), Error> {
        let oref = object_ref(manifest)?;
        let api = self.dynamic_api(&oref.gvk, oref.namespace.as_deref());
        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(&oref.name, &params, &Patch::Apply(manifest))
            .await
            .map_err(|e| Error::cluster(format!("failed to apply {}: {}", oref, e)))?;
        tracing::debug!(resource = %oref, "Applied manifest");
        Ok(())
    }

    async fn delete<'a>(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&'a str>,
        name: &str,
    ) -> Result<(), Error> {
        let api = self.dynamic_api(gvk, namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                tracing::debug!(kind = %gvk.kind, name = %name, "Deleted object");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(Error::cluster(format!(
                "failed to delete {}/{}: {}",
                gvk.kind, name, e
            ))),
        }
    }
}
