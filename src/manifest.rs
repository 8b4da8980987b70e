//! Manifest rendering and idempotent application
//!
//! A [`ManifestSource`] points at a render root on disk. Rendering reads every
//! manifest file under the root, substitutes `${key}` parameters, and yields a
//! list of resource documents. The [`Applier`] reconciles rendered documents
//! into the cluster: create if absent, update if drifted, skip if unchanged,
//! and prune instead of create when the source is disabled.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::cluster::{object_ref, ClusterAccess};
use crate::error::Error;

/// A render root paired with an enablement flag.
///
/// Disabled sources are still rendered, but their documents are deleted from
/// the cluster rather than created, so turning a subsystem off converges the
/// same way turning it on does.
#[derive(Clone, Debug, PartialEq)]
pub struct ManifestSource {
    /// Directory containing the manifest templates
    pub path: PathBuf,
    /// Apply when true, prune when false
    pub enabled: bool,
}

impl ManifestSource {
    /// Create a manifest source
    pub fn new(path: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            path: path.into(),
            enabled,
        }
    }
}

const MANIFEST_EXTENSIONS: [&str; 3] = ["yaml", "yml", "tmpl"];

/// Render every manifest file under `root` against a parameter map.
///
/// Files are processed in name order so numbered prefixes control apply
/// order. Each file may hold multiple YAML documents separated by `---`.
pub fn render_dir(root: &Path, params: &BTreeMap<String, String>) -> Result<Vec<Value>, Error> {
    let render_err = |message: String| Error::Render {
        path: root.display().to_string(),
        message,
    };

    let entries = std::fs::read_dir(root)
        .map_err(|e| render_err(format!("failed to read render root: {e}")))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| MANIFEST_EXTENSIONS.contains(&ext))
        })
        .collect();
    files.sort();

    let mut docs = Vec::new();
    for file in files {
        let raw = std::fs::read_to_string(&file).map_err(|e| Error::Render {
            path: file.display().to_string(),
            message: format!("failed to read template: {e}"),
        })?;
        let rendered = substitute(&raw, params).map_err(|message| Error::Render {
            path: file.display().to_string(),
            message,
        })?;

        for chunk in split_documents(&rendered) {
            let doc: Value = serde_yaml::from_str(chunk).map_err(|e| Error::Render {
                path: file.display().to_string(),
                message: format!("invalid YAML: {e}"),
            })?;
            if !doc.is_null() {
                docs.push(doc);
            }
        }
    }

    Ok(docs)
}

/// Substitute `${key}` placeholders from `params`. `$${...}` escapes to a
/// literal `${...}`; an unknown key is an error rather than an empty value.
fn substitute(input: &str, params: &BTreeMap<String, String>) -> Result<String, String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(idx) = rest.find('$') {
        out.push_str(&rest[..idx]);
        let tail = &rest[idx..];
        if tail.starts_with("$$") {
            out.push('$');
            rest = &tail[2..];
        } else if let Some(after) = tail.strip_prefix("${") {
            let close = after
                .find('}')
                .ok_or_else(|| "unterminated ${ placeholder".to_string())?;
            let key = &after[..close];
            let value = params
                .get(key)
                .ok_or_else(|| format!("unresolved parameter ${{{key}}}"))?;
            out.push_str(value);
            rest = &after[close + 1..];
        } else {
            out.push('$');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn split_documents(rendered: &str) -> impl Iterator<Item = &str> {
    rendered
        .split("\n---")
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty() && *chunk != "---")
}

/// True when every field the desired document declares is already present
/// with the same value in the live object. Live objects carry server-managed
/// fields the template never mentions, so equality is directional.
fn is_semantic_subset(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Object(want), Value::Object(have)) => want
            .iter()
            .all(|(key, value)| have.get(key).is_some_and(|v| is_semantic_subset(value, v))),
        (want, have) => want == have,
    }
}

/// Matcher for the one apply failure that is deliberately swallowed: an
/// update rejected because it would change an immutable workload selector.
/// Such resources are never re-selectable after creation, so the conflict is
/// semantically a successful no-op.
///
/// The match is on message substrings for now; if the cluster ever surfaces
/// a structured immutable-field cause this is the single place to widen.
pub fn is_immutable_selector_conflict(err: &Error) -> bool {
    let msg = err.to_string();
    msg.contains("spec.selector") && msg.contains("field is immutable")
}

/// Reconciles rendered documents into the cluster through a
/// [`ClusterAccess`] handle
pub struct Applier<'a> {
    cluster: &'a dyn ClusterAccess,
}

impl<'a> Applier<'a> {
    /// Create an applier over the given cluster handle
    pub fn new(cluster: &'a dyn ClusterAccess) -> Self {
        Self { cluster }
    }

    /// Create-or-update every document, skipping ones already in the desired
    /// state. Applying the same set twice performs no mutation on the second
    /// pass.
    pub async fn reconcile(&self, docs: &[Value]) -> Result<(), Error> {
        self.ensure_namespaces(docs).await?;

        for doc in docs {
            let oref = object_ref(doc)?;
            let live = self
                .cluster
                .get(&oref.gvk, oref.namespace.as_deref(), &oref.name)
                .await?;

            if live.as_ref().is_some_and(|live| is_semantic_subset(doc, live)) {
                debug!(resource = %oref, "Resource unchanged, skipping");
                continue;
            }

            if let Err(e) = self.cluster.apply(doc).await {
                // The exemption covers updates only; a selector conflict on
                // a freshly created object is a real failure.
                if live.is_some() && is_immutable_selector_conflict(&e) {
                    warn!(resource = %oref, error = %e, "Ignoring immutable selector conflict");
                    continue;
                }
                return Err(Error::Apply {
                    resource: oref.to_string(),
                    source: Box::new(e),
                });
            }
            info!(resource = %oref, "Applied resource");
        }
        Ok(())
    }

    /// Delete every document's counterpart from the cluster. Runs in reverse
    /// declaration order; absent objects are ignored.
    pub async fn prune(&self, docs: &[Value]) -> Result<(), Error> {
        for doc in docs.iter().rev() {
            let oref = object_ref(doc)?;
            self.cluster
                .delete(&oref.gvk, oref.namespace.as_deref(), &oref.name)
                .await
                .map_err(|e| Error::Apply {
                    resource: oref.to_string(),
                    source: Box::new(e),
                })?;
            debug!(resource = %oref, "Pruned resource");
        }
        Ok(())
    }

    /// Create any namespace the documents target that does not exist yet
    async fn ensure_namespaces(&self, docs: &[Value]) -> Result<(), Error> {
        let gvk = kube::api::GroupVersionKind::gvk("", "v1", "Namespace");
        let mut seen = BTreeSet::new();

        for doc in docs {
            let Some(ns) = doc.pointer("/metadata/namespace").and_then(Value::as_str) else {
                continue;
            };
            if !seen.insert(ns.to_string()) {
                continue;
            }
            if self.cluster.get(&gvk, None, ns).await?.is_none() {
                let namespace = json!({
                    "apiVersion": "v1",
                    "kind": "Namespace",
                    "metadata": {"name": ns},
                });
                self.cluster
                    .apply(&namespace)
                    .await
                    .map_err(|e| Error::Apply {
                        resource: format!("Namespace {ns}"),
                        source: Box::new(e),
                    })?;
                info!(namespace = %ns, "Created namespace");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterAccess;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitute_replaces_known_parameters() {
        let out = substitute(
            "namespace: ${mesh_namespace}\nname: ${mesh_name}",
            &params(&[("mesh_namespace", "istio-system"), ("mesh_name", "minimal")]),
        )
        .unwrap();
        assert_eq!(out, "namespace: istio-system\nname: minimal");
    }

    #[test]
    fn substitute_escapes_double_dollar() {
        let out = substitute("cmd: echo $${HOME} in ${ns}", &params(&[("ns", "apps")])).unwrap();
        assert_eq!(out, "cmd: echo ${HOME} in apps");
    }

    #[test]
    fn substitute_rejects_unknown_parameters() {
        let err = substitute("image: ${image_ref}", &params(&[])).unwrap_err();
        assert!(err.contains("image_ref"));
    }

    #[test]
    fn substitute_leaves_plain_dollars_alone() {
        let out = substitute("price: $5 for ${item}", &params(&[("item", "gateway")])).unwrap();
        assert_eq!(out, "price: $5 for gateway");
    }

    #[test]
    fn semantic_subset_ignores_server_managed_fields() {
        let desired = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "cm", "namespace": "apps"},
            "data": {"key": "value"},
        });
        let live = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "cm",
                "namespace": "apps",
                "uid": "abc-123",
                "resourceVersion": "42",
            },
            "data": {"key": "value"},
        });
        assert!(is_semantic_subset(&desired, &live));
    }

    #[test]
    fn semantic_subset_detects_drift() {
        let desired = json!({"data": {"key": "new-value"}});
        let live = json!({"data": {"key": "old-value"}, "metadata": {"uid": "abc"}});
        assert!(!is_semantic_subset(&desired, &live));
    }

    #[test]
    fn immutable_selector_conflict_requires_both_markers() {
        let conflict = Error::cluster(
            "Deployment.apps \"controller\" is invalid: spec.selector: Invalid value: field is immutable",
        );
        assert!(is_immutable_selector_conflict(&conflict));

        let other = Error::cluster("spec.selector: Invalid value: bad label");
        assert!(!is_immutable_selector_conflict(&other));

        let unrelated = Error::cluster("connection refused");
        assert!(!is_immutable_selector_conflict(&unrelated));
    }

    fn config_map(name: &str, value: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name, "namespace": "apps"},
            "data": {"key": value},
        })
    }

    #[tokio::test]
    async fn reconcile_creates_absent_resources() {
        let mut cluster = MockClusterAccess::new();
        cluster.expect_get().returning(|gvk, _, _| {
            // Namespace probe finds it, the config map is absent
            if gvk.kind == "Namespace" {
                Ok(Some(json!({"metadata": {"name": "apps"}})))
            } else {
                Ok(None)
            }
        });
        cluster.expect_apply().times(1).returning(|_| Ok(()));

        let docs = vec![config_map("cm", "value")];
        Applier::new(&cluster).reconcile(&docs).await.unwrap();
    }

    #[tokio::test]
    async fn reconcile_skips_unchanged_resources() {
        let desired = config_map("cm", "value");
        let live = {
            let mut live = desired.clone();
            live["metadata"]["uid"] = json!("abc-123");
            live
        };

        let mut cluster = MockClusterAccess::new();
        cluster.expect_get().returning(move |gvk, _, _| {
            if gvk.kind == "Namespace" {
                Ok(Some(json!({"metadata": {"name": "apps"}})))
            } else {
                Ok(Some(live.clone()))
            }
        });
        // Identical second pass: no apply calls at all
        cluster.expect_apply().times(0);

        let docs = vec![desired];
        Applier::new(&cluster).reconcile(&docs).await.unwrap();
    }

    #[tokio::test]
    async fn reconcile_updates_drifted_resources() {
        let live = config_map("cm", "old-value");
        let mut cluster = MockClusterAccess::new();
        cluster.expect_get().returning(move |gvk, _, _| {
            if gvk.kind == "Namespace" {
                Ok(Some(json!({"metadata": {"name": "apps"}})))
            } else {
                Ok(Some(live.clone()))
            }
        });
        cluster.expect_apply().times(1).returning(|_| Ok(()));

        let docs = vec![config_map("cm", "new-value")];
        Applier::new(&cluster).reconcile(&docs).await.unwrap();
    }

    #[tokio::test]
    async fn reconcile_swallows_immutable_selector_conflicts_on_update() {
        let live = config_map("cm", "old-value");
        let mut cluster = MockClusterAccess::new();
        cluster.expect_get().returning(move |gvk, _, _| {
            if gvk.kind == "Namespace" {
                Ok(Some(json!({"metadata": {"name": "apps"}})))
            } else {
                Ok(Some(live.clone()))
            }
        });
        cluster.expect_apply().returning(|_| {
            Err(Error::cluster(
                "spec.selector: Invalid value: field is immutable",
            ))
        });

        let docs = vec![config_map("cm", "new-value")];
        assert!(Applier::new(&cluster).reconcile(&docs).await.is_ok());
    }

    #[tokio::test]
    async fn selector_conflict_on_creation_still_propagates() {
        let mut cluster = MockClusterAccess::new();
        cluster.expect_get().returning(|gvk, _, _| {
            if gvk.kind == "Namespace" {
                Ok(Some(json!({"metadata": {"name": "apps"}})))
            } else {
                Ok(None)
            }
        });
        cluster.expect_apply().returning(|_| {
            Err(Error::cluster(
                "spec.selector: Invalid value: field is immutable",
            ))
        });

        let docs = vec![config_map("cm", "value")];
        let err = Applier::new(&cluster).reconcile(&docs).await.unwrap_err();
        assert!(matches!(err, Error::Apply { .. }));
    }

    #[tokio::test]
    async fn reconcile_propagates_other_apply_failures() {
        let mut cluster = MockClusterAccess::new();
        cluster.expect_get().returning(|gvk, _, _| {
            if gvk.kind == "Namespace" {
                Ok(Some(json!({"metadata": {"name": "apps"}})))
            } else {
                Ok(None)
            }
        });
        cluster
            .expect_apply()
            .returning(|_| Err(Error::cluster("admission webhook denied the request")));

        let docs = vec![config_map("cm", "value")];
        let err = Applier::new(&cluster).reconcile(&docs).await.unwrap_err();
        assert!(matches!(err, Error::Apply { .. }));
        assert!(err.to_string().contains("ConfigMap apps/cm"));
    }

    #[tokio::test]
    async fn reconcile_creates_missing_target_namespaces() {
        let mut cluster = MockClusterAccess::new();
        cluster.expect_get().returning(|_, _, _| Ok(None));
        // One apply for the namespace, one for the config map
        cluster.expect_apply().times(2).returning(|_| Ok(()));

        let docs = vec![config_map("cm", "value")];
        Applier::new(&cluster).reconcile(&docs).await.unwrap();
    }

    #[tokio::test]
    async fn prune_deletes_in_reverse_order_and_tolerates_absence() {
        use std::sync::{Arc, Mutex};

        let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = order.clone();
        let mut cluster = MockClusterAccess::new();
        cluster.expect_delete().returning(move |_, _, name| {
            seen.lock().unwrap().push(name.to_string());
            Ok(())
        });

        let docs = vec![config_map("first", "a"), config_map("second", "b")];
        Applier::new(&cluster).prune(&docs).await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["second", "first"]);
    }

    #[test]
    fn render_dir_substitutes_and_splits_documents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("10-namespace.yaml"),
            "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: ${ns}\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("20-config.yaml"),
            concat!(
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n  namespace: ${ns}\n",
                "---\n",
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n  namespace: ${ns}\n",
            ),
        )
        .unwrap();
        // Non-manifest files are ignored
        std::fs::write(dir.path().join("README.md"), "docs").unwrap();

        let docs = render_dir(dir.path(), &params(&[("ns", "apps")])).unwrap();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0]["kind"], "Namespace");
        assert_eq!(docs[0]["metadata"]["name"], "apps");
        assert_eq!(docs[1]["metadata"]["name"], "a");
        assert_eq!(docs[2]["metadata"]["namespace"], "apps");
    }

    #[test]
    fn render_dir_fails_on_unresolved_parameter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("bad.yaml"),
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: ${missing}\n",
        )
        .unwrap();

        let err = render_dir(dir.path(), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, Error::Render { .. }));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn render_dir_fails_on_missing_root() {
        let err = render_dir(Path::new("/nonexistent/render/root"), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, Error::Render { .. }));
    }
}
