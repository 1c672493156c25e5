//! Resource locator: an explicit registry from group/version/kind to endpoint.
//!
//! Keys are derived with the naming rules in [`crate::naming`]: the handler
//! name selects a group/version entry and the snake-case verb kind selects the
//! resource inside it. Scope is whatever the handler registered for the kind.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::LocatorError;
use crate::naming::{api_version, handler_name, verb_kind};

/// Kind whose replace needs the live resourceVersion and whose create may be
/// rejected by validation on some servers.
pub const SCHEMA_KIND: &str = "CustomResourceDefinition";

pub fn is_schema_kind(kind: &str) -> bool { kind == SCHEMA_KIND }

/// Resolved endpoint for one group/version/kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GvkEndpoint {
    pub handler: String,
    pub verb_kind: String,
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
}

impl GvkEndpoint {
    pub fn api_version(&self) -> String { api_version(&self.group, &self.version) }

    /// Collection path with a `{namespace}` placeholder for namespaced kinds.
    pub fn path_template(&self) -> String {
        let base = if self.group.is_empty() {
            format!("/api/{}", self.version)
        } else {
            format!("/apis/{}/{}", self.group, self.version)
        };
        if self.namespaced {
            format!("{}/namespaces/{{namespace}}/{}", base, self.plural)
        } else {
            format!("{}/{}", base, self.plural)
        }
    }

    pub fn gvk_key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

#[derive(Debug, Clone)]
struct KindEntry {
    kind: String,
    plural: String,
    namespaced: bool,
}

#[derive(Debug, Clone)]
struct HandlerEntry {
    group: String,
    version: String,
    kinds: FxHashMap<String, KindEntry>,
}

/// Handler table built once per session and passed explicitly to callers.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    handlers: FxHashMap<String, HandlerEntry>,
}

/// `(group, version, kind, plural, namespaced)` for kinds every cluster serves.
const BUILTINS: &[(&str, &str, &str, &str, bool)] = &[
    ("", "v1", "Namespace", "namespaces", false),
    ("", "v1", "Node", "nodes", false),
    ("", "v1", "PersistentVolume", "persistentvolumes", false),
    ("", "v1", "ConfigMap", "configmaps", true),
    ("", "v1", "Secret", "secrets", true),
    ("", "v1", "Service", "services", true),
    ("", "v1", "ServiceAccount", "serviceaccounts", true),
    ("", "v1", "Pod", "pods", true),
    ("", "v1", "PersistentVolumeClaim", "persistentvolumeclaims", true),
    ("apps", "v1", "Deployment", "deployments", true),
    ("apps", "v1", "StatefulSet", "statefulsets", true),
    ("apps", "v1", "DaemonSet", "daemonsets", true),
    ("batch", "v1", "Job", "jobs", true),
    ("policy", "v1", "PodDisruptionBudget", "poddisruptionbudgets", true),
    ("rbac.authorization.k8s.io", "v1", "Role", "roles", true),
    ("rbac.authorization.k8s.io", "v1", "RoleBinding", "rolebindings", true),
    ("rbac.authorization.k8s.io", "v1", "ClusterRole", "clusterroles", false),
    ("rbac.authorization.k8s.io", "v1", "ClusterRoleBinding", "clusterrolebindings", false),
    ("apiextensions.k8s.io", "v1", "CustomResourceDefinition", "customresourcedefinitions", false),
    ("admissionregistration.k8s.io", "v1", "ValidatingWebhookConfiguration", "validatingwebhookconfigurations", false),
    ("admissionregistration.k8s.io", "v1", "MutatingWebhookConfiguration", "mutatingwebhookconfigurations", false),
];

impl Registry {
    pub fn new() -> Self { Self::default() }

    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        for (group, version, kind, plural, namespaced) in BUILTINS {
            reg.register(group, version, kind, plural, *namespaced);
        }
        reg
    }

    /// Register (or overwrite) a kind under its derived handler key.
    pub fn register(&mut self, group: &str, version: &str, kind: &str, plural: &str, namespaced: bool) {
        let entry = self.handlers.entry(handler_name(group, version)).or_insert_with(|| HandlerEntry {
            group: group.to_string(),
            version: version.to_string(),
            kinds: FxHashMap::default(),
        });
        entry.kinds.insert(
            verb_kind(kind),
            KindEntry { kind: kind.to_string(), plural: plural.to_string(), namespaced },
        );
    }

    pub fn len(&self) -> usize { self.handlers.values().map(|h| h.kinds.len()).sum() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn locate(&self, group: &str, version: &str, kind: &str) -> Result<GvkEndpoint, LocatorError> {
        let handler = handler_name(group, version);
        let entry = self.handlers.get(&handler).ok_or_else(|| LocatorError::UnknownGroupVersion {
            handler: handler.clone(),
            group: group.to_string(),
            version: version.to_string(),
        })?;
        let vk = verb_kind(kind);
        let k = entry.kinds.get(&vk).ok_or_else(|| LocatorError::UnknownKind {
            handler: handler.clone(),
            kind: kind.to_string(),
            verb_kind: vk.clone(),
        })?;
        Ok(GvkEndpoint {
            handler,
            verb_kind: vk,
            group: entry.group.clone(),
            version: entry.version.clone(),
            kind: k.kind.clone(),
            plural: k.plural.clone(),
            namespaced: k.namespaced,
        })
    }

    /// Locate from an `apiVersion` string plus kind, as found in documents.
    pub fn locate_api_version(&self, api_version: &str, kind: &str) -> Result<GvkEndpoint, LocatorError> {
        let (group, version) = crate::naming::split_api_version(api_version);
        self.locate(&group, &version, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_resolve_scope_and_paths() {
        let reg = Registry::with_builtins();
        let cm = reg.locate("", "v1", "ConfigMap").unwrap();
        assert_eq!(cm.handler, "CoreV1Api");
        assert_eq!(cm.verb_kind, "config_map");
        assert!(cm.namespaced);
        assert_eq!(cm.path_template(), "/api/v1/namespaces/{namespace}/configmaps");

        let crd = reg.locate("apiextensions.k8s.io", "v1", "CustomResourceDefinition").unwrap();
        assert_eq!(crd.handler, "ApiextensionsV1Api");
        assert!(!crd.namespaced);
        assert_eq!(crd.path_template(), "/apis/apiextensions.k8s.io/v1/customresourcedefinitions");
    }

    #[test]
    fn unknown_group_version_and_kind_are_locator_errors() {
        let reg = Registry::with_builtins();
        match reg.locate("example.com", "v1", "Widget") {
            Err(LocatorError::UnknownGroupVersion { handler, .. }) => assert_eq!(handler, "ExampleComV1Api"),
            other => panic!("unexpected: {:?}", other),
        }
        match reg.locate("apps", "v1", "Widget") {
            Err(LocatorError::UnknownKind { verb_kind, .. }) => assert_eq!(verb_kind, "widget"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn custom_kinds_register_under_condensed_group() {
        let mut reg = Registry::new();
        reg.register("mongodb.com", "v1", "MongoDBOpsManager", "opsmanagers", true);
        let ep = reg.locate_api_version("mongodb.com/v1", "MongoDBOpsManager").unwrap();
        assert_eq!(ep.handler, "MongodbComV1Api");
        assert_eq!(ep.verb_kind, "mongo_db_ops_manager");
        assert_eq!(ep.gvk_key(), "mongodb.com/v1/MongoDBOpsManager");
        assert_eq!(ep.api_version(), "mongodb.com/v1");
        assert!(is_schema_kind("CustomResourceDefinition"));
        assert!(!is_schema_kind("MongoDBOpsManager"));
    }
}
