//! In-memory handle on one remote object plus the conflict merge policy.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value as Json};

use crate::document::{Document, ResourceRef};
use crate::error::FerryError;
use crate::phase::Phase;

/// Local copy of a remote declarative object.
///
/// `bound` is true only once the object was created or read through the
/// store, and only then does it carry a version token. Setters touch the
/// local copy and never the network.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedObject {
    reference: ResourceRef,
    spec: Json,
    status: Json,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    /// Top-level fields other than apiVersion/kind/metadata/spec/status (e.g. `data`).
    rest: Map<String, Json>,
    version_token: Option<String>,
    generation: Option<i64>,
    bound: bool,
    last_update: Option<DateTime<Utc>>,
}

fn string_map(v: Option<&Json>) -> BTreeMap<String, String> {
    v.and_then(|m| m.as_object())
        .map(|m| m.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
        .unwrap_or_default()
}

fn split_body(doc: Json) -> (Json, Json, Json, Map<String, Json>) {
    let mut obj = match doc {
        Json::Object(m) => m,
        _ => Map::new(),
    };
    let meta = obj.remove("metadata").unwrap_or(Json::Null);
    let spec = obj.remove("spec").unwrap_or_else(|| Json::Object(Map::new()));
    let status = obj.remove("status").unwrap_or_else(|| Json::Object(Map::new()));
    obj.remove("apiVersion");
    obj.remove("kind");
    (meta, spec, status, obj)
}

impl VersionedObject {
    /// Unbound object built from a manifest document. Any resourceVersion
    /// carried by the document is dropped.
    pub fn from_document(doc: Document, default_ns: Option<&str>) -> Result<Self, FerryError> {
        let reference = doc.reference(default_ns)?;
        let (meta, spec, status, rest) = split_body(doc.into_inner());
        Ok(Self {
            reference,
            spec,
            status,
            labels: string_map(meta.get("labels")),
            annotations: string_map(meta.get("annotations")),
            rest,
            version_token: None,
            generation: None,
            bound: false,
            last_update: None,
        })
    }

    /// Bound object built from a body returned by the store.
    pub fn from_remote(body: Json) -> Result<Self, FerryError> {
        let mut obj = Self::from_document(Document::new(body.clone()), None)?;
        obj.sync_from_remote(body)?;
        Ok(obj)
    }

    /// Empty unbound object for `reference`, filled in by setters.
    pub fn new(reference: ResourceRef) -> Self {
        Self {
            reference,
            spec: Json::Object(Map::new()),
            status: Json::Object(Map::new()),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            rest: Map::new(),
            version_token: None,
            generation: None,
            bound: false,
            last_update: None,
        }
    }

    /// Replace the local copy with the body the store returned and bind it.
    pub fn sync_from_remote(&mut self, body: Json) -> Result<(), FerryError> {
        let doc = Document::new(body);
        let reference = doc.reference(None)?;
        let token = doc.resource_version().map(|s| s.to_string());
        let (meta, spec, status, rest) = split_body(doc.into_inner());
        self.reference = reference;
        self.spec = spec;
        self.status = status;
        self.labels = string_map(meta.get("labels"));
        self.annotations = string_map(meta.get("annotations"));
        self.rest = rest;
        self.generation = meta.get("generation").and_then(|g| g.as_i64());
        self.version_token = token;
        self.bound = true;
        self.last_update = Some(Utc::now());
        Ok(())
    }

    /// Set the namespace of the reference; `None` for cluster-scoped kinds.
    pub fn rescope(&mut self, namespace: Option<String>) { self.reference.namespace = namespace; }

    /// The remote object is gone; the handle must be re-created or re-loaded.
    pub fn mark_deleted(&mut self) {
        self.bound = false;
        self.version_token = None;
        self.generation = None;
        self.last_update = Some(Utc::now());
    }

    pub fn reference(&self) -> &ResourceRef { &self.reference }
    pub fn is_bound(&self) -> bool { self.bound }
    pub fn version_token(&self) -> Option<&str> { self.version_token.as_deref() }
    pub fn generation(&self) -> Option<i64> { self.generation }
    pub fn last_update(&self) -> Option<DateTime<Utc>> { self.last_update }

    pub fn spec(&self) -> &Json { &self.spec }
    pub fn spec_mut(&mut self) -> &mut Json { &mut self.spec }
    pub fn set_spec(&mut self, spec: Json) { self.spec = spec; }

    pub fn status(&self) -> &Json { &self.status }
    pub fn set_status(&mut self, status: Json) { self.status = status; }

    pub fn labels(&self) -> &BTreeMap<String, String> { &self.labels }
    pub fn set_label(&mut self, k: &str, v: &str) { self.labels.insert(k.to_string(), v.to_string()); }
    pub fn annotations(&self) -> &BTreeMap<String, String> { &self.annotations }
    pub fn set_annotation(&mut self, k: &str, v: &str) { self.annotations.insert(k.to_string(), v.to_string()); }

    pub fn field(&self, key: &str) -> Option<&Json> { self.rest.get(key) }
    pub fn set_field(&mut self, key: &str, value: Json) { self.rest.insert(key.to_string(), value); }

    pub fn phase(&self) -> Option<Phase> { self.status.get("phase").and_then(|p| p.as_str()).map(Phase::parse) }
    pub fn message(&self) -> Option<&str> { self.status.get("message").and_then(|m| m.as_str()) }
    pub fn observed_generation(&self) -> Option<i64> { self.status.get("observedGeneration").and_then(|g| g.as_i64()) }

    /// Full wire body; carries `metadata.resourceVersion` only when bound.
    pub fn to_document(&self) -> Document {
        let mut meta = Map::new();
        meta.insert("name".into(), Json::String(self.reference.name.clone()));
        if let Some(ns) = &self.reference.namespace {
            meta.insert("namespace".into(), Json::String(ns.clone()));
        }
        if !self.labels.is_empty() {
            meta.insert("labels".into(), serde_json::json!(self.labels));
        }
        if !self.annotations.is_empty() {
            meta.insert("annotations".into(), serde_json::json!(self.annotations));
        }
        if let Some(rv) = &self.version_token {
            meta.insert("resourceVersion".into(), Json::String(rv.clone()));
        }
        let mut body = Map::new();
        body.insert("apiVersion".into(), Json::String(self.reference.api_version()));
        body.insert("kind".into(), Json::String(self.reference.kind.clone()));
        body.insert("metadata".into(), Json::Object(meta));
        for (k, v) in self.rest.iter() {
            body.insert(k.clone(), v.clone());
        }
        body.insert("spec".into(), self.spec.clone());
        body.insert("status".into(), self.status.clone());
        Document::new(Json::Object(body))
    }
}

/// Client-side merge after a version conflict.
///
/// The client owns `spec`, labels, annotations and other top-level fields; the
/// controller owns `status`. The result takes status, version token and
/// generation from `remote` and everything client-owned from `local`. Remote
/// labels/annotations not present locally are kept.
pub fn merge(local: &VersionedObject, remote: &VersionedObject) -> VersionedObject {
    let mut out = remote.clone();
    out.spec = local.spec.clone();
    out.rest = local.rest.clone();
    for (k, v) in local.labels.iter() {
        out.labels.insert(k.clone(), v.clone());
    }
    for (k, v) in local.annotations.iter() {
        out.annotations.insert(k.clone(), v.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn remote_body() -> Json {
        json!({
            "apiVersion": "mongodb.com/v1",
            "kind": "MongoDB",
            "metadata": {
                "name": "rs", "namespace": "ns", "resourceVersion": "7", "generation": 3,
                "labels": { "team": "db", "owner": "ops" }
            },
            "spec": { "members": 3 },
            "status": { "phase": "Running", "observedGeneration": 3, "message": "ok" }
        })
    }

    #[test]
    fn document_objects_start_unbound_without_token() {
        let doc = Document::new(json!({
            "apiVersion": "v1", "kind": "ConfigMap",
            "metadata": { "name": "c", "resourceVersion": "99" },
            "data": { "k": "v" }
        }));
        let o = VersionedObject::from_document(doc, Some("ns")).unwrap();
        assert!(!o.is_bound());
        assert_eq!(o.version_token(), None);
        assert_eq!(o.reference().namespace.as_deref(), Some("ns"));
        assert_eq!(o.field("data"), Some(&json!({ "k": "v" })));
        let body = o.to_document();
        assert_eq!(body.resource_version(), None);
        assert_eq!(body.as_json()["data"]["k"], "v");
    }

    #[test]
    fn remote_objects_are_bound_with_token() {
        let o = VersionedObject::from_remote(remote_body()).unwrap();
        assert!(o.is_bound());
        assert_eq!(o.version_token(), Some("7"));
        assert_eq!(o.generation(), Some(3));
        assert_eq!(o.observed_generation(), Some(3));
        assert_eq!(o.phase(), Some(Phase::Running));
        assert_eq!(o.message(), Some("ok"));
        assert!(o.last_update().is_some());
        assert_eq!(o.to_document().resource_version(), Some("7"));
    }

    #[test]
    fn merge_keeps_local_spec_and_remote_status() {
        let remote = VersionedObject::from_remote(remote_body()).unwrap();
        let mut local = remote.clone();
        local.set_spec(json!({ "override": "test" }));
        local.set_status(json!({ "status": "pending" }));
        local.set_label("team", "platform");

        let mut newer = remote_body();
        newer["metadata"]["resourceVersion"] = json!("9");
        newer["status"] = json!({ "status": "running" });
        let remote = VersionedObject::from_remote(newer).unwrap();

        let merged = merge(&local, &remote);
        assert_eq!(merged.spec(), &json!({ "override": "test" }));
        assert_eq!(merged.status(), &json!({ "status": "running" }));
        assert_eq!(merged.version_token(), Some("9"));
        assert_eq!(merged.labels().get("team").map(String::as_str), Some("platform"));
        assert_eq!(merged.labels().get("owner").map(String::as_str), Some("ops"));
        assert!(merged.is_bound());
    }

    #[test]
    fn deletion_unbinds() {
        let mut o = VersionedObject::from_remote(remote_body()).unwrap();
        o.mark_deleted();
        assert!(!o.is_bound());
        assert_eq!(o.version_token(), None);
    }
}
