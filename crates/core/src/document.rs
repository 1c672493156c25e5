//! Untyped declarative documents and object references.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::error::FerryError;
use crate::naming::{api_version, split_api_version};

/// Identity of one remote object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceRef {
    pub fn new(api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> Self {
        let (group, version) = split_api_version(api_version);
        Self { group, version, kind: kind.to_string(), namespace: namespace.map(|s| s.to_string()), name: name.to_string() }
    }

    pub fn api_version(&self) -> String { api_version(&self.group, &self.version) }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{} {}/{}", self.api_version(), self.kind, ns, self.name),
            None => write!(f, "{}/{} {}", self.api_version(), self.kind, self.name),
        }
    }
}

/// A single manifest document. `List` documents never reach the wire; the
/// loader expands them first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(pub Json);

impl Document {
    pub fn new(value: Json) -> Self { Self(value) }

    pub fn into_inner(self) -> Json { self.0 }

    pub fn as_json(&self) -> &Json { &self.0 }

    fn str_at(&self, path: &[&str]) -> Option<&str> {
        let mut cur = &self.0;
        for seg in path {
            cur = cur.get(*seg)?;
        }
        cur.as_str()
    }

    pub fn api_version(&self) -> Option<&str> { self.str_at(&["apiVersion"]) }
    pub fn kind(&self) -> Option<&str> { self.str_at(&["kind"]) }
    pub fn name(&self) -> Option<&str> { self.str_at(&["metadata", "name"]) }
    pub fn namespace(&self) -> Option<&str> { self.str_at(&["metadata", "namespace"]) }
    pub fn resource_version(&self) -> Option<&str> { self.str_at(&["metadata", "resourceVersion"]) }

    /// Reference for this document; explicit `metadata.namespace` wins over `default_ns`.
    pub fn reference(&self, default_ns: Option<&str>) -> Result<ResourceRef, FerryError> {
        let av = self.api_version().ok_or_else(|| FerryError::MalformedDocument("missing apiVersion".into()))?;
        let kind = self.kind().ok_or_else(|| FerryError::MalformedDocument("missing kind".into()))?;
        let name = self.name().ok_or_else(|| FerryError::MalformedDocument("missing metadata.name".into()))?;
        Ok(ResourceRef::new(av, kind, self.namespace().or(default_ns), name))
    }

    fn metadata_mut(&mut self) -> Option<&mut Map<String, Json>> {
        let obj = self.0.as_object_mut()?;
        obj.entry("metadata").or_insert_with(|| Json::Object(Map::new())).as_object_mut()
    }

    pub fn set_namespace(&mut self, ns: &str) {
        if let Some(meta) = self.metadata_mut() {
            meta.insert("namespace".into(), Json::String(ns.to_string()));
        }
    }

    pub fn set_resource_version(&mut self, rv: &str) {
        if let Some(meta) = self.metadata_mut() {
            meta.insert("resourceVersion".into(), Json::String(rv.to_string()));
        }
    }
}

impl From<Json> for Document {
    fn from(v: Json) -> Self { Self(v) }
}
