//! In-process store with compare-and-swap on resourceVersion.
//!
//! Stands in for an API server in tests: faults can be queued per verb, and a
//! status script emulates a controller progressing an object on each read.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value as Json};

use ferry_core::naming::split_api_version;
use ferry_core::{is_schema_kind, Document, GvkEndpoint, ResourceRef, StoreError};

use crate::{ResourceStore, Verb};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub group: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn from_ref(r: &ResourceRef) -> Self {
        Self { group: r.group.clone(), kind: r.kind.clone(), namespace: r.namespace.clone(), name: r.name.clone() }
    }

    fn of(ep: &GvkEndpoint, namespace: Option<&str>, name: &str) -> Self {
        Self { group: ep.group.clone(), kind: ep.kind.clone(), namespace: namespace.map(|s| s.to_string()), name: name.to_string() }
    }
}

/// Failure to inject on the next call of a verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    AlreadyExists,
    Conflict,
    NotFound,
    ValidationRejected,
    Transport,
}

impl Fault {
    fn into_error(self, verb: Verb) -> StoreError {
        let msg = format!("injected on {:?}", verb);
        match self {
            Fault::AlreadyExists => StoreError::AlreadyExists(msg),
            Fault::Conflict => StoreError::VersionConflict(msg),
            Fault::NotFound => StoreError::NotFound(msg),
            Fault::ValidationRejected => StoreError::ValidationRejected(msg),
            Fault::Transport => StoreError::Transport(anyhow!(msg)),
        }
    }
}

#[derive(Default)]
struct Inner {
    objects: FxHashMap<ObjectKey, Json>,
    next_rv: u64,
    faults: FxHashMap<Verb, VecDeque<Fault>>,
    scripts: FxHashMap<ObjectKey, VecDeque<Json>>,
    calls: FxHashMap<Verb, usize>,
}

impl Inner {
    fn bump_rv(&mut self) -> String {
        self.next_rv += 1;
        self.next_rv.to_string()
    }

    fn enter(&mut self, verb: Verb) -> Result<(), StoreError> {
        *self.calls.entry(verb).or_insert(0) += 1;
        match self.faults.get_mut(&verb).and_then(|q| q.pop_front()) {
            Some(f) => Err(f.into_error(verb)),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

fn meta_mut(v: &mut Json) -> Option<&mut Map<String, Json>> {
    let obj = v.as_object_mut()?;
    obj.entry("metadata").or_insert_with(|| Json::Object(Map::new())).as_object_mut()
}

fn rv_of(v: &Json) -> Option<&str> {
    v.get("metadata").and_then(|m| m.get("resourceVersion")).and_then(|r| r.as_str())
}

fn generation_of(v: &Json) -> i64 {
    v.get("metadata").and_then(|m| m.get("generation")).and_then(|g| g.as_i64()).unwrap_or(0)
}

/// RFC 7386 JSON merge patch: `null` deletes a key, objects merge, anything else replaces.
pub fn merge_patch(target: &mut Json, patch: &Json) {
    match patch {
        Json::Object(p) => {
            if !target.is_object() {
                *target = Json::Object(Map::new());
            }
            if let Json::Object(t) = target {
                for (k, v) in p {
                    if v.is_null() {
                        t.remove(k);
                    } else {
                        merge_patch(t.entry(k.clone()).or_insert(Json::Null), v);
                    }
                }
            }
        }
        other => *target = other.clone(),
    }
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Insert an object as if it already existed remotely; returns the stored body.
    pub fn seed(&self, body: Json) -> Json {
        let doc = Document::new(body);
        let (group, _) = split_api_version(doc.api_version().unwrap_or_default());
        let key = ObjectKey {
            group,
            kind: doc.kind().unwrap_or_default().to_string(),
            namespace: doc.namespace().map(|s| s.to_string()),
            name: doc.name().unwrap_or_default().to_string(),
        };
        let mut body = doc.into_inner();
        let mut inner = self.lock();
        let rv = inner.bump_rv();
        if let Some(meta) = meta_mut(&mut body) {
            meta.insert("resourceVersion".into(), Json::String(rv));
            meta.entry("generation").or_insert(Json::from(1));
        }
        inner.objects.insert(key, body.clone());
        body
    }

    pub fn get(&self, r: &ResourceRef) -> Option<Json> { self.lock().objects.get(&ObjectKey::from_ref(r)).cloned() }

    pub fn len(&self) -> usize { self.lock().objects.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Fail the next `times` calls of `verb` with `fault`.
    pub fn fail_next(&self, verb: Verb, fault: Fault, times: usize) {
        let mut inner = self.lock();
        let q = inner.faults.entry(verb).or_default();
        for _ in 0..times {
            q.push_back(fault);
        }
    }

    pub fn calls(&self, verb: Verb) -> usize { self.lock().calls.get(&verb).copied().unwrap_or(0) }

    /// Controller-side status write; bumps the resourceVersion.
    pub fn set_status(&self, r: &ResourceRef, status: Json) -> bool {
        let mut inner = self.lock();
        let rv = inner.bump_rv();
        match inner.objects.get_mut(&ObjectKey::from_ref(r)) {
            Some(obj) => {
                obj["status"] = status;
                if let Some(meta) = meta_mut(obj) {
                    meta.insert("resourceVersion".into(), Json::String(rv));
                }
                true
            }
            None => false,
        }
    }

    /// Each subsequent read of `r` first applies the next status from `statuses`.
    pub fn script_status(&self, r: &ResourceRef, statuses: Vec<Json>) {
        self.lock().scripts.insert(ObjectKey::from_ref(r), statuses.into());
    }
}

#[async_trait::async_trait]
impl ResourceStore for MemoryStore {
    async fn create(&self, ep: &GvkEndpoint, namespace: Option<&str>, body: &Json) -> Result<Json, StoreError> {
        let mut inner = self.lock();
        inner.enter(Verb::Create)?;
        let name = body
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(|n| n.as_str())
            .ok_or_else(|| StoreError::ValidationRejected("metadata.name: Required value".into()))?;
        let key = ObjectKey::of(ep, namespace, name);
        if inner.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(format!("{} {:?} already exists", ep.plural, name)));
        }
        let mut stored = body.clone();
        let rv = inner.bump_rv();
        if let Some(meta) = meta_mut(&mut stored) {
            meta.insert("resourceVersion".into(), Json::String(rv));
            meta.insert("generation".into(), Json::from(1));
        }
        inner.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn patch(&self, ep: &GvkEndpoint, namespace: Option<&str>, name: &str, body: &Json) -> Result<Json, StoreError> {
        let mut inner = self.lock();
        inner.enter(Verb::Patch)?;
        let key = ObjectKey::of(ep, namespace, name);
        let current = inner.objects.get(&key).cloned().ok_or_else(|| StoreError::NotFound(format!("{} {:?} not found", ep.plural, name)))?;
        if let Some(want) = rv_of(body) {
            if Some(want) != rv_of(&current) {
                return Err(StoreError::VersionConflict(format!(
                    "the object has been modified; please apply your changes to the latest version ({} != {:?})",
                    want,
                    rv_of(&current)
                )));
            }
        }
        let mut next = current.clone();
        let mut patch = body.clone();
        if let Some(meta) = patch.get_mut("metadata").and_then(|m| m.as_object_mut()) {
            meta.remove("resourceVersion");
            meta.remove("generation");
        }
        merge_patch(&mut next, &patch);
        let generation = generation_of(&current) + i64::from(next.get("spec") != current.get("spec"));
        let rv = inner.bump_rv();
        if let Some(meta) = meta_mut(&mut next) {
            meta.insert("resourceVersion".into(), Json::String(rv));
            meta.insert("generation".into(), Json::from(generation));
        }
        inner.objects.insert(key, next.clone());
        Ok(next)
    }

    async fn replace(&self, ep: &GvkEndpoint, namespace: Option<&str>, name: &str, body: &Json) -> Result<Json, StoreError> {
        let mut inner = self.lock();
        inner.enter(Verb::Replace)?;
        let key = ObjectKey::of(ep, namespace, name);
        let current = inner.objects.get(&key).cloned().ok_or_else(|| StoreError::NotFound(format!("{} {:?} not found", ep.plural, name)))?;
        match rv_of(body) {
            Some(want) if Some(want) != rv_of(&current) => {
                return Err(StoreError::VersionConflict(format!("stale resourceVersion {}", want)));
            }
            None if is_schema_kind(&ep.kind) => {
                return Err(StoreError::ValidationRejected("metadata.resourceVersion: must be specified for an update".into()));
            }
            _ => {}
        }
        let mut next = body.clone();
        if next.get("status").is_none() {
            if let (Some(obj), Some(status)) = (next.as_object_mut(), current.get("status")) {
                obj.insert("status".into(), status.clone());
            }
        }
        let generation = generation_of(&current) + i64::from(next.get("spec") != current.get("spec"));
        let rv = inner.bump_rv();
        if let Some(meta) = meta_mut(&mut next) {
            meta.insert("resourceVersion".into(), Json::String(rv));
            meta.insert("generation".into(), Json::from(generation));
        }
        inner.objects.insert(key, next.clone());
        Ok(next)
    }

    async fn read(&self, ep: &GvkEndpoint, namespace: Option<&str>, name: &str) -> Result<Json, StoreError> {
        let mut inner = self.lock();
        inner.enter(Verb::Read)?;
        let key = ObjectKey::of(ep, namespace, name);
        let scripted = inner.scripts.get_mut(&key).and_then(|q| q.pop_front());
        if !inner.objects.contains_key(&key) {
            return Err(StoreError::NotFound(format!("{} {:?} not found", ep.plural, name)));
        }
        if let Some(status) = scripted {
            let rv = inner.bump_rv();
            if let Some(obj) = inner.objects.get_mut(&key) {
                obj["status"] = status;
                if let Some(meta) = meta_mut(obj) {
                    meta.insert("resourceVersion".into(), Json::String(rv));
                }
            }
        }
        inner.objects.get(&key).cloned().ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn delete(&self, ep: &GvkEndpoint, namespace: Option<&str>, name: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.enter(Verb::Delete)?;
        let key = ObjectKey::of(ep, namespace, name);
        inner.scripts.remove(&key);
        match inner.objects.remove(&key) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(format!("{} {:?} not found", ep.plural, name))),
        }
    }
}
