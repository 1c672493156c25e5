//! Ferry kubehub: the resource store seam, discovery into the registry, and the client context.

#![forbid(unsafe_code)]

use std::sync::Arc;

use metrics::counter;
use serde_json::Value as Json;
use tracing::{debug, info};

use ferry_core::{Document, FerryError, GvkEndpoint, LocatorError, Registry, ResourceRef, StoreError, VersionedObject};

mod kube_store;
pub mod memory;

pub use kube_store::{discover_registry, KubeStore};
pub use memory::MemoryStore;

/// Wire verbs a store exposes for every registered kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Create,
    Patch,
    Replace,
    Read,
    Delete,
}

/// Backend that executes verbs against one endpoint. `namespace` is `Some`
/// exactly when the endpoint is namespaced; [`Handler`] guarantees that.
#[async_trait::async_trait]
pub trait ResourceStore: Send + Sync {
    async fn create(&self, ep: &GvkEndpoint, namespace: Option<&str>, body: &Json) -> Result<Json, StoreError>;
    /// Merge patch; a `metadata.resourceVersion` in `body` makes it conditional.
    async fn patch(&self, ep: &GvkEndpoint, namespace: Option<&str>, name: &str, body: &Json) -> Result<Json, StoreError>;
    async fn replace(&self, ep: &GvkEndpoint, namespace: Option<&str>, name: &str, body: &Json) -> Result<Json, StoreError>;
    async fn read(&self, ep: &GvkEndpoint, namespace: Option<&str>, name: &str) -> Result<Json, StoreError>;
    async fn delete(&self, ep: &GvkEndpoint, namespace: Option<&str>, name: &str) -> Result<(), StoreError>;
}

/// Verbs for one located kind, dispatching to the namespaced or cluster
/// form of each call depending on the endpoint scope.
pub struct Handler<'a> {
    endpoint: GvkEndpoint,
    store: &'a dyn ResourceStore,
    default_namespace: &'a str,
}

impl<'a> Handler<'a> {
    pub fn endpoint(&self) -> &GvkEndpoint { &self.endpoint }

    /// `reference` with its namespace set exactly when the kind is namespaced.
    pub fn scoped_ref(&self, reference: &ResourceRef) -> ResourceRef {
        let mut out = reference.clone();
        out.namespace = self.scope(reference.namespace.as_deref()).map(|s| s.to_string());
        out
    }

    /// Effective namespace: `Some(ns or default)` for namespaced kinds, `None` otherwise.
    pub fn scope<'n>(&'n self, namespace: Option<&'n str>) -> Option<&'n str> {
        if self.endpoint.namespaced { Some(namespace.unwrap_or(self.default_namespace)) } else { None }
    }

    fn scoped_body(&self, body: &Json, namespace: Option<&str>) -> Json {
        let mut doc = Document::new(body.clone());
        match namespace {
            Some(ns) => doc.set_namespace(ns),
            None => {
                if let Some(meta) = doc.0.get_mut("metadata").and_then(|m| m.as_object_mut()) {
                    meta.remove("namespace");
                }
            }
        }
        doc.into_inner()
    }

    pub async fn create(&self, namespace: Option<&str>, body: &Json) -> Result<Json, StoreError> {
        let ns = self.scope(namespace);
        debug!(handler = %self.endpoint.handler, verb = %format!("create_{}", self.verb_suffix(ns)), ns = ?ns, "store call");
        record("create", self.store.create(&self.endpoint, ns, &self.scoped_body(body, ns)).await)
    }

    pub async fn patch(&self, namespace: Option<&str>, name: &str, body: &Json) -> Result<Json, StoreError> {
        let ns = self.scope(namespace);
        debug!(handler = %self.endpoint.handler, verb = %format!("patch_{}", self.verb_suffix(ns)), ns = ?ns, name, "store call");
        record("patch", self.store.patch(&self.endpoint, ns, name, &self.scoped_body(body, ns)).await)
    }

    pub async fn replace(&self, namespace: Option<&str>, name: &str, body: &Json) -> Result<Json, StoreError> {
        let ns = self.scope(namespace);
        debug!(handler = %self.endpoint.handler, verb = %format!("replace_{}", self.verb_suffix(ns)), ns = ?ns, name, "store call");
        record("replace", self.store.replace(&self.endpoint, ns, name, &self.scoped_body(body, ns)).await)
    }

    pub async fn read(&self, namespace: Option<&str>, name: &str) -> Result<Json, StoreError> {
        let ns = self.scope(namespace);
        debug!(handler = %self.endpoint.handler, verb = %format!("read_{}", self.verb_suffix(ns)), ns = ?ns, name, "store call");
        record("read", self.store.read(&self.endpoint, ns, name).await)
    }

    pub async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<(), StoreError> {
        let ns = self.scope(namespace);
        debug!(handler = %self.endpoint.handler, verb = %format!("delete_{}", self.verb_suffix(ns)), ns = ?ns, name, "store call");
        record("delete", self.store.delete(&self.endpoint, ns, name).await)
    }

    // `namespaced_config_map` vs `custom_resource_definition`
    fn verb_suffix(&self, ns: Option<&str>) -> String {
        if ns.is_some() { format!("namespaced_{}", self.endpoint.verb_kind) } else { self.endpoint.verb_kind.clone() }
    }
}

fn record<T>(verb: &'static str, res: Result<T, StoreError>) -> Result<T, StoreError> {
    counter!("store_calls_total", 1u64, "verb" => verb);
    if res.is_err() {
        counter!("store_errors_total", 1u64, "verb" => verb);
    }
    res
}

/// One logical session: the registry and the store, passed to every call.
#[derive(Clone)]
pub struct ClientContext {
    registry: Arc<Registry>,
    store: Arc<dyn ResourceStore>,
    default_namespace: String,
}

impl ClientContext {
    pub fn new(registry: Registry, store: Arc<dyn ResourceStore>) -> Self {
        Self { registry: Arc::new(registry), store, default_namespace: ferry_core::config::default_namespace() }
    }

    /// Connect with the ambient kubeconfig and build the registry from discovery.
    pub async fn connect() -> anyhow::Result<Self> {
        let client = kube::Client::try_default().await?;
        let registry = discover_registry(client.clone()).await?;
        info!(kinds = registry.len(), "client context ready");
        Ok(Self::new(registry, Arc::new(KubeStore::new(client))))
    }

    pub fn with_default_namespace(mut self, ns: &str) -> Self {
        self.default_namespace = ns.to_string();
        self
    }

    pub fn registry(&self) -> &Registry { &self.registry }
    pub fn default_namespace(&self) -> &str { &self.default_namespace }

    pub fn handler(&self, group: &str, version: &str, kind: &str) -> Result<Handler<'_>, LocatorError> {
        let endpoint = self.registry.locate(group, version, kind)?;
        Ok(Handler { endpoint, store: self.store.as_ref(), default_namespace: &self.default_namespace })
    }

    pub fn handler_for(&self, reference: &ResourceRef) -> Result<Handler<'_>, LocatorError> {
        self.handler(&reference.group, &reference.version, &reference.kind)
    }

    /// Locate `obj`'s kind and fix up its namespace to match the kind's scope.
    fn scoped_handler(&self, obj: &mut VersionedObject) -> Result<Handler<'_>, LocatorError> {
        let h = self.handler_for(obj.reference())?;
        obj.rescope(h.scoped_ref(obj.reference()).namespace);
        Ok(h)
    }

    pub async fn read(&self, reference: &ResourceRef) -> Result<Json, FerryError> {
        let h = self.handler_for(reference)?;
        Ok(h.read(reference.namespace.as_deref(), &reference.name).await?)
    }

    /// Read a remote object into a bound handle.
    pub async fn load(&self, reference: &ResourceRef) -> Result<VersionedObject, FerryError> {
        let body = self.read(reference).await?;
        VersionedObject::from_remote(body)
    }

    /// Refresh `obj` from the store; it becomes bound.
    pub async fn reload(&self, obj: &mut VersionedObject) -> Result<(), FerryError> {
        let h = self.scoped_handler(obj)?;
        let r = obj.reference();
        let body = h.read(r.namespace.as_deref(), &r.name).await?;
        obj.sync_from_remote(body)
    }

    /// Like [`reload`](Self::reload) but reports a missing object as `Ok(false)`.
    pub async fn try_load(&self, obj: &mut VersionedObject) -> Result<bool, FerryError> {
        match self.reload(obj).await {
            Ok(()) => Ok(true),
            Err(FerryError::Store(StoreError::NotFound(_))) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Create `obj` remotely and bind it to the returned body.
    pub async fn create(&self, obj: &mut VersionedObject) -> Result<(), FerryError> {
        let h = self.scoped_handler(obj)?;
        let body = h.create(obj.reference().namespace.as_deref(), obj.to_document().as_json()).await?;
        obj.sync_from_remote(body)
    }

    /// Write local edits; conditional on the object's version token when it has one.
    pub async fn write_update(&self, obj: &mut VersionedObject) -> Result<(), FerryError> {
        let h = self.scoped_handler(obj)?;
        let r = obj.reference();
        let body = h.patch(r.namespace.as_deref(), &r.name, obj.to_document().as_json()).await?;
        obj.sync_from_remote(body)
    }

    /// Delete the remote object; the handle becomes unbound.
    pub async fn delete(&self, obj: &mut VersionedObject) -> Result<(), FerryError> {
        let h = self.scoped_handler(obj)?;
        h.delete(obj.reference().namespace.as_deref(), &obj.reference().name).await?;
        obj.mark_deleted();
        Ok(())
    }
}
