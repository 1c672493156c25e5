//! kube-rs backed store and discovery.

use anyhow::{anyhow, Context, Result};
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
    core::{ApiResource, DynamicObject},
    discovery::{Discovery, Scope},
    Client,
};
use serde_json::Value as Json;
use tracing::{debug, info};

use ferry_core::{GvkEndpoint, Registry, StoreError};

use crate::ResourceStore;

/// Start from the built-in table and register every served resource (incl. CRDs).
pub async fn discover_registry(client: Client) -> Result<Registry> {
    let discovery = Discovery::new(client).run().await.context("running API discovery")?;
    let mut registry = Registry::with_builtins();
    let mut served = 0usize;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            let namespaced = matches!(caps.scope, Scope::Namespaced);
            registry.register(&ar.group, &ar.version, &ar.kind, &ar.plural, namespaced);
            served += 1;
        }
    }
    info!(served, total = registry.len(), "discovery registered resources");
    Ok(registry)
}

pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self { Self { client } }

    fn api(&self, ep: &GvkEndpoint, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = ApiResource {
            group: ep.group.clone(),
            version: ep.version.clone(),
            api_version: ep.api_version(),
            kind: ep.kind.clone(),
            plural: ep.plural.clone(),
        };
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

fn to_dynamic(body: &Json) -> Result<DynamicObject, StoreError> {
    serde_json::from_value(body.clone()).map_err(|e| StoreError::Transport(anyhow!("encoding body: {}", e)))
}

fn to_json(obj: &DynamicObject) -> Result<Json, StoreError> {
    serde_json::to_value(obj).map_err(|e| StoreError::Transport(anyhow!("decoding response: {}", e)))
}

/// Map an API status onto the store error classes.
fn classify(err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(resp) => match (resp.code, resp.reason.as_str()) {
            (409, "AlreadyExists") => StoreError::AlreadyExists(resp.message),
            (409, _) => StoreError::VersionConflict(resp.message),
            (404, _) => StoreError::NotFound(resp.message),
            (400, _) | (422, _) => StoreError::ValidationRejected(resp.message),
            _ => StoreError::Transport(anyhow!("api error {} {}: {}", resp.code, resp.reason, resp.message)),
        },
        other => StoreError::Transport(other.into()),
    }
}

#[async_trait::async_trait]
impl ResourceStore for KubeStore {
    async fn create(&self, ep: &GvkEndpoint, namespace: Option<&str>, body: &Json) -> Result<Json, StoreError> {
        let obj = self.api(ep, namespace).create(&PostParams::default(), &to_dynamic(body)?).await.map_err(classify)?;
        to_json(&obj)
    }

    async fn patch(&self, ep: &GvkEndpoint, namespace: Option<&str>, name: &str, body: &Json) -> Result<Json, StoreError> {
        let obj = self
            .api(ep, namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(body))
            .await
            .map_err(classify)?;
        to_json(&obj)
    }

    async fn replace(&self, ep: &GvkEndpoint, namespace: Option<&str>, name: &str, body: &Json) -> Result<Json, StoreError> {
        let obj = self
            .api(ep, namespace)
            .replace(name, &PostParams::default(), &to_dynamic(body)?)
            .await
            .map_err(classify)?;
        to_json(&obj)
    }

    async fn read(&self, ep: &GvkEndpoint, namespace: Option<&str>, name: &str) -> Result<Json, StoreError> {
        let obj = self.api(ep, namespace).get(name).await.map_err(classify)?;
        to_json(&obj)
    }

    async fn delete(&self, ep: &GvkEndpoint, namespace: Option<&str>, name: &str) -> Result<(), StoreError> {
        let res = self.api(ep, namespace).delete(name, &DeleteParams::default()).await.map_err(classify)?;
        debug!(gvk = %ep.gvk_key(), name, pending = res.is_left(), "delete accepted");
        Ok(())
    }
}
