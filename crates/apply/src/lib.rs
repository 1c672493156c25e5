//! Ferry apply: load manifests and converge each document with create-or-patch.

#![forbid(unsafe_code)]

use std::time::Instant;

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, info, warn};

use ferry_core::{is_schema_kind, Document, FerryError, ResourceRef, StoreError};
use ferry_kubehub::{ClientContext, Handler};

pub mod loader;

pub use loader::{expand, load, load_with, Documents, LoadLimits};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyOutcome {
    Created,
    Patched,
    /// Schema-defining kinds are replaced with the live resourceVersion.
    Replaced,
    /// Create was rejected by validation for a schema-defining kind.
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    pub reference: ResourceRef,
    pub outcome: ApplyOutcome,
    pub new_rv: Option<String>,
    pub warnings: Vec<String>,
}

fn rv_of(obj: &Json) -> Option<String> {
    obj.get("metadata").and_then(|m| m.get("resourceVersion")).and_then(|v| v.as_str()).map(|s| s.to_string())
}

/// Create `doc`, falling back to patch (or replace for schema kinds) when it
/// already exists. An explicit `metadata.namespace` wins over `ns_default`.
pub async fn apply_one(ctx: &ClientContext, doc: &Document, ns_default: Option<&str>) -> Result<ApplyResult, FerryError> {
    let t0 = Instant::now();
    counter!("apply_attempts", 1u64);
    let reference = doc.reference(ns_default)?;
    let handler = ctx.handler_for(&reference)?;
    let reference = handler.scoped_ref(&reference);
    let schema = is_schema_kind(&reference.kind);

    let res = match handler.create(reference.namespace.as_deref(), doc.as_json()).await {
        Ok(obj) => {
            counter!("apply_created", 1u64);
            Ok(ApplyResult { new_rv: rv_of(&obj), reference: reference.clone(), outcome: ApplyOutcome::Created, warnings: vec![] })
        }
        Err(StoreError::AlreadyExists(msg)) => {
            debug!(target_ref = %reference, reason = %msg, "exists; switching to patch");
            patch_existing(&handler, doc, &reference, schema).await
        }
        Err(StoreError::ValidationRejected(msg)) if schema => {
            counter!("apply_skipped", 1u64);
            warn!(target_ref = %reference, reason = %msg, "create rejected for schema kind; skipping");
            Ok(ApplyResult { reference: reference.clone(), outcome: ApplyOutcome::Skipped, new_rv: None, warnings: vec![msg] })
        }
        Err(e) => Err(e.into()),
    };
    histogram!("apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
    match &res {
        Ok(r) => info!(target_ref = %r.reference, outcome = ?r.outcome, rv = ?r.new_rv, "applied"),
        Err(e) => {
            counter!("apply_err", 1u64);
            warn!(target_ref = %reference, error = %e, "apply failed");
        }
    }
    res
}

async fn patch_existing(handler: &Handler<'_>, doc: &Document, reference: &ResourceRef, schema: bool) -> Result<ApplyResult, FerryError> {
    let ns = reference.namespace.as_deref();
    if schema {
        let live = Document::new(handler.read(ns, &reference.name).await?);
        let mut body = doc.clone();
        if let Some(rv) = live.resource_version() {
            body.set_resource_version(rv);
        }
        let obj = handler.replace(ns, &reference.name, body.as_json()).await?;
        counter!("apply_replaced", 1u64);
        return Ok(ApplyResult { reference: reference.clone(), outcome: ApplyOutcome::Replaced, new_rv: rv_of(&obj), warnings: vec![] });
    }
    let obj = handler.patch(ns, &reference.name, doc.as_json()).await?;
    counter!("apply_patched", 1u64);
    Ok(ApplyResult { reference: reference.clone(), outcome: ApplyOutcome::Patched, new_rv: rv_of(&obj), warnings: vec![] })
}

/// Apply every document in `yaml` in order, stopping at the first error.
pub async fn apply_manifest(ctx: &ClientContext, yaml: &str, ns_default: Option<&str>) -> Result<Vec<ApplyResult>, FerryError> {
    let docs = load(yaml)?.collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(docs.len());
    for doc in &docs {
        out.push(apply_one(ctx, doc, ns_default).await?);
    }
    info!(count = out.len(), "manifest applied");
    Ok(out)
}
