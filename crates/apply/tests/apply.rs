#![forbid(unsafe_code)]

use std::sync::Arc;

use ferry_apply::{apply_manifest, apply_one, ApplyOutcome};
use ferry_core::{Document, FerryError, LocatorError, Registry, ResourceRef, StoreError};
use ferry_kubehub::memory::Fault;
use ferry_kubehub::{ClientContext, MemoryStore, Verb};
use serde_json::json;

fn ctx() -> (ClientContext, Arc<MemoryStore>) {
    let mut reg = Registry::with_builtins();
    reg.register("example.com", "v1", "Widget", "widgets", true);
    reg.register("example.com", "v1", "Cluster", "clusters", false);
    let store = Arc::new(MemoryStore::new());
    (ClientContext::new(reg, store.clone()).with_default_namespace("default"), store)
}

fn widget(x: i64) -> Document {
    Document::new(json!({
        "apiVersion": "example.com/v1",
        "kind": "Widget",
        "metadata": { "name": "w1" },
        "spec": { "x": x }
    }))
}

fn crd() -> Document {
    Document::new(json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "CustomResourceDefinition",
        "metadata": { "name": "widgets.example.com" },
        "spec": { "group": "example.com", "names": { "kind": "Widget", "plural": "widgets" } }
    }))
}

#[tokio::test]
async fn second_apply_patches_instead_of_creating() {
    let (ctx, store) = ctx();
    let first = apply_one(&ctx, &widget(1), None).await.unwrap();
    assert_eq!(first.outcome, ApplyOutcome::Created);
    let second = apply_one(&ctx, &widget(1), None).await.unwrap();
    assert_eq!(second.outcome, ApplyOutcome::Patched);

    let r = ResourceRef::new("example.com/v1", "Widget", Some("default"), "w1");
    let live = store.get(&r).unwrap();
    assert_eq!(live["spec"]["x"], 1);
    assert_eq!(live["metadata"]["generation"], 1);
    assert_eq!(store.calls(Verb::Create), 2);
    assert_eq!(store.calls(Verb::Patch), 1);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn apply_converges_spec_changes() {
    let (ctx, store) = ctx();
    apply_one(&ctx, &widget(1), None).await.unwrap();
    let res = apply_one(&ctx, &widget(5), None).await.unwrap();
    assert_eq!(res.outcome, ApplyOutcome::Patched);
    let live = store.get(&ResourceRef::new("example.com/v1", "Widget", Some("default"), "w1")).unwrap();
    assert_eq!(live["spec"]["x"], 5);
    assert_eq!(res.new_rv.as_deref(), live["metadata"]["resourceVersion"].as_str());
}

#[tokio::test]
async fn document_namespace_wins_over_default() {
    let (ctx, store) = ctx();
    let mut doc = widget(1);
    doc.set_namespace("team-a");
    let res = apply_one(&ctx, &doc, Some("team-b")).await.unwrap();
    assert_eq!(res.reference.namespace.as_deref(), Some("team-a"));
    assert!(store.get(&ResourceRef::new("example.com/v1", "Widget", Some("team-a"), "w1")).is_some());

    let res = apply_one(&ctx, &widget(2), Some("team-b")).await.unwrap();
    assert_eq!(res.outcome, ApplyOutcome::Created);
    assert_eq!(res.reference.namespace.as_deref(), Some("team-b"));
    let res = apply_one(&ctx, &widget(3), None).await.unwrap();
    assert_eq!(res.reference.namespace.as_deref(), Some("default"));
    assert!(store.get(&ResourceRef::new("example.com/v1", "Widget", Some("team-b"), "w1")).is_some());
}

#[tokio::test]
async fn cluster_scoped_kinds_patch_without_namespace() {
    let (ctx, store) = ctx();
    let doc = Document::new(json!({ "apiVersion": "example.com/v1", "kind": "Cluster", "metadata": { "name": "c1" }, "spec": { "size": 1 } }));
    let res = apply_one(&ctx, &doc, Some("ignored")).await.unwrap();
    assert_eq!(res.reference.namespace, None);
    let doc = Document::new(json!({ "apiVersion": "example.com/v1", "kind": "Cluster", "metadata": { "name": "c1" }, "spec": { "size": 2 } }));
    let res = apply_one(&ctx, &doc, Some("ignored")).await.unwrap();
    assert_eq!(res.outcome, ApplyOutcome::Patched);
    assert_eq!(res.reference.namespace, None);
    assert_eq!(res.reference.to_string(), "example.com/v1/Cluster c1");
    let live = store.get(&ResourceRef::new("example.com/v1", "Cluster", None, "c1")).unwrap();
    assert_eq!(live["spec"]["size"], 2);
}

#[tokio::test]
async fn schema_kind_is_replaced_with_live_version() {
    let (ctx, store) = ctx();
    assert_eq!(apply_one(&ctx, &crd(), None).await.unwrap().outcome, ApplyOutcome::Created);
    // Replace without a token would be rejected by the store; the engine reads first.
    let res = apply_one(&ctx, &crd(), None).await.unwrap();
    assert_eq!(res.outcome, ApplyOutcome::Replaced);
    assert_eq!(store.calls(Verb::Read), 1);
    assert_eq!(store.calls(Verb::Replace), 1);
    assert_eq!(store.calls(Verb::Patch), 0);
}

#[tokio::test]
async fn schema_kind_validation_rejection_is_skipped() {
    let (ctx, store) = ctx();
    store.fail_next(Verb::Create, Fault::ValidationRejected, 1);
    let res = apply_one(&ctx, &crd(), None).await.unwrap();
    assert_eq!(res.outcome, ApplyOutcome::Skipped);
    assert_eq!(res.warnings.len(), 1);
    assert!(store.is_empty());
}

#[tokio::test]
async fn validation_rejection_for_ordinary_kinds_propagates() {
    let (ctx, store) = ctx();
    store.fail_next(Verb::Create, Fault::ValidationRejected, 1);
    match apply_one(&ctx, &widget(1), None).await {
        Err(FerryError::Store(StoreError::ValidationRejected(_))) => {}
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn transport_errors_propagate_uncaught() {
    let (ctx, store) = ctx();
    apply_one(&ctx, &widget(1), None).await.unwrap();
    store.fail_next(Verb::Patch, Fault::Transport, 1);
    match apply_one(&ctx, &widget(1), None).await {
        Err(FerryError::Store(StoreError::Transport(_))) => {}
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn unknown_kinds_and_malformed_documents_fail_without_wire_calls() {
    let (ctx, store) = ctx();
    let doc = Document::new(json!({ "apiVersion": "nope.io/v1", "kind": "Thing", "metadata": { "name": "t" } }));
    match apply_one(&ctx, &doc, None).await {
        Err(FerryError::Locator(LocatorError::UnknownGroupVersion { .. })) => {}
        other => panic!("unexpected: {:?}", other),
    }
    let doc = Document::new(json!({ "apiVersion": "v1", "kind": "ConfigMap" }));
    assert!(matches!(apply_one(&ctx, &doc, None).await, Err(FerryError::MalformedDocument(_))));
    assert_eq!(store.calls(Verb::Create), 0);
}

#[tokio::test]
async fn list_manifest_items_apply_independently_and_idempotently() {
    let (ctx, store) = ctx();
    let yaml = r#"
apiVersion: example.com/v1
kind: WidgetList
items:
  - metadata: { name: a }
    spec: { x: 1 }
  - metadata: { name: b }
    spec: { x: 2 }
  - metadata: { name: c, namespace: other }
    spec: { x: 3 }
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: settings
data:
  mode: fast
"#;
    let first = apply_manifest(&ctx, yaml, None).await.unwrap();
    assert_eq!(first.len(), 4);
    assert!(first.iter().all(|r| r.outcome == ApplyOutcome::Created));
    let second = apply_manifest(&ctx, yaml, None).await.unwrap();
    assert!(second.iter().all(|r| r.outcome == ApplyOutcome::Patched));
    assert_eq!(store.len(), 4);
    let c = store.get(&ResourceRef::new("example.com/v1", "Widget", Some("other"), "c")).unwrap();
    assert_eq!(c["spec"]["x"], 3);
    let cm = store.get(&ResourceRef::new("v1", "ConfigMap", Some("default"), "settings")).unwrap();
    assert_eq!(cm["data"]["mode"], "fast");
}

#[tokio::test]
async fn manifest_apply_runs_on_a_spawned_task() {
    let (ctx, store) = ctx();
    let yaml = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: spawned\n---\napiVersion: v1\nkind: Namespace\nmetadata:\n  name: team-z\n".to_string();
    let task_ctx = ctx.clone();
    let results = tokio::spawn(async move { apply_manifest(&task_ctx, &yaml, Some("dev")).await }).await.unwrap().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].reference.namespace.as_deref(), Some("dev"));
    assert_eq!(results[1].reference.namespace, None);
    assert_eq!(store.len(), 2);
}
