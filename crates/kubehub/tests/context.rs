#![forbid(unsafe_code)]

use std::sync::Arc;

use ferry_core::{Document, FerryError, LocatorError, Registry, ResourceRef, StoreError, VersionedObject};
use ferry_kubehub::{ClientContext, MemoryStore, Verb};
use serde_json::json;

fn ctx() -> (ClientContext, Arc<MemoryStore>) {
    let mut reg = Registry::with_builtins();
    reg.register("example.com", "v1", "Widget", "widgets", true);
    let store = Arc::new(MemoryStore::new());
    (ClientContext::new(reg, store.clone()).with_default_namespace("dev"), store)
}

#[tokio::test]
async fn namespaced_handler_fills_default_namespace() {
    let (ctx, store) = ctx();
    let h = ctx.handler("example.com", "v1", "Widget").unwrap();
    assert_eq!(h.endpoint().handler, "ExampleComV1Api");
    assert_eq!(h.scope(None), Some("dev"));
    assert_eq!(h.scope(Some("prod")), Some("prod"));

    let created = h.create(None, &json!({ "apiVersion": "example.com/v1", "kind": "Widget", "metadata": { "name": "w1" } })).await.unwrap();
    assert_eq!(created["metadata"]["namespace"], "dev");
    assert!(store.get(&ResourceRef::new("example.com/v1", "Widget", Some("dev"), "w1")).is_some());
}

#[tokio::test]
async fn cluster_handler_drops_namespace() {
    let (ctx, store) = ctx();
    let h = ctx.handler("", "v1", "Namespace").unwrap();
    assert_eq!(h.scope(Some("ignored")), None);
    let created = h.create(Some("ignored"), &json!({ "apiVersion": "v1", "kind": "Namespace", "metadata": { "name": "team-a", "namespace": "x" } })).await.unwrap();
    assert!(created["metadata"].get("namespace").is_none());
    assert!(store.get(&ResourceRef::new("v1", "Namespace", None, "team-a")).is_some());
}

#[tokio::test]
async fn unknown_kind_is_a_locator_error() {
    let (ctx, _store) = ctx();
    let r = ResourceRef::new("example.com/v2", "Widget", Some("dev"), "w1");
    match ctx.read(&r).await {
        Err(FerryError::Locator(LocatorError::UnknownGroupVersion { handler, .. })) => assert_eq!(handler, "ExampleComV2Api"),
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn object_lifecycle_create_load_delete() {
    let (ctx, store) = ctx();
    let r = ResourceRef::new("example.com/v1", "Widget", Some("dev"), "w2");
    let mut obj = VersionedObject::new(r.clone());
    obj.set_spec(json!({ "x": 1 }));
    assert!(!ctx.try_load(&mut obj).await.unwrap());
    assert!(!obj.is_bound());

    ctx.create(&mut obj).await.unwrap();
    assert!(obj.is_bound());
    assert!(obj.version_token().is_some());

    let loaded = ctx.load(&r).await.unwrap();
    assert_eq!(loaded.spec(), &json!({ "x": 1 }));
    assert_eq!(loaded.version_token(), obj.version_token());

    ctx.delete(&mut obj).await.unwrap();
    assert!(!obj.is_bound());
    assert_eq!(obj.version_token(), None);
    assert!(store.get(&r).is_none());
    assert_eq!(store.calls(Verb::Delete), 1);
    match ctx.reload(&mut obj).await {
        Err(FerryError::Store(StoreError::NotFound(_))) => {}
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn conditional_write_rejects_stale_token() {
    let (ctx, store) = ctx();
    let r = ResourceRef::new("example.com/v1", "Widget", Some("dev"), "w3");
    store.seed(json!({ "apiVersion": "example.com/v1", "kind": "Widget", "metadata": { "name": "w3", "namespace": "dev" }, "spec": { "x": 1 } }));
    let mut obj = ctx.load(&r).await.unwrap();
    store.set_status(&r, json!({ "phase": "Pending" }));
    obj.set_spec(json!({ "x": 2 }));
    let err = ctx.write_update(&mut obj).await.unwrap_err();
    assert!(err.store().map(|e| e.is_conflict()).unwrap_or(false), "err={}", err);
}

#[tokio::test]
async fn object_namespace_follows_kind_scope() {
    let (ctx, store) = ctx();
    store.seed(json!({ "apiVersion": "v1", "kind": "Namespace", "metadata": { "name": "team-a" } }));
    let doc = Document::new(json!({ "apiVersion": "v1", "kind": "Namespace", "metadata": { "name": "team-a" } }));
    let mut obj = VersionedObject::from_document(doc, Some("dev")).unwrap();
    assert_eq!(obj.reference().namespace.as_deref(), Some("dev"));
    match ctx.create(&mut obj).await {
        Err(FerryError::Store(StoreError::AlreadyExists(_))) => {}
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(obj.reference().namespace, None);
    assert_eq!(obj.reference().to_string(), "v1/Namespace team-a");

    let mut widget = VersionedObject::new(ResourceRef::new("example.com/v1", "Widget", None, "w4"));
    ctx.create(&mut widget).await.unwrap();
    assert_eq!(widget.reference().namespace.as_deref(), Some("dev"));
}
