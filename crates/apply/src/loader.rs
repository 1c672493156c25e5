//! Multi-document manifest loader with `*List` expansion.

use std::collections::VecDeque;

use serde::Deserialize;
use serde_json::Value as Json;

use ferry_core::{config, Document, FerryError};

/// Kind suffix marking a wrapper whose `items` are the real documents.
pub const LIST_MARKER: &str = "List";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadLimits {
    pub max_bytes: usize,
    pub max_nodes: usize,
}

impl LoadLimits {
    pub fn from_env() -> Self { Self { max_bytes: config::max_yaml_bytes(), max_nodes: config::max_yaml_nodes() } }
}

fn json_node_budget_exceeded(v: &Json, max: usize) -> bool {
    // Keep a running counter and bail early when exceeding max
    fn walk(v: &Json, cur: &mut usize, max: usize) {
        if *cur >= max { return; }
        *cur += 1;
        match v {
            Json::Object(map) => {
                for vv in map.values() {
                    if *cur >= max { break; }
                    walk(vv, cur, max);
                }
            }
            Json::Array(arr) => {
                for vv in arr.iter() {
                    if *cur >= max { break; }
                    walk(vv, cur, max);
                }
            }
            _ => {}
        }
    }
    let mut count = 0usize;
    walk(v, &mut count, max);
    count >= max
}

/// Lazy stream of documents. Stops after the first parse error.
pub struct Documents<'a> {
    docs: serde_yaml::Deserializer<'a>,
    pending: VecDeque<Document>,
    max_nodes: usize,
    done: bool,
}

/// Load with limits from the environment.
pub fn load(text: &str) -> Result<Documents<'_>, FerryError> { load_with(text, LoadLimits::from_env()) }

pub fn load_with(text: &str, limits: LoadLimits) -> Result<Documents<'_>, FerryError> {
    if text.len() > limits.max_bytes {
        return Err(FerryError::Manifest(format!("YAML payload too large (>{} bytes)", limits.max_bytes)));
    }
    Ok(Documents { docs: serde_yaml::Deserializer::from_str(text), pending: VecDeque::new(), max_nodes: limits.max_nodes, done: false })
}

/// Expand a `*List` wrapper into its items; anything else passes through.
///
/// `FooList` items get the list's apiVersion and kind `Foo`. A bare `List`
/// keeps each item's own apiVersion/kind and only fills a missing apiVersion.
pub fn expand(value: Json) -> Result<Vec<Document>, FerryError> {
    let doc = Document::new(value);
    let kind = doc.kind().unwrap_or_default().to_string();
    let items = match doc.as_json().get("items").and_then(|i| i.as_array()) {
        Some(items) if kind.ends_with(LIST_MARKER) => items.clone(),
        _ => return Ok(vec![doc]),
    };
    let item_kind = &kind[..kind.len() - LIST_MARKER.len()];
    let api_version = doc.api_version().map(|s| s.to_string());
    let mut out = Vec::with_capacity(items.len());
    for mut item in items.into_iter().filter(|i| !i.is_null()) {
        let obj = item
            .as_object_mut()
            .ok_or_else(|| FerryError::MalformedDocument(format!("{} item is not a mapping", kind)))?;
        if item_kind.is_empty() {
            if let (false, Some(av)) = (obj.contains_key("apiVersion"), &api_version) {
                obj.insert("apiVersion".into(), Json::String(av.clone()));
            }
        } else {
            if let Some(av) = &api_version {
                obj.insert("apiVersion".into(), Json::String(av.clone()));
            }
            obj.insert("kind".into(), Json::String(item_kind.to_string()));
        }
        out.push(Document::new(item));
    }
    Ok(out)
}

impl<'a> Documents<'a> {
    fn parse_next(&mut self) -> Option<Result<Json, FerryError>> {
        let de = self.docs.next()?;
        let val = match serde_yaml::Value::deserialize(de) {
            Ok(v) => v,
            Err(e) => return Some(Err(FerryError::Manifest(format!("parsing YAML: {}", e)))),
        };
        if val.is_null() {
            return Some(Ok(Json::Null));
        }
        let json = match serde_json::to_value(val) {
            Ok(j) => j,
            Err(e) => return Some(Err(FerryError::Manifest(format!("converting YAML to JSON: {}", e)))),
        };
        if json_node_budget_exceeded(&json, self.max_nodes) {
            return Some(Err(FerryError::Manifest(format!("YAML document too complex (>{} nodes)", self.max_nodes))));
        }
        Some(Ok(json))
    }
}

impl<'a> Iterator for Documents<'a> {
    type Item = Result<Document, FerryError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(d) = self.pending.pop_front() {
                return Some(Ok(d));
            }
            if self.done {
                return None;
            }
            match self.parse_next() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Ok(Json::Null)) => continue,
                Some(Ok(json)) => match expand(json) {
                    Ok(docs) => self.pending.extend(docs),
                    Err(e) => return Some(Err(e)),
                },
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
