//! Naming rules used to derive registry keys from group/version/kind.
//!
//! A handler serves one group/version and is keyed `<CondensedGroup><Version>Api`
//! (e.g. `CoreV1Api`, `AppsV1Api`, `ApiextensionsV1Api`, `MongodbComV1Api`).
//! Kinds are keyed by their snake-case verb segment (`CustomResourceDefinition`
//! -> `custom_resource_definition`).

use once_cell::sync::Lazy;
use regex::Regex;

/// Suffix removed (last occurrence only) from built-in DNS-style groups.
pub const GROUP_SUFFIX: &str = ".k8s.io";

/// Name used for the empty (legacy core) group.
pub const CORE_GROUP: &str = "core";

static UPPER_FOLLOWED_BY_LOWER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(.)([A-Z][a-z]+)").unwrap());
static LOWER_OR_NUM_FOLLOWED_BY_UPPER: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").unwrap());

/// First character upper-cased, the rest lower-cased.
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}

/// Condense a group into a type-name prefix: `""` -> `Core`,
/// `apiextensions.k8s.io` -> `Apiextensions`, `mongodb.com` -> `MongodbCom`.
pub fn condense_group(group: &str) -> String {
    let group = if group.is_empty() { CORE_GROUP } else { group };
    let stripped = match group.rfind(GROUP_SUFFIX) {
        Some(idx) => format!("{}{}", &group[..idx], &group[idx + GROUP_SUFFIX.len()..]),
        None => group.to_string(),
    };
    stripped.split('.').map(capitalize).collect()
}

/// Handler key for a group/version pair.
pub fn handler_name(group: &str, version: &str) -> String {
    format!("{}{}Api", condense_group(group), capitalize(version))
}

/// PascalCase kind -> snake_case verb segment.
pub fn verb_kind(kind: &str) -> String {
    let step = UPPER_FOLLOWED_BY_LOWER.replace_all(kind, "${1}_${2}");
    LOWER_OR_NUM_FOLLOWED_BY_UPPER.replace_all(&step, "${1}_${2}").to_lowercase()
}

/// Split an `apiVersion` into `(group, version)`; core resources have an empty group.
pub fn split_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Join group and version back into an `apiVersion` string.
pub fn api_version(group: &str, version: &str) -> String {
    if group.is_empty() { version.to_string() } else { format!("{}/{}", group, version) }
}
