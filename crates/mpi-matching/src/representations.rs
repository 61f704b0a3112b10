//! Before-write hook that precomputes matching representations.
//!
//! Distance and phonetic algorithms compare normalized strings stored under
//! `_transforms.matching.<algorithm>.<path>` as flat string arrays. The whole
//! `_transforms.matching` subtree is rebuilt on every write so removed
//! field values never leave stale representations behind.

use serde_json::{Map, Value as JsonValue};

use mpi_core::defaults::TRANSFORMS_ROOT;
use mpi_core::walker::{segments, walk_strings};
use mpi_core::Resource;

use crate::algorithms::representation;
use crate::config::{FieldMatchConfig, ResourceMatchConfig};

/// Rebuild the representation subtree of `resource` for every configured
/// distance or phonetic field.
pub fn precompute_representations(config: &ResourceMatchConfig, resource: &mut Resource) {
    let root: Vec<String> = TRANSFORMS_ROOT.split('.').map(str::to_string).collect();
    remove_nested(&mut resource.body, &root);

    for field in config.all_fields() {
        if !field.algorithm.uses_representation() {
            continue;
        }
        let values = field_representations(field, &resource.body);
        if let Some(path) = segments(&field.representation_path()) {
            let path: Vec<String> = path.into_iter().map(str::to_string).collect();
            set_nested(
                &mut resource.body,
                &path,
                JsonValue::Array(values.into_iter().map(JsonValue::String).collect()),
            );
        }
    }
}

/// Distinct representations of a field's raw values, in document order.
pub fn field_representations(field: &FieldMatchConfig, body: &JsonValue) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for raw in walk_strings(&field.path, body) {
        if let Some(rep) = representation(&field.algorithm, &raw) {
            if !out.contains(&rep) {
                out.push(rep);
            }
        }
    }
    out
}

fn set_nested(body: &mut JsonValue, path: &[String], value: JsonValue) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut cursor = body;
    for key in parents {
        if !cursor.is_object() {
            *cursor = JsonValue::Object(Map::new());
        }
        let JsonValue::Object(map) = cursor else {
            return;
        };
        cursor = map
            .entry(key.clone())
            .or_insert_with(|| JsonValue::Object(Map::new()));
    }
    if !cursor.is_object() {
        *cursor = JsonValue::Object(Map::new());
    }
    if let JsonValue::Object(map) = cursor {
        map.insert(last.clone(), value);
    }
}

fn remove_nested(body: &mut JsonValue, path: &[String]) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut cursor = body;
    for key in parents {
        match cursor.get_mut(key.as_str()) {
            Some(next) => cursor = next,
            None => return,
        }
    }
    if let JsonValue::Object(map) = cursor {
        map.remove(last.as_str());
    }
}
