//! JSON Patch construction for Pod annotations.
//!
//! Operations address the annotation map with RFC 6901 pointers, so keys
//! containing `/` (every prefixed annotation) are escaped as `~1`.

use std::collections::BTreeMap;

use json_patch::jsonptr::PointerBuf;
use serde::Serialize;
use serde_json::Value;

/// Payload of an `add` or `replace` operation
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PatchValue {
    /// A single annotation value
    String(String),
    /// A whole annotation map
    Map(BTreeMap<String, String>),
}

impl From<PatchValue> for Value {
    fn from(value: PatchValue) -> Self {
        match value {
            PatchValue::String(s) => Value::String(s),
            PatchValue::Map(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect(),
            ),
        }
    }
}

/// One JSON Patch operation
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: PointerBuf, value: PatchValue },
    Replace { path: PointerBuf, value: PatchValue },
    Remove { path: PointerBuf },
}

impl PatchOperation {
    pub fn path(&self) -> &PointerBuf {
        match self {
            PatchOperation::Add { path, .. }
            | PatchOperation::Replace { path, .. }
            | PatchOperation::Remove { path } => path,
        }
    }

    pub fn value(&self) -> Option<&PatchValue> {
        match self {
            PatchOperation::Add { value, .. } | PatchOperation::Replace { value, .. } => {
                Some(value)
            }
            PatchOperation::Remove { .. } => None,
        }
    }
}

impl From<PatchOperation> for json_patch::PatchOperation {
    fn from(op: PatchOperation) -> Self {
        use json_patch::{AddOperation, RemoveOperation, ReplaceOperation};

        match op {
            PatchOperation::Add { path, value } => {
                json_patch::PatchOperation::Add(AddOperation {
                    path,
                    value: value.into(),
                })
            }
            PatchOperation::Replace { path, value } => {
                json_patch::PatchOperation::Replace(ReplaceOperation {
                    path,
                    value: value.into(),
                })
            }
            PatchOperation::Remove { path } => {
                json_patch::PatchOperation::Remove(RemoveOperation { path })
            }
        }
    }
}

/// Convert operations into the patch type the admission response carries
pub fn to_json_patch(ops: Vec<PatchOperation>) -> json_patch::Patch {
    json_patch::Patch(ops.into_iter().map(Into::into).collect())
}

/// Pointer to the whole annotation map
pub fn annotations_path() -> PointerBuf {
    PointerBuf::from_tokens(["metadata", "annotations"])
}

/// Pointer to a single annotation
pub fn annotation_path(key: &str) -> PointerBuf {
    PointerBuf::from_tokens(["metadata", "annotations", key])
}

/// Build the operations that bring `current` up to date with `desired`.
///
/// Keys are visited in lexicographic order. The whole-map `add` is only used
/// when the Pod has no annotations at all, so existing annotations are never
/// overwritten.
pub fn build_patch<K, V>(
    current: Option<&BTreeMap<String, String>>,
    desired: &BTreeMap<K, V>,
) -> Vec<PatchOperation>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut map_exists = current.is_some_and(|c| !c.is_empty());
    let mut ops = Vec::with_capacity(desired.len());

    for (key, value) in desired {
        let (key, value) = (key.as_ref(), value.as_ref());
        if !map_exists {
            ops.push(PatchOperation::Add {
                path: annotations_path(),
                value: PatchValue::Map(BTreeMap::from([(key.to_string(), value.to_string())])),
            });
            map_exists = true;
            continue;
        }

        let existing = current.and_then(|c| c.get(key)).filter(|v| !v.is_empty());
        let value = PatchValue::String(value.to_string());
        let op = match existing {
            Some(_) => PatchOperation::Replace {
                path: annotation_path(key),
                value,
            },
            None => PatchOperation::Add {
                path: annotation_path(key),
                value,
            },
        };
        ops.push(op);
    }

    ops
}
