use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field name used when a snapshot is not a JSON object.
pub const WHOLE_VALUE: &str = "$value";

/// One top-level field whose value differs between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub before: Value,
    pub after: Value,
}

/// Field-level diff of two snapshots, sorted by field name.
///
/// Only top-level keys of JSON objects are compared; nested values are
/// compared as a whole. A missing snapshot or key reads as `null`.
pub fn diff(before: Option<&Value>, after: Option<&Value>) -> Vec<FieldChange> {
    let null = Value::Null;
    let before = before.unwrap_or(&null);
    let after = after.unwrap_or(&null);

    match (as_object(before), as_object(after)) {
        (Some(b), Some(a)) => {
            let keys: BTreeSet<&String> = b.keys().chain(a.keys()).collect();
            keys.into_iter()
                .filter_map(|key| {
                    let old = b.get(key).unwrap_or(&null);
                    let new = a.get(key).unwrap_or(&null);
                    (old != new).then(|| FieldChange {
                        field: key.clone(),
                        before: old.clone(),
                        after: new.clone(),
                    })
                })
                .collect()
        }
        _ if before == after => Vec::new(),
        _ => vec![FieldChange {
            field: WHOLE_VALUE.to_string(),
            before: before.clone(),
            after: after.clone(),
        }],
    }
}

/// `null` counts as an empty object so creations and deletions diff per field.
fn as_object(value: &Value) -> Option<serde_json::Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map.clone()),
        Value::Null => Some(serde_json::Map::new()),
        _ => None,
    }
}
