//! Field-level merge deltas.
//!
//! Every mutation the core issues is expressed as a map of field name to
//! [`FieldDelta`], never a whole-document rewrite, so concurrent writers
//! touching disjoint fields never conflict.  Per-user entries inside a
//! shared document (typing flags, drafts, reactions, poll voters) use
//! [`FieldDelta::MapMerge`], an explicit mapping merge with last-write
//! semantics per key.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::document::Fields;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldDelta {
    /// Replace the field wholesale.
    Set(Value),
    /// Add each value to an array field unless already present.
    ArrayUnion(Vec<Value>),
    /// Remove every occurrence of each value from an array field.
    ArrayRemove(Vec<Value>),
    /// Add to a numeric field, treating a missing field as zero.
    Increment(i64),
    /// Merge into an object field, key by key. Nested deltas apply
    /// recursively; unmentioned keys are untouched.
    MapMerge(BTreeMap<String, FieldDelta>),
    /// Remove the field entirely.
    Delete,
}

/// A set of deltas keyed by top-level field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Deltas(pub BTreeMap<String, FieldDelta>);

impl Deltas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), FieldDelta::Set(value.into()));
        self
    }

    pub fn array_union(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0
            .insert(field.into(), FieldDelta::ArrayUnion(vec![value.into()]));
        self
    }

    pub fn array_remove(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0
            .insert(field.into(), FieldDelta::ArrayRemove(vec![value.into()]));
        self
    }

    /// Merge a single key into a map field: `map_entry("typing", uid, true)`
    /// is the explicit form of the dynamic path `typing.{uid}`.
    pub fn map_entry(
        mut self,
        field: impl Into<String>,
        key: impl Into<String>,
        delta: FieldDelta,
    ) -> Self {
        let field = field.into();
        let entry = self
            .0
            .entry(field)
            .or_insert_with(|| FieldDelta::MapMerge(BTreeMap::new()));
        if let FieldDelta::MapMerge(map) = entry {
            map.insert(key.into(), delta);
        } else {
            // A Set on the same field in the same batch wins; keep it.
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Apply a delta set to a document's fields in place.
pub fn apply_deltas(fields: &mut Fields, deltas: &Deltas) {
    for (name, delta) in &deltas.0 {
        apply_one(fields, name, delta);
    }
}

fn apply_one(fields: &mut Fields, name: &str, delta: &FieldDelta) {
    match delta {
        FieldDelta::Set(value) => {
            fields.insert(name.to_string(), value.clone());
        }
        FieldDelta::ArrayUnion(values) => {
            let entry = fields
                .entry(name.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !entry.is_array() {
                *entry = Value::Array(Vec::new());
            }
            if let Some(arr) = entry.as_array_mut() {
                for v in values {
                    if !arr.contains(v) {
                        arr.push(v.clone());
                    }
                }
            }
        }
        FieldDelta::ArrayRemove(values) => {
            if let Some(Value::Array(arr)) = fields.get_mut(name) {
                arr.retain(|v| !values.contains(v));
            }
        }
        FieldDelta::Increment(by) => {
            let current = fields.get(name).and_then(Value::as_i64).unwrap_or(0);
            fields.insert(name.to_string(), Value::from(current + by));
        }
        FieldDelta::MapMerge(map) => {
            let entry = fields
                .entry(name.to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(serde_json::Map::new());
            }
            if let Some(obj) = entry.as_object_mut() {
                for (key, nested) in map {
                    apply_one(obj, key, nested);
                }
            }
        }
        FieldDelta::Delete => {
            fields.remove(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_array_union_is_idempotent() {
        let mut f = fields(json!({ "readBy": ["a"] }));
        let deltas = Deltas::new().array_union("readBy", "b");
        apply_deltas(&mut f, &deltas);
        apply_deltas(&mut f, &deltas);
        assert_eq!(f["readBy"], json!(["a", "b"]));
    }

    #[test]
    fn test_array_remove_missing_value_is_noop() {
        let mut f = fields(json!({ "starredBy": ["a"] }));
        apply_deltas(&mut f, &Deltas::new().array_remove("starredBy", "z"));
        assert_eq!(f["starredBy"], json!(["a"]));
    }

    #[test]
    fn test_increment_treats_missing_as_zero() {
        let mut f = Fields::new();
        apply_deltas(&mut f, &Deltas::new().set("n", 0));
        let deltas = {
            let mut d = Deltas::new();
            d.0.insert("n".into(), FieldDelta::Increment(3));
            d
        };
        apply_deltas(&mut f, &deltas);
        apply_deltas(&mut f, &deltas);
        assert_eq!(f["n"], json!(6));
    }

    #[test]
    fn test_map_merge_last_write_per_key() {
        let mut f = fields(json!({ "typing": { "alice": true, "bob": false } }));
        let deltas = Deltas::new().map_entry("typing", "alice", FieldDelta::Set(json!(false)));
        apply_deltas(&mut f, &deltas);
        assert_eq!(f["typing"], json!({ "alice": false, "bob": false }));
    }

    #[test]
    fn test_map_merge_recurses() {
        let mut f = fields(json!({ "poll": { "votes": { "0": 1 }, "voters": {} } }));
        let mut votes = BTreeMap::new();
        votes.insert("0".to_string(), FieldDelta::Increment(1));
        let deltas = Deltas::new()
            .map_entry("poll", "votes", FieldDelta::MapMerge(votes))
            .map_entry(
                "poll",
                "voters",
                FieldDelta::MapMerge(
                    [("alice".to_string(), FieldDelta::Set(json!(0)))].into(),
                ),
            );
        apply_deltas(&mut f, &deltas);
        assert_eq!(f["poll"]["votes"]["0"], json!(2));
        assert_eq!(f["poll"]["voters"]["alice"], json!(0));
    }
}
