//! The authoritative object map of a room and its delta semantics.
//!
//! Clients send partial updates; the room applies them and rebroadcasts
//! only the accepted subset. Conflicting concurrent edits resolve
//! last-write-wins per field.

use serde_json::{Map as JsonMap, Value, json};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum MapError {
    #[error("map entry `{0}` is not an object")]
    NotAnObject(String),
    #[error("map entry `{0}` is missing `{1}`")]
    MissingField(String, &'static str),
}

/// Mapping from object id to descriptor. `"background"` is reserved and
/// carries only a `path`; every other descriptor has `type`, `path`, `pos`
/// and `scale`.
#[derive(Debug, Default)]
pub struct SharedMap {
    objects: JsonMap<String, Value>,
}

impl SharedMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The full map, for joiner catch-up.
    pub fn snapshot(&self) -> Value {
        Value::Object(self.objects.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.objects.contains_key(id)
    }

    /// Applies a client patch and returns the delta to broadcast.
    ///
    /// Per entry: the reserved `background` key keeps only its `path`; an
    /// empty value deletes (or is ignored when the id is unknown); a patch
    /// of an existing object accepts `pos` (2-element list) and `scale`
    /// (float) and drops everything else, omitting the id from the delta
    /// when nothing was accepted; an unknown id creates a full descriptor,
    /// requiring `type` and `path` and defaulting `pos`/`scale`.
    pub fn apply(
        &mut self,
        patch: JsonMap<String, Value>,
    ) -> Result<JsonMap<String, Value>, MapError> {
        let mut delta = JsonMap::new();
        for (id, entry) in patch {
            let entry = entry
                .as_object()
                .ok_or_else(|| MapError::NotAnObject(id.clone()))?;
            if id == "background" {
                let path = entry
                    .get("path")
                    .cloned()
                    .ok_or(MapError::MissingField(String::from("background"), "path"))?;
                let stored = json!({ "path": path });
                self.objects.insert(id.clone(), stored.clone());
                delta.insert(id, stored);
            } else if entry.is_empty() {
                if self.objects.remove(&id).is_some() {
                    delta.insert(id, json!({}));
                }
            } else if let Some(existing) = self.objects.get_mut(&id) {
                let existing = existing
                    .as_object_mut()
                    .ok_or_else(|| MapError::NotAnObject(id.clone()))?;
                let mut accepted = JsonMap::new();
                if let Some(pos) = entry.get("pos") {
                    if pos.as_array().is_some_and(|a| a.len() == 2) {
                        existing.insert("pos".to_string(), pos.clone());
                        accepted.insert("pos".to_string(), pos.clone());
                    }
                }
                if let Some(scale) = entry.get("scale") {
                    if scale.is_f64() {
                        existing.insert("scale".to_string(), scale.clone());
                        accepted.insert("scale".to_string(), scale.clone());
                    }
                }
                if !accepted.is_empty() {
                    delta.insert(id, Value::Object(accepted));
                }
            } else {
                let kind = entry
                    .get("type")
                    .cloned()
                    .ok_or_else(|| MapError::MissingField(id.clone(), "type"))?;
                let path = entry
                    .get("path")
                    .cloned()
                    .ok_or_else(|| MapError::MissingField(id.clone(), "path"))?;
                let object = json!({
                    "type": kind,
                    "path": path,
                    "pos": entry.get("pos").cloned().unwrap_or_else(|| json!([0.0, 0.0])),
                    "scale": entry.get("scale").cloned().unwrap_or_else(|| json!(1.0)),
                });
                self.objects.insert(id.clone(), object.clone());
                delta.insert(id, object);
            }
        }
        Ok(delta)
    }
}
