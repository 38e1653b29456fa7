//! Identifier context - maps local and relative references to the canonical
//! identifiers they resolve to.
//!
//! Two sources feed it:
//!
//! - a Bundle maps `Type/id` of each entry to the entry's `fullUrl`;
//! - a resource with `contained` members maps `#inner` to
//!   `OwnerType/ownerId#inner`.
//!
//! A context is never mutated once handed to a nested scope; extending it
//! produces a new value.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::NormalizeError;
use crate::types::{
    local_name, BUNDLE_ENTRY, BUNDLE_ENTRY_FULL_URL, BUNDLE_ENTRY_RESOURCE,
    BUNDLE_RESOURCE_TYPE, CONTAINED_KEY, ID_KEY, JSONLD_ID, RESOURCE_TYPE_KEY,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierContext {
    ids: HashMap<String, String>,
}

impl IdentifierContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the identifier map of a Bundle.
    ///
    /// Returns `None` unless the object is a Bundle. Every entry carrying
    /// both `fullUrl` and `resource` has the url stamped onto the resource
    /// as its `@id`, and `Type/id` recorded against it.
    pub fn from_bundle(bundle: &mut Map<String, Value>) -> Option<Self> {
        let resource_type = bundle.get(RESOURCE_TYPE_KEY).and_then(|t| t.as_str());
        if resource_type.map(local_name) != Some(BUNDLE_RESOURCE_TYPE) {
            return None;
        }

        let mut ids = HashMap::new();

        let entries = bundle.get_mut(BUNDLE_ENTRY).and_then(|e| e.as_array_mut());
        for entry in entries.into_iter().flatten() {
            let Some(entry) = entry.as_object_mut() else {
                continue;
            };
            let Some(full_url) = entry
                .get(BUNDLE_ENTRY_FULL_URL)
                .and_then(|u| u.as_str())
                .map(str::to_string)
            else {
                continue;
            };
            let Some(resource) = entry
                .get_mut(BUNDLE_ENTRY_RESOURCE)
                .and_then(|r| r.as_object_mut())
            else {
                continue;
            };

            resource.insert(JSONLD_ID.to_string(), Value::String(full_url.clone()));

            let resource_type = resource
                .get(RESOURCE_TYPE_KEY)
                .and_then(|t| t.as_str())
                .map(local_name);
            let id = resource.get(ID_KEY).and_then(|i| i.as_str());
            if let (Some(resource_type), Some(id)) = (resource_type, id) {
                ids.insert(format!("{}/{}", resource_type, id), full_url);
            }
        }

        Some(Self { ids })
    }

    /// A copy of this context extended with the contained members of `owner`.
    ///
    /// Returns `None` when the owner has no contained resources, so callers
    /// can keep sharing the current context. An owner without an `id`
    /// leaves its members' fragments local. `at` names the owner in errors.
    ///
    /// # Errors
    ///
    /// `UnresolvedResourceType` if a member needs anchoring but the owner
    /// has no string `resourceType`.
    pub fn with_contained(
        &self,
        owner: &Map<String, Value>,
        at: &str,
    ) -> Result<Option<Self>, NormalizeError> {
        let Some(contained) = owner.get(CONTAINED_KEY).and_then(|c| c.as_array()) else {
            return Ok(None);
        };
        let Some(owner_id) = owner.get(ID_KEY).map(scalar_text) else {
            return Ok(None);
        };

        let mut extended: Option<Self> = None;
        for member in contained {
            let Some(inner_id) = member.get(ID_KEY).map(scalar_text) else {
                continue;
            };
            let owner_type = owner
                .get(RESOURCE_TYPE_KEY)
                .and_then(|t| t.as_str())
                .map(local_name)
                .ok_or_else(|| NormalizeError::UnresolvedResourceType {
                    path: at.to_string(),
                })?;

            let local = format!("#{}", inner_id);
            let canonical = format!("{}/{}{}", owner_type, owner_id, local);
            extended
                .get_or_insert_with(|| self.clone())
                .ids
                .insert(local, canonical);
        }
        Ok(extended)
    }

    /// Canonical identifier for a relative reference, if known.
    pub fn get(&self, relative: &str) -> Option<&str> {
        self.ids.get(relative).map(String::as_str)
    }

    /// Resolve a relative reference, falling back to the reference itself.
    pub fn resolve(&self, relative: &str) -> String {
        self.get(relative).unwrap_or(relative).to_string()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Text of a scalar id value. Ids are strings in FHIR JSON, but numbers
/// turn up in hand-written documents.
pub(crate) fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
