//! Tree normalization - rewrites a FHIR JSON tree into its canonical
//! pre-linked form.
//!
//! The rewrite walks the document recursively, threading a [`Scope`] that
//! carries the enclosing resource type, the property path used for schema
//! lookups, the identifier context and whether the current object sits in
//! a `contained` list. Scopes are extended by copy, never mutated in
//! place, so nested resources cannot leak context into their siblings.
//!
//! Per object:
//!
//! - a `resourceType` re-roots the path and links the type's context;
//! - a Bundle replaces the identifier context with its entry map, and a
//!   resource with `contained` members extends it;
//! - `id` produces the object's `@id`;
//! - every other scalar is wrapped as `{ "value": x }`;
//! - wrapped values are then classified: canonical and `reference` values
//!   gain a `fhir:link`, dates gain an XSD type, codings gain `@type`;
//! - `_field` extension keys are merged into `field` last.
//!
//! Array members share the array's path and are stamped with `index`.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::coding::{add_type_arc, unwrap_string};
use crate::datatype::classify_date;
use crate::error::NormalizeError;
use crate::id_map::{scalar_text, IdentifierContext};
use crate::path_type::PathTypeResolver;
use crate::reference::ReferenceLink;
use crate::schema::dotted;
use crate::types::{
    local_name, logical_name, NormalizeOptions, CONTAINED_KEY, EXTENSION_KEY,
    EXTENSION_RESOURCE_TYPE, FHIR_PREFIX, ID_KEY, INDEX_KEY, JSONLD_CONTEXT, JSONLD_ID,
    JSONLD_TYPE, JSONLD_VALUE, LINK_KEY, PASS_THROUGH_KEYS, REFERENCE_KEY, RESOURCE_TYPE_KEY,
    TYPE_KEY, VALUE_KEY,
};

/// Result of normalizing one document.
#[derive(Debug, Clone)]
pub struct Normalized {
    /// The canonical tree.
    pub tree: Value,
    /// Resource types of every synthesized reference whose target type is
    /// known.
    pub referenced_types: BTreeSet<String>,
}

/// Recursive rewrite engine.
///
/// Holds only shared, read-only collaborators; all per-document state
/// lives in the walk, so one normalizer may serve many documents.
#[derive(Debug, Clone, Copy)]
pub struct TreeNormalizer<'n, 'g> {
    resolver: &'n PathTypeResolver<'g>,
    options: &'n NormalizeOptions,
}

impl<'n, 'g> TreeNormalizer<'n, 'g> {
    pub fn new(resolver: &'n PathTypeResolver<'g>, options: &'n NormalizeOptions) -> Self {
        Self { resolver, options }
    }

    /// Normalize a document tree.
    ///
    /// Fragment identifiers are anchored under their enclosing `@id`
    /// before returning.
    ///
    /// # Errors
    ///
    /// - `NotAResource` if the document is not a JSON object
    /// - `NestedList` if a list directly contains a list
    /// - `IndexCollision` if a list member already carries `index`
    /// - `ExtensionConflict` if an extension collides with existing content
    pub fn normalize(&self, document: Value) -> Result<Normalized, NormalizeError> {
        let mut tree = document;
        let Value::Object(root) = &mut tree else {
            return Err(NormalizeError::NotAResource);
        };

        let mut walk = Walk {
            resolver: self.resolver,
            options: self.options,
            referenced: BTreeSet::new(),
        };
        walk.object(root, &Scope::root())?;

        adjust_urls(&mut tree, "");

        debug!(
            referenced = walk.referenced.len(),
            "normalized document"
        );
        Ok(Normalized {
            tree,
            referenced_types: walk.referenced,
        })
    }
}

/// Context threaded through the recursive walk.
#[derive(Debug, Clone)]
struct Scope {
    resource_type: Option<String>,
    path: Vec<String>,
    ids: Arc<IdentifierContext>,
    in_contained: bool,
}

impl Scope {
    fn root() -> Self {
        Self {
            resource_type: None,
            path: Vec::new(),
            ids: Arc::new(IdentifierContext::new()),
            in_contained: false,
        }
    }

    /// Scope of a member value one property below this one.
    fn child(&self, segment: &str) -> Self {
        Self {
            resource_type: self.resource_type.clone(),
            path: self.child_path(segment),
            ids: Arc::clone(&self.ids),
            in_contained: false,
        }
    }

    fn child_path(&self, segment: &str) -> Vec<String> {
        let mut path = Vec::with_capacity(self.path.len() + 1);
        path.extend(self.path.iter().cloned());
        path.push(segment.to_string());
        path
    }

    /// Scope for extension payloads, rooted at `Extension`.
    fn extension(&self) -> Self {
        Self {
            resource_type: Some(EXTENSION_RESOURCE_TYPE.to_string()),
            path: vec![EXTENSION_RESOURCE_TYPE.to_string()],
            ids: Arc::clone(&self.ids),
            in_contained: false,
        }
    }
}

/// Per-document walk state.
struct Walk<'n, 'g> {
    resolver: &'n PathTypeResolver<'g>,
    options: &'n NormalizeOptions,
    referenced: BTreeSet<String>,
}

impl Walk<'_, '_> {
    fn object(&mut self, map: &mut Map<String, Value>, outer: &Scope) -> Result<(), NormalizeError> {
        let mut scope = outer.clone();

        match map.get(RESOURCE_TYPE_KEY) {
            None => {}
            Some(Value::String(resource_type)) => {
                let resource_type = local_name(resource_type).to_string();
                scope.path = vec![resource_type.clone()];
                scope.resource_type = Some(resource_type);
            }
            Some(_) => {
                return Err(NormalizeError::UnresolvedResourceType {
                    path: location(&outer.path),
                })
            }
        }
        if let Some(bundle_ids) = IdentifierContext::from_bundle(map) {
            scope.ids = Arc::new(bundle_ids);
        }
        if let Some(extended) = scope.ids.with_contained(map, &location(&scope.path))? {
            scope.ids = Arc::new(extended);
        }

        let direct: Vec<String> = map
            .keys()
            .filter(|k| !k.starts_with('@') && extension_base(k).is_none())
            .cloned()
            .collect();

        for key in &direct {
            self.member(map, key, &scope)?;
        }
        for key in &direct {
            let path = scope.child_path(logical_name(key));
            self.classify_member(map, key, &path, &scope);
        }
        add_type_arc(map);

        let extensions: Vec<String> = map
            .keys()
            .filter(|k| extension_base(k).is_some())
            .cloned()
            .collect();

        for key in &extensions {
            self.merge_extension(map, key, &scope)?;
        }
        Ok(())
    }

    /// Rewrite one direct member of an object.
    fn member(
        &mut self,
        map: &mut Map<String, Value>,
        key: &str,
        scope: &Scope,
    ) -> Result<(), NormalizeError> {
        let owns_type = map.contains_key(RESOURCE_TYPE_KEY);
        let Some(value) = map.get_mut(key) else {
            return Ok(());
        };

        match value {
            Value::Object(inner) => return self.object(inner, &scope.child(logical_name(key))),
            Value::Array(items) => {
                return self.array(key, items, &scope.child(logical_name(key)))
            }
            _ => {}
        }

        if key == RESOURCE_TYPE_KEY {
            if let Some(resource_type) = value.as_str() {
                if !resource_type.starts_with(FHIR_PREFIX) {
                    let context = self.options.context_iri(resource_type);
                    let prefixed = format!("{}{}", FHIR_PREFIX, resource_type);
                    *value = Value::String(prefixed);
                    map.insert(JSONLD_CONTEXT.to_string(), Value::String(context));
                }
                return Ok(());
            }
        }

        if key == ID_KEY {
            let raw = scalar_text(value);
            let relative = if raw.starts_with('#') {
                raw
            } else if scope.in_contained || !owns_type {
                format!("#{}", raw)
            } else {
                let resource_type = scope.resource_type.as_deref().ok_or_else(|| {
                    NormalizeError::UnresolvedResourceType {
                        path: location(&scope.path),
                    }
                })?;
                format!("{}/{}", resource_type, raw)
            };
            let resolved = scope.ids.resolve(&relative);

            *value = value_container(value.take());
            if !map.contains_key(JSONLD_ID) {
                map.insert(JSONLD_ID.to_string(), Value::String(resolved));
            }
            return Ok(());
        }

        if !PASS_THROUGH_KEYS.contains(&key) {
            *value = value_container(value.take());
        }
        Ok(())
    }

    fn array(&mut self, key: &str, items: &mut [Value], scope: &Scope) -> Result<(), NormalizeError> {
        let in_contained = key == CONTAINED_KEY;

        for (pos, item) in items.iter_mut().enumerate() {
            match item {
                Value::Array(_) => {
                    return Err(NormalizeError::NestedList {
                        path: dotted(&scope.path),
                    })
                }
                Value::Object(member) => {
                    if member.contains_key(INDEX_KEY) {
                        return Err(NormalizeError::IndexCollision {
                            path: dotted(&scope.path),
                        });
                    }
                    let member_scope = Scope {
                        in_contained,
                        ..scope.clone()
                    };
                    self.object(member, &member_scope)?;
                    member.insert(INDEX_KEY.to_string(), Value::from(pos));
                }
                scalar => {
                    let mut container = Map::new();
                    container.insert(VALUE_KEY.to_string(), scalar.take());
                    if let Some(link) = self.classify(key, &mut container, &scope.path, None, scope) {
                        container.insert(LINK_KEY.to_string(), link);
                    }
                    container.insert(INDEX_KEY.to_string(), Value::from(pos));
                    *scalar = Value::Object(container);
                }
            }
        }
        Ok(())
    }

    /// Classify a freshly wrapped member of `map`, placing any reference
    /// link that belongs to the owner.
    fn classify_member(
        &mut self,
        map: &mut Map<String, Value>,
        key: &str,
        path: &[String],
        scope: &Scope,
    ) {
        let sibling_type = map
            .get(TYPE_KEY)
            .and_then(unwrap_string)
            .map(str::to_string);

        let Some(Value::Object(container)) = map.get_mut(key) else {
            return;
        };
        if let Some(link) = self.classify(key, container, path, sibling_type.as_deref(), scope) {
            map.insert(LINK_KEY.to_string(), link);
        }
    }

    /// Classify a value container.
    ///
    /// Canonical links go inside the container. A `reference` link is
    /// returned for the caller to attach to the owning object.
    fn classify(
        &mut self,
        key: &str,
        container: &mut Map<String, Value>,
        path: &[String],
        sibling_type: Option<&str>,
        scope: &Scope,
    ) -> Option<Value> {
        let text = container.get(VALUE_KEY)?.as_str()?.to_string();

        let mut owner_link = None;
        if self.resolver.is_canonical(path) {
            let link = self.link(&text, None, scope);
            container.insert(LINK_KEY.to_string(), link);
        } else if key == REFERENCE_KEY {
            owner_link = Some(self.link(&text, sibling_type, scope));
        }

        if let Some(declared) = self.resolver.date_type(path) {
            if let Some(date_type) = classify_date(&declared, &text) {
                let mut typed = Map::new();
                typed.insert(JSONLD_VALUE.to_string(), Value::String(text));
                typed.insert(JSONLD_TYPE.to_string(), Value::String(date_type.xsd_iri()));
                container.insert(VALUE_KEY.to_string(), Value::Object(typed));
            }
        }

        owner_link
    }

    fn link(&mut self, reference: &str, declared_type: Option<&str>, scope: &Scope) -> Value {
        let link = ReferenceLink::build(
            reference,
            declared_type,
            self.options.fhir_server.as_deref(),
            &scope.ids,
        );
        if let Some(resource_type) = &link.resource_type {
            self.referenced.insert(resource_type.clone());
        }
        link.to_value()
    }

    /// Merge `_field` into `field`.
    fn merge_extension(
        &mut self,
        map: &mut Map<String, Value>,
        key: &str,
        scope: &Scope,
    ) -> Result<(), NormalizeError> {
        let Some(base) = extension_base(key).map(str::to_string) else {
            return Ok(());
        };
        let Some(mut payload) = map.remove(key) else {
            return Ok(());
        };

        let payload_scope = scope.extension();
        match &mut payload {
            Value::Object(inner) => self.object(inner, &payload_scope)?,
            Value::Array(items) => {
                self.array(&base, items, &payload_scope.child(logical_name(&base)))?
            }
            scalar => *scalar = value_container(scalar.take()),
        }

        match map.get_mut(&base) {
            None => {
                map.insert(base.clone(), payload);
            }
            Some(Value::Object(existing)) => {
                if existing.contains_key(EXTENSION_KEY) {
                    return Err(NormalizeError::ExtensionConflict {
                        path: dotted(&scope.path),
                        key: base,
                    });
                }
                existing.insert(EXTENSION_KEY.to_string(), extension_content(payload));
            }
            Some(existing) => {
                let mut promoted = Map::new();
                promoted.insert(VALUE_KEY.to_string(), existing.take());
                promoted.insert(EXTENSION_KEY.to_string(), extension_content(payload));
                *existing = Value::Object(promoted);
            }
        }

        let path = vec![
            EXTENSION_RESOURCE_TYPE.to_string(),
            logical_name(&base).to_string(),
        ];
        self.classify_member(map, &base, &path, scope);
        Ok(())
    }
}

/// Dotted path for error messages; `(root)` for the document itself.
fn location(path: &[String]) -> String {
    if path.is_empty() {
        "(root)".to_string()
    } else {
        dotted(path)
    }
}

/// Base field named by an extension key (`_birthDate` -> `birthDate`).
fn extension_base(key: &str) -> Option<&str> {
    key.strip_prefix('_').filter(|base| !base.is_empty())
}

/// The `extension` list of a payload, or the payload itself.
fn extension_content(payload: Value) -> Value {
    match payload {
        Value::Object(mut map) => match map.remove(EXTENSION_KEY) {
            Some(extension) => extension,
            None => Value::Object(map),
        },
        other => other,
    }
}

fn value_container(value: Value) -> Value {
    let mut container = Map::new();
    container.insert(VALUE_KEY.to_string(), value);
    Value::Object(container)
}

/// Anchor fragment identifiers under their nearest enclosing `@id`.
///
/// Walks top-down; an object's own `@id`, once anchored, becomes the
/// owner for everything beneath it.
pub fn adjust_urls(value: &mut Value, outer: &str) {
    match value {
        Value::Object(map) => {
            let mut owner = outer.to_string();
            if let Some(Value::String(id)) = map.get_mut(JSONLD_ID) {
                if id.starts_with('#') {
                    *id = format!("{}{}", outer, id);
                }
                owner = id.clone();
            }
            for child in map.values_mut() {
                adjust_urls(child, &owner);
            }
        }
        Value::Array(items) => {
            for item in items {
                adjust_urls(item, outer);
            }
        }
        _ => {}
    }
}
