//! Whole-document preparation.
//!
//! Wraps the tree normalizer with the root-level additions a prepared
//! document carries: the tree-root role marker, the ontology header and
//! the optional linking-context block.

use std::collections::BTreeSet;

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::NormalizeError;
use crate::normalizer::TreeNormalizer;
use crate::path_type::PathTypeResolver;
use crate::types::{
    local_name, NormalizeOptions, ID_KEY, JSONLD_CONTEXT, JSONLD_ID, JSONLD_INCLUDED,
    NODE_ROLE_KEY, RESOURCE_TYPE_KEY, SHAPE_NS, TREE_ROOT,
};

/// A document in canonical pre-linked form.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub tree: Value,
    pub referenced_types: BTreeSet<String>,
}

impl Prepared {
    /// Identifier of the root node.
    pub fn focus_node(&self) -> Option<&str> {
        focus_node(&self.tree)
    }

    /// Shape the root node is validated against.
    pub fn shape_label(&self) -> Option<String> {
        shape_label(&self.tree)
    }
}

/// Prepare a raw FHIR JSON document.
///
/// # Errors
///
/// - `NotAResource` if the document is not an object or has neither
///   `resourceType` nor `id` (recoverable; the caller skips it)
/// - `MissingIdentifier` if an ontology header is requested but the root
///   ended up without an `@id`
/// - any structural error raised by the normalizer
pub fn prepare(
    document: Value,
    resolver: &PathTypeResolver<'_>,
    options: &NormalizeOptions,
) -> Result<Prepared, NormalizeError> {
    let resource_type = match &document {
        Value::Object(map) if map.contains_key(RESOURCE_TYPE_KEY) || map.contains_key(ID_KEY) => {
            map.get(RESOURCE_TYPE_KEY)
                .and_then(|t| t.as_str())
                .map(|t| local_name(t).to_string())
        }
        _ => return Err(NormalizeError::NotAResource),
    };

    let normalized = TreeNormalizer::new(resolver, options).normalize(document)?;
    let mut tree = normalized.tree;
    let Value::Object(root) = &mut tree else {
        return Err(NormalizeError::NotAResource);
    };

    root.insert(NODE_ROLE_KEY.to_string(), Value::String(TREE_ROOT.to_string()));

    if options.ontology_header {
        add_ontology_header(root, options)?;
    }
    if options.add_context {
        add_context(root, resource_type.as_deref(), options);
    }

    debug!(
        resource_type = resource_type.as_deref().unwrap_or("-"),
        id = focus_node(&tree).unwrap_or("-"),
        "prepared document"
    );

    Ok(Prepared {
        tree,
        referenced_types: normalized.referenced_types,
    })
}

fn add_ontology_header(
    root: &mut Map<String, Value>,
    options: &NormalizeOptions,
) -> Result<(), NormalizeError> {
    let id = root
        .get(JSONLD_ID)
        .and_then(|i| i.as_str())
        .ok_or(NormalizeError::MissingIdentifier)?;

    let ontology = format!("{}.ttl", id);
    let version = match &options.version_base {
        Some(base) => format!("{}{}", base, ontology),
        None => ontology.clone(),
    };

    root.insert(
        JSONLD_INCLUDED.to_string(),
        json!({
            "@id": ontology,
            "owl:versionIRI": version,
            "owl:imports": "fhir:fhir.ttl",
            "@type": "owl:Ontology"
        }),
    );
    Ok(())
}

/// Replace the resource's context link with the full linking-context block.
fn add_context(
    root: &mut Map<String, Value>,
    resource_type: Option<&str>,
    options: &NormalizeOptions,
) {
    let mut contexts = Vec::with_capacity(3);
    if let Some(resource_type) = resource_type {
        contexts.push(Value::String(options.context_iri(resource_type)));
    }
    contexts.push(Value::String(format!(
        "{}root.context.jsonld",
        options.context_server
    )));

    let mut local = Map::new();
    local.insert(
        NODE_ROLE_KEY.to_string(),
        json!({ "@type": "@id", "@id": "fhir:nodeRole" }),
    );
    if let Some(server) = &options.fhir_server {
        local.insert("@base".to_string(), Value::String(server.clone()));
    }
    local.insert("owl:imports".to_string(), json!({ "@type": "@id" }));
    local.insert("owl:versionIRI".to_string(), json!({ "@type": "@id" }));
    contexts.push(Value::Object(local));

    root.insert(JSONLD_CONTEXT.to_string(), Value::Array(contexts));
}

/// The root node's `@id`.
pub fn focus_node(tree: &Value) -> Option<&str> {
    tree.get(JSONLD_ID).and_then(|id| id.as_str())
}

/// Shape IRI for the root resource type, e.g.
/// `http://hl7.org/fhir/shape/Patient`.
pub fn shape_label(tree: &Value) -> Option<String> {
    tree.get(RESOURCE_TYPE_KEY)
        .and_then(|t| t.as_str())
        .map(|t| format!("{}{}", SHAPE_NS, local_name(t)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaGraph;

    fn prepare_with(doc: Value, options: &NormalizeOptions) -> Result<Prepared, NormalizeError> {
        let resolver = PathTypeResolver::new(SchemaGraph::global().unwrap());
        prepare(doc, &resolver, options)
    }

    #[test]
    fn root_gets_role_and_header() {
        let prepared = prepare_with(
            json!({ "resourceType": "Patient", "id": "p1" }),
            &NormalizeOptions::default(),
        )
        .unwrap();

        assert_eq!(prepared.tree["nodeRole"], "fhir:treeRoot");
        assert_eq!(
            prepared.tree["@included"],
            json!({
                "@id": "Patient/p1.ttl",
                "owl:versionIRI": "http://build.fhir.org/Patient/p1.ttl",
                "owl:imports": "fhir:fhir.ttl",
                "@type": "owl:Ontology"
            })
        );
        assert_eq!(prepared.focus_node(), Some("Patient/p1"));
        assert_eq!(
            prepared.shape_label().as_deref(),
            Some("http://hl7.org/fhir/shape/Patient")
        );
    }

    #[test]
    fn header_without_version_base() {
        let options = NormalizeOptions::default().version_base(None);
        let prepared =
            prepare_with(json!({ "resourceType": "Patient", "id": "p1" }), &options).unwrap();
        assert_eq!(prepared.tree["@included"]["owl:versionIRI"], "Patient/p1.ttl");
    }

    #[test]
    fn context_block() {
        let options = NormalizeOptions::default()
            .add_context(true)
            .context_server("https://ctx.example/");
        let prepared =
            prepare_with(json!({ "resourceType": "Observation", "id": "o1" }), &options).unwrap();

        assert_eq!(
            prepared.tree["@context"],
            json!([
                "https://ctx.example/observation.context.jsonld",
                "https://ctx.example/root.context.jsonld",
                {
                    "nodeRole": { "@type": "@id", "@id": "fhir:nodeRole" },
                    "@base": "http://hl7.org/fhir/",
                    "owl:imports": { "@type": "@id" },
                    "owl:versionIRI": { "@type": "@id" }
                }
            ])
        );
    }

    #[test]
    fn context_block_without_server() {
        let options = NormalizeOptions::default().add_context(true).fhir_server(None);
        let prepared =
            prepare_with(json!({ "resourceType": "Patient", "id": "p1" }), &options).unwrap();
        assert!(prepared.tree["@context"][2].get("@base").is_none());
    }

    #[test]
    fn not_a_resource() {
        let result = prepare_with(json!({ "name": "x" }), &NormalizeOptions::default());
        assert!(matches!(result, Err(NormalizeError::NotAResource)));

        let result = prepare_with(json!("Patient"), &NormalizeOptions::default());
        assert!(matches!(result, Err(NormalizeError::NotAResource)));
    }

    #[test]
    fn missing_identifier_with_header() {
        let result = prepare_with(
            json!({ "resourceType": "Patient", "active": true }),
            &NormalizeOptions::default(),
        );
        assert!(matches!(result, Err(NormalizeError::MissingIdentifier)));
    }

    #[test]
    fn no_header_allows_anonymous_resource() {
        let options = NormalizeOptions::default().ontology_header(false);
        let prepared =
            prepare_with(json!({ "resourceType": "Patient", "active": true }), &options).unwrap();
        assert!(prepared.tree.get("@included").is_none());
        assert_eq!(prepared.focus_node(), None);
    }

    #[test]
    fn id_only_document_is_accepted() {
        let options = NormalizeOptions::default();
        let prepared = prepare_with(json!({ "id": "x1" }), &options).unwrap();
        assert_eq!(prepared.focus_node(), Some("#x1"));
        assert_eq!(prepared.shape_label(), None);
    }
}
