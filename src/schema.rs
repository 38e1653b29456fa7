//! Schema graph - the flattened index of dotted property paths and their
//! declared range types.
//!
//! Every node is identified by a resource or datatype name followed by
//! field names (`Patient.contact.name`). A node declares at most one range.
//!
//! # Source format
//!
//! ```json
//! {
//!   "namespace": "http://hl7.org/fhir/",
//!   "@graph": [
//!     { "@id": "fhir:Patient" },
//!     { "@id": "fhir:Patient.birthDate", "range": "fhir:date" }
//!   ]
//! }
//! ```
//!
//! Identifiers and ranges may be bare local names, `fhir:`-prefixed, or
//! full IRIs under the namespace.

use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::OnceCell;
use serde_json::Value;
use tracing::debug;

use crate::error::SchemaError;
use crate::loader::{load_document, load_document_str};
use crate::types::{json_type_name, FHIR_NS, FHIR_PREFIX};

/// Range declarations compiled into the binary.
const BUNDLED_SCHEMA: &str = include_str!("resources/fhir-ranges.json");

static GLOBAL: OnceCell<SchemaGraph> = OnceCell::new();

/// Immutable path -> range index.
#[derive(Debug, Clone)]
pub struct SchemaGraph {
    namespace: String,
    nodes: HashMap<String, Option<String>>,
}

impl SchemaGraph {
    /// The process-wide graph built from the bundled resource.
    ///
    /// The first caller builds it; concurrent callers block until the build
    /// finishes. Reads afterwards take no lock.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` if the bundled resource is inconsistent.
    pub fn global() -> Result<&'static SchemaGraph, SchemaError> {
        GLOBAL.get_or_try_init(|| {
            let graph = Self::bundled()?;
            debug!(nodes = graph.len(), "built bundled schema graph");
            Ok(graph)
        })
    }

    /// Build a fresh graph from the bundled resource.
    pub fn bundled() -> Result<Self, SchemaError> {
        Self::parse(BUNDLED_SCHEMA)
    }

    /// Load a schema graph from a file.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::Load` if the file can't be read or parsed, or a
    /// consistency error from [`SchemaGraph::from_value`].
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let doc = load_document(path)?;
        let graph = Self::from_value(&doc)?;
        debug!(path = %path.display(), nodes = graph.len(), "loaded schema graph");
        Ok(graph)
    }

    /// Parse a schema graph from a JSON string.
    pub fn parse(content: &str) -> Result<Self, SchemaError> {
        let doc = load_document_str(content)?;
        Self::from_value(&doc)
    }

    /// Build a schema graph from a parsed source document.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::AmbiguousRange` if any node declares more than
    /// one range, or `SchemaError::InvalidDocument` for malformed nodes.
    pub fn from_value(doc: &Value) -> Result<Self, SchemaError> {
        let namespace = match doc.get("namespace") {
            None => FHIR_NS.to_string(),
            Some(Value::String(ns)) => ns.clone(),
            Some(other) => {
                return Err(SchemaError::InvalidDocument {
                    message: format!("namespace must be a string, got {}", json_type_name(other)),
                })
            }
        };

        let graph = doc
            .get("@graph")
            .and_then(|g| g.as_array())
            .ok_or_else(|| SchemaError::InvalidDocument {
                message: "missing @graph array".to_string(),
            })?;

        let mut nodes: HashMap<String, Option<String>> = HashMap::with_capacity(graph.len());

        for (i, node) in graph.iter().enumerate() {
            let id = node
                .get("@id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| SchemaError::InvalidDocument {
                    message: format!("node {} has no @id", i),
                })?;
            let path = strip_namespace(id, &namespace).to_string();

            let mut ranges: Vec<String> = match node.get("range") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::String(r)) => vec![strip_namespace(r, &namespace).to_string()],
                Some(Value::Array(arr)) => arr
                    .iter()
                    .map(|r| {
                        r.as_str()
                            .map(|s| strip_namespace(s, &namespace).to_string())
                            .ok_or_else(|| SchemaError::InvalidDocument {
                                message: format!("range of {} must contain strings", path),
                            })
                    })
                    .collect::<Result<_, _>>()?,
                Some(other) => {
                    return Err(SchemaError::InvalidDocument {
                        message: format!(
                            "range of {} must be a string or array, got {}",
                            path,
                            json_type_name(other)
                        ),
                    })
                }
            };

            if let Some(Some(existing)) = nodes.get(&path) {
                ranges.insert(0, existing.clone());
            }
            ranges.dedup();

            match ranges.len() {
                0 => {
                    nodes.entry(path).or_insert(None);
                }
                1 => {
                    nodes.insert(path, ranges.pop());
                }
                _ => return Err(SchemaError::AmbiguousRange { path, ranges }),
            }
        }

        Ok(Self { namespace, nodes })
    }

    /// Namespace IRI node identities live under.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Full node IRI for a path.
    pub fn flat_path<S: AsRef<str>>(&self, path: &[S]) -> String {
        format!("{}{}", self.namespace, dotted(path))
    }

    /// Whether a node exists for the path, with or without a range.
    pub fn contains<S: AsRef<str>>(&self, path: &[S]) -> bool {
        self.nodes.contains_key(&dotted(path))
    }

    /// The declared range of the path's node, if any.
    pub fn range<S: AsRef<str>>(&self, path: &[S]) -> Option<&str> {
        self.nodes.get(&dotted(path)).and_then(|r| r.as_deref())
    }
}

/// Join path segments with dots.
pub fn dotted<S: AsRef<str>>(path: &[S]) -> String {
    path.iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(".")
}

fn strip_namespace<'a>(name: &'a str, namespace: &str) -> &'a str {
    name.strip_prefix(namespace)
        .or_else(|| name.strip_prefix(FHIR_PREFIX))
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bundled_schema_is_consistent() {
        let graph = SchemaGraph::bundled().unwrap();
        assert!(!graph.is_empty());
        assert_eq!(graph.range(&["Patient", "birthDate"]), Some("date"));
        assert_eq!(graph.range(&["Meta", "profile"]), Some("canonical"));
        assert!(graph.contains(&["Patient"]));
        assert_eq!(graph.range(&["Patient"]), None);
    }

    #[test]
    fn global_is_built_once() {
        let a = SchemaGraph::global().unwrap();
        let b = SchemaGraph::global().unwrap();
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn accepts_prefixed_and_full_iris() {
        let graph = SchemaGraph::from_value(&json!({
            "namespace": "http://hl7.org/fhir/",
            "@graph": [
                { "@id": "http://hl7.org/fhir/Patient.birthDate", "range": "http://hl7.org/fhir/date" },
                { "@id": "fhir:Period.start", "range": "fhir:dateTime" },
                { "@id": "Coding.code", "range": "code" }
            ]
        }))
        .unwrap();

        assert_eq!(graph.range(&["Patient", "birthDate"]), Some("date"));
        assert_eq!(graph.range(&["Period", "start"]), Some("dateTime"));
        assert_eq!(graph.range(&["Coding", "code"]), Some("code"));
        assert_eq!(
            graph.flat_path(&["Coding", "code"]),
            "http://hl7.org/fhir/Coding.code"
        );
    }

    #[test]
    fn multiple_ranges_rejected() {
        let result = SchemaGraph::from_value(&json!({
            "@graph": [
                { "@id": "fhir:Patient.birthDate", "range": ["fhir:date", "fhir:dateTime"] }
            ]
        }));
        assert!(matches!(
            result,
            Err(SchemaError::AmbiguousRange { path, .. }) if path == "Patient.birthDate"
        ));
    }

    #[test]
    fn duplicate_nodes_with_different_ranges_rejected() {
        let result = SchemaGraph::from_value(&json!({
            "@graph": [
                { "@id": "fhir:Period.start", "range": "fhir:dateTime" },
                { "@id": "fhir:Period.start", "range": "fhir:instant" }
            ]
        }));
        assert!(matches!(result, Err(SchemaError::AmbiguousRange { .. })));
    }

    #[test]
    fn duplicate_nodes_with_same_range_accepted() {
        let graph = SchemaGraph::from_value(&json!({
            "@graph": [
                { "@id": "fhir:Period.start", "range": "fhir:dateTime" },
                { "@id": "fhir:Period.start" },
                { "@id": "fhir:Period.start", "range": "fhir:dateTime" }
            ]
        }))
        .unwrap();
        assert_eq!(graph.range(&["Period", "start"]), Some("dateTime"));
    }

    #[test]
    fn missing_graph_rejected() {
        let result = SchemaGraph::from_value(&json!({ "nodes": [] }));
        assert!(matches!(result, Err(SchemaError::InvalidDocument { .. })));
    }

    #[test]
    fn node_without_id_rejected() {
        let result = SchemaGraph::from_value(&json!({ "@graph": [{ "range": "fhir:date" }] }));
        assert!(matches!(result, Err(SchemaError::InvalidDocument { .. })));
    }

    #[test]
    fn invalid_json_is_a_load_error() {
        let result = SchemaGraph::parse("not json");
        assert!(matches!(result, Err(SchemaError::Load(_))));
    }
}
