//! FHIR JSON normalization for JSON-LD.
//!
//! Rewrites FHIR resources into a canonical, pre-linked tree ready for a
//! JSON-LD graph-linking stage: every leaf is wrapped in a value container,
//! identifiers are resolved across Bundle and contained-resource
//! boundaries, and dates, codings and canonical references are typed from
//! a schema of declared property ranges.
//!
//! # Example
//!
//! ```
//! use fhir_rdf_prep::{prepare, NormalizeOptions, PathTypeResolver, SchemaGraph};
//! use serde_json::json;
//!
//! let graph = SchemaGraph::global().unwrap();
//! let resolver = PathTypeResolver::new(graph);
//! let options = NormalizeOptions::default();
//!
//! let patient = json!({
//!     "resourceType": "Patient",
//!     "id": "p1",
//!     "birthDate": "1970-03"
//! });
//!
//! let prepared = prepare(patient, &resolver, &options).unwrap();
//! let tree = &prepared.tree;
//!
//! assert_eq!(tree["@id"], "Patient/p1");
//! assert_eq!(tree["id"]["value"], "p1");
//! assert_eq!(
//!     tree["birthDate"]["value"]["@type"],
//!     "http://www.w3.org/2001/XMLSchema#gYearMonth"
//! );
//! ```
//!
//! # Canonical form
//!
//! | Input | Output |
//! |-------|--------|
//! | scalar `x` | `{ "value": x }` |
//! | `"resourceType": "Patient"` | `"fhir:Patient"` plus a `@context` link |
//! | `"id": "p1"` | `{ "value": "p1" }` plus `"@id": "Patient/p1"` |
//! | `"reference": "Patient/p1"` | wrapped, plus `"fhir:link": { "@id": ... }` on the owner |
//! | list member | gains a zero-based `index` |
//! | `"_birthDate": { ... }` | merged into `birthDate` |

mod batch;
mod coding;
mod datatype;
mod document;
mod error;
mod id_map;
mod loader;
mod normalizer;
mod path_type;
mod reference;
mod schema;
mod types;
mod validator;

pub use batch::{Batch, BatchResult, FileResult, FileStatus};
pub use coding::{add_type_arc, concept_type, system_alias};
pub use datatype::{classify_date, DateType};
pub use document::{focus_node, prepare, shape_label, Prepared};
pub use error::{LoadError, NormalizeError, SchemaError, ValidateError, Violation};
pub use id_map::IdentifierContext;
pub use loader::{collect_documents, is_url, load_document, load_document_auto, load_document_str};
pub use normalizer::{adjust_urls, Normalized, TreeNormalizer};
pub use path_type::{PathTypeResolver, TypeQuery};
pub use reference::{resource_type_of, ReferenceLink};
pub use schema::{dotted, SchemaGraph};
pub use types::{is_choice_element, logical_name, NormalizeOptions, FHIR_NS, SHAPE_NS, XSD_NS};
pub use validator::{JsonSchemaValidator, ShapeValidator, StructuralValidator, ValidatorKind};

#[cfg(feature = "remote")]
pub use loader::load_document_url;
