//! Core types and vocabulary for FHIR normalization.

use serde_json::Value;

/// FHIR namespace IRI.
pub const FHIR_NS: &str = "http://hl7.org/fhir/";

/// Compact prefix for the FHIR namespace.
pub const FHIR_PREFIX: &str = "fhir:";

/// XML Schema datatype namespace.
pub const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema#";

/// Base IRI of the per-resource validation shapes.
pub const SHAPE_NS: &str = "http://hl7.org/fhir/shape/";

pub const VALUE_KEY: &str = "value";
pub const REFERENCE_KEY: &str = "reference";
pub const CODE_KEY: &str = "code";
pub const SYSTEM_KEY: &str = "system";
pub const CONTAINED_KEY: &str = "contained";
pub const ID_KEY: &str = "id";
pub const RESOURCE_TYPE_KEY: &str = "resourceType";
pub const TYPE_KEY: &str = "type";
pub const EXTENSION_KEY: &str = "extension";
pub const LINK_KEY: &str = "fhir:link";

pub const BUNDLE_RESOURCE_TYPE: &str = "Bundle";
pub const BUNDLE_ENTRY: &str = "entry";
pub const BUNDLE_ENTRY_FULL_URL: &str = "fullUrl";
pub const BUNDLE_ENTRY_RESOURCE: &str = "resource";

/// Path root used when classifying merged extension payloads.
pub const EXTENSION_RESOURCE_TYPE: &str = "Extension";

/// Added by us; never value-wrapped.
pub const NODE_ROLE_KEY: &str = "nodeRole";
/// Added by us to preserve list order.
pub const INDEX_KEY: &str = "index";
/// Narrative XHTML stays a literal.
pub const DIV_KEY: &str = "div";

/// Role marker attached to the root of every prepared document.
pub const TREE_ROOT: &str = "fhir:treeRoot";

/// Keys whose scalar values pass through unwrapped.
pub const PASS_THROUGH_KEYS: &[&str] = &[NODE_ROLE_KEY, INDEX_KEY, DIV_KEY];

pub const JSONLD_ID: &str = "@id";
pub const JSONLD_TYPE: &str = "@type";
pub const JSONLD_VALUE: &str = "@value";
pub const JSONLD_CONTEXT: &str = "@context";
pub const JSONLD_INCLUDED: &str = "@included";

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Whether `name` is a choice element such as `valueQuantity`.
///
/// `valueSet` is an ordinary element, not a choice of `value`.
pub fn is_choice_element(name: &str) -> bool {
    match name.strip_prefix(VALUE_KEY) {
        Some(suffix) => {
            suffix.starts_with(|c: char| c.is_ascii_uppercase()) && suffix != "Set"
        }
        None => false,
    }
}

/// Logical element name used for path purposes.
pub fn logical_name(key: &str) -> &str {
    if is_choice_element(key) {
        VALUE_KEY
    } else {
        key
    }
}

/// Strip the `fhir:` prefix or the full FHIR namespace from a name.
pub fn local_name(name: &str) -> &str {
    name.strip_prefix(FHIR_PREFIX)
        .or_else(|| name.strip_prefix(FHIR_NS))
        .unwrap_or(name)
}

/// Options for document normalization.
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Base IRI for the ontology header's `owl:versionIRI`.
    pub version_base: Option<String>,
    /// Base IRI of the published JSON-LD context documents.
    pub context_server: String,
    /// FHIR server base. Relative references are linked as `../Type/id`
    /// when no server is configured.
    pub fhir_server: Option<String>,
    /// Emit the linking-context block at the root.
    pub add_context: bool,
    /// Emit the `@included` ontology header.
    pub ontology_header: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            version_base: Some("http://build.fhir.org/".to_string()),
            context_server: "https://fhircat.org/fhir-r4/original/contexts/".to_string(),
            fhir_server: Some(FHIR_NS.to_string()),
            add_context: false,
            ontology_header: true,
        }
    }
}

impl NormalizeOptions {
    /// Create options with the default servers, no context block and an
    /// ontology header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `owl:versionIRI` base.
    pub fn version_base(mut self, base: Option<String>) -> Self {
        self.version_base = base;
        self
    }

    /// Set the context server base.
    pub fn context_server(mut self, server: impl Into<String>) -> Self {
        self.context_server = server.into();
        self
    }

    /// Set the FHIR server base.
    pub fn fhir_server(mut self, server: Option<String>) -> Self {
        self.fhir_server = server;
        self
    }

    /// Emit the linking-context block.
    pub fn add_context(mut self, add: bool) -> Self {
        self.add_context = add;
        self
    }

    /// Emit the ontology header.
    pub fn ontology_header(mut self, add: bool) -> Self {
        self.ontology_header = add;
        self
    }

    /// Context document IRI for a resource type.
    pub fn context_iri(&self, resource_type: &str) -> String {
        format!(
            "{}{}.context.jsonld",
            self.context_server,
            resource_type.to_lowercase()
        )
    }
}
