//! Concept typing for coded values.
//!
//! An object carrying a `system` and a `code` (a Coding, or anything shaped
//! like one) gets a compact `@type` naming the concept, e.g. `loinc:1234-5`.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{Map, Value};

use crate::types::{CODE_KEY, JSONLD_TYPE, SYSTEM_KEY, VALUE_KEY};

/// Everything but ASCII alphanumerics and `-._` is escaped in codes.
const CODE_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_');

/// Code systems with a conventional short prefix.
const CODE_SYSTEM_ALIASES: &[(&str, &str)] = &[
    ("http://snomed.info/sct", "sct"),
    ("http://loinc.org", "loinc"),
];

/// Short prefix for a well-known code system.
pub fn system_alias(system: &str) -> Option<&'static str> {
    CODE_SYSTEM_ALIASES
        .iter()
        .find(|(uri, _)| *uri == system)
        .map(|(_, alias)| *alias)
}

/// Concept type IRI for a code in a system.
///
/// Trailing `/` and `#` are ignored when matching the alias table. Unknown
/// systems are joined to the code with `/` unless they already end in a
/// separator.
pub fn concept_type(system: &str, code: &str) -> String {
    let code = utf8_percent_encode(code, CODE_ESCAPE).to_string();
    let root = system.trim_end_matches('/').trim_end_matches('#');

    match system_alias(root) {
        Some(alias) => format!("{}:{}", alias, code),
        None if system.ends_with('/') || system.ends_with('#') => format!("{}{}", system, code),
        None => format!("{}/{}", system, code),
    }
}

/// Attach the concept type to an object holding `system` and `code`.
///
/// Both raw strings and value containers are accepted. Returns whether a
/// type was attached.
pub fn add_type_arc(object: &mut Map<String, Value>) -> bool {
    let system = object.get(SYSTEM_KEY).and_then(unwrap_string);
    let code = object.get(CODE_KEY).and_then(unwrap_string);

    let (Some(system), Some(code)) = (system, code) else {
        return false;
    };
    let concept = concept_type(system, code);
    object.insert(JSONLD_TYPE.to_string(), Value::String(concept));
    true
}

/// The string inside a raw string or a `{ "value": ... }` container.
pub(crate) fn unwrap_string(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Object(map) => map.get(VALUE_KEY).and_then(|v| v.as_str()),
        _ => None,
    }
}
