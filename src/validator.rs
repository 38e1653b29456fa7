//! Shape validation of prepared documents.
//!
//! Validation is a pluggable capability: a backend receives the canonical
//! tree, the focus node (the root `@id`) and the shape label derived from
//! the root resource type. Backends are chosen by configuration through
//! [`ValidatorKind`].

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::error::{LoadError, ValidateError, Violation};
use crate::loader::load_document;
use crate::types::{
    json_type_name, local_name, INDEX_KEY, JSONLD_ID, NODE_ROLE_KEY, PASS_THROUGH_KEYS,
    RESOURCE_TYPE_KEY, SHAPE_NS, TREE_ROOT, VALUE_KEY,
};

/// A shape-validation backend.
pub trait ShapeValidator: Send + Sync {
    /// Short backend name for diagnostics.
    fn name(&self) -> &'static str;

    /// Validate `tree` with `focus` as the focus node against `shape`.
    ///
    /// # Errors
    ///
    /// Returns `ValidateError::Invalid` carrying every violation found, or
    /// another `ValidateError` if validation could not run at all.
    fn validate(&self, tree: &Value, focus: &str, shape: &str) -> Result<(), ValidateError>;
}

/// Available validation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ValidatorKind {
    /// Canonical-form checks built into the crate.
    #[default]
    Structural,
    /// JSON Schema shapes loaded from a directory.
    JsonSchema,
}

impl ValidatorKind {
    /// Construct the backend.
    ///
    /// # Errors
    ///
    /// `JsonSchema` requires a shapes directory.
    pub fn build(&self, shapes_dir: Option<&Path>) -> Result<Box<dyn ShapeValidator>, ValidateError> {
        match self {
            ValidatorKind::Structural => Ok(Box::new(StructuralValidator)),
            ValidatorKind::JsonSchema => {
                let dir = shapes_dir.ok_or(ValidateError::NoShapesDirectory)?;
                Ok(Box::new(JsonSchemaValidator::new(dir)))
            }
        }
    }
}

/// Checks a tree for the invariants of the canonical form.
///
/// - the focus node is the root `@id` and the root is marked `treeRoot`
/// - the shape matches the root resource type
/// - no bare scalars outside value containers and pass-through keys
/// - no `_field` extension keys survive
/// - every list member object carries an `index`
/// - every object owning a `resourceType` has an `@id`
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralValidator;

impl ShapeValidator for StructuralValidator {
    fn name(&self) -> &'static str {
        "structural"
    }

    fn validate(&self, tree: &Value, focus: &str, shape: &str) -> Result<(), ValidateError> {
        let root = tree.as_object().ok_or_else(|| ValidateError::NoFocusNode {
            message: format!("document root is {}, not an object", json_type_name(tree)),
        })?;

        let is_root = root.get(JSONLD_ID).and_then(|id| id.as_str()) == Some(focus)
            && root.get(NODE_ROLE_KEY).and_then(|r| r.as_str()) == Some(TREE_ROOT);
        if !is_root {
            return Err(ValidateError::NoFocusNode {
                message: format!("{} is not the tree root", focus),
            });
        }

        let mut checker = Checker {
            focus,
            shape,
            violations: Vec::new(),
        };

        let root_type = root
            .get(RESOURCE_TYPE_KEY)
            .and_then(|t| t.as_str())
            .map(local_name);
        let expected = shape.strip_prefix(SHAPE_NS).unwrap_or(shape);
        if root_type != Some(expected) {
            checker.report(
                "",
                format!(
                    "root resource type {} does not match shape",
                    root_type.unwrap_or("(none)")
                ),
            );
        }

        checker.object(root, "");

        if checker.violations.is_empty() {
            Ok(())
        } else {
            Err(ValidateError::Invalid {
                errors: checker.violations,
            })
        }
    }
}

struct Checker<'a> {
    focus: &'a str,
    shape: &'a str,
    violations: Vec<Violation>,
}

impl Checker<'_> {
    fn report(&mut self, path: &str, message: String) {
        self.violations.push(Violation {
            node: self.focus.to_string(),
            shape: self.shape.to_string(),
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            message,
        });
    }

    fn object(&mut self, map: &Map<String, Value>, path: &str) {
        if map.contains_key(RESOURCE_TYPE_KEY) && !map.contains_key(JSONLD_ID) {
            self.report(path, "resource has no @id".to_string());
        }

        for (key, value) in map {
            if key.starts_with('@') {
                continue;
            }
            let child = format!("{}/{}", path, escape_pointer(key));

            if key.len() > 1 && key.starts_with('_') {
                self.report(&child, "unmerged extension key".to_string());
            }

            match value {
                Value::Object(inner) => self.object(inner, &child),
                Value::Array(items) => self.array(items, &child),
                scalar => {
                    let allowed = key == VALUE_KEY
                        || key == RESOURCE_TYPE_KEY
                        || PASS_THROUGH_KEYS.contains(&key.as_str());
                    if !allowed {
                        self.report(
                            &child,
                            format!("bare {} outside a value container", json_type_name(scalar)),
                        );
                    }
                }
            }
        }
    }

    fn array(&mut self, items: &[Value], path: &str) {
        for (i, item) in items.iter().enumerate() {
            let child = format!("{}/{}", path, i);
            match item {
                Value::Object(member) => {
                    if !member.contains_key(INDEX_KEY) {
                        self.report(&child, "list member has no index".to_string());
                    }
                    self.object(member, &child);
                }
                Value::Array(_) => self.report(&child, "list nested in a list".to_string()),
                scalar => self.report(
                    &child,
                    format!("bare {} list member", json_type_name(scalar)),
                ),
            }
        }
    }
}

/// RFC 6901 escaping of a pointer segment.
fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Validates against JSON Schema shapes stored as `<Type>.json` files.
#[derive(Debug, Clone)]
pub struct JsonSchemaValidator {
    shapes_dir: PathBuf,
}

impl JsonSchemaValidator {
    pub fn new(shapes_dir: impl Into<PathBuf>) -> Self {
        Self {
            shapes_dir: shapes_dir.into(),
        }
    }

    /// File holding the schema for a shape label.
    pub fn shape_file(&self, shape: &str) -> PathBuf {
        let name = shape.strip_prefix(SHAPE_NS).unwrap_or(shape);
        self.shapes_dir.join(format!("{}.json", name))
    }

    fn load_shape(&self, shape: &str) -> Result<Value, ValidateError> {
        load_document(&self.shape_file(shape)).map_err(|e| match e {
            LoadError::FileNotFound { .. } => ValidateError::UnknownShape {
                shape: shape.to_string(),
            },
            LoadError::InvalidJson { source } => ValidateError::InvalidShape {
                shape: shape.to_string(),
                message: source.to_string(),
            },
            other => ValidateError::Load(other),
        })
    }
}

impl ShapeValidator for JsonSchemaValidator {
    fn name(&self) -> &'static str {
        "json-schema"
    }

    fn validate(&self, tree: &Value, focus: &str, shape: &str) -> Result<(), ValidateError> {
        let schema = self.load_shape(shape)?;
        let validator =
            jsonschema::validator_for(&schema).map_err(|e| ValidateError::InvalidShape {
                shape: shape.to_string(),
                message: e.to_string(),
            })?;

        let errors: Vec<Violation> = validator
            .iter_errors(tree)
            .map(|e| Violation {
                node: focus.to_string(),
                shape: shape.to_string(),
                path: e.instance_path.to_string(),
                message: e.to_string(),
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidateError::Invalid { errors })
        }
    }
}
