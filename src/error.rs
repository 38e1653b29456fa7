//! Error types for schema loading, normalization and validation.

use std::path::PathBuf;
use thiserror::Error;

/// Errors reading input documents and writing results.
#[derive(Debug, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {path}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("input is a directory, so the output must be one too: {path}")]
    NotADirectory { path: PathBuf },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. }
            | LoadError::ReadError { .. }
            | LoadError::WriteError { .. }
            | LoadError::NotADirectory { .. } => 3,
            #[cfg(feature = "remote")]
            LoadError::NetworkError { .. } => 3,
            LoadError::InvalidJson { .. } => 2,
        }
    }
}

/// Schema consistency errors.
///
/// These are process-level: no document can be trusted until the schema
/// graph is internally consistent.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("cannot load schema: {0}")]
    Load(#[from] LoadError),

    #[error("invalid schema document: {message}")]
    InvalidDocument { message: String },

    #[error("too many ranges found for {path}: {}", ranges.join(", "))]
    AmbiguousRange { path: String, ranges: Vec<String> },
}

impl SchemaError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            SchemaError::Load(e) => e.exit_code(),
            _ => 2,
        }
    }
}

/// Errors while normalizing a single document.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("not a FHIR resource: document has neither resourceType nor id")]
    NotAResource,

    #[error("list nested directly inside a list at {path}")]
    NestedList { path: String },

    #[error("extension conflict at {path}: '{key}' already carries extension content")]
    ExtensionConflict { path: String, key: String },

    #[error("list member at {path} already carries an index")]
    IndexCollision { path: String },

    #[error("document does not have an identifier")]
    MissingIdentifier,

    #[error("cannot resolve the resource type owning the identifier at {path}")]
    UnresolvedResourceType { path: String },
}

impl NormalizeError {
    /// Recoverable errors skip the document; the rest fail it.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, NormalizeError::NotAResource)
    }

    /// Returns the exit code for this error type. Every normalization
    /// error fails only its own document.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Errors during shape validation.
#[derive(Debug, Error)]
pub enum ValidateError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("no shape '{shape}' available")]
    UnknownShape { shape: String },

    #[error("invalid shape '{shape}': {message}")]
    InvalidShape { shape: String, message: String },

    #[error("no focus node: {message}")]
    NoFocusNode { message: String },

    #[error("the json-schema validator requires a shapes directory")]
    NoShapesDirectory,

    #[error("validation failed with {} error(s)", errors.len())]
    Invalid { errors: Vec<Violation> },
}

impl ValidateError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ValidateError::Load(e) => e.exit_code(),
            ValidateError::Invalid { .. } => 1,
            _ => 2,
        }
    }
}

/// Single shape violation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Violation {
    /// Focus node the violation was reported against.
    pub node: String,
    /// Shape label the node was checked against.
    pub shape: String,
    /// JSON Pointer (RFC 6901) to the offending position.
    pub path: String,
    /// Human-readable error message.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}
