//! Batch processing - prepares one file or a directory of files.
//!
//! Every document is handled on its own: a document that is skipped or
//! fails is logged and recorded, and the batch moves on. Only problems
//! with the batch itself (a directory input paired with a file output)
//! abort the run.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::document::{focus_node, prepare, shape_label};
use crate::error::{LoadError, NormalizeError, ValidateError, Violation};
use crate::loader::{collect_documents, load_document};
use crate::path_type::PathTypeResolver;
use crate::types::NormalizeOptions;
use crate::validator::ShapeValidator;

/// Outcome of a single document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Ok,
    /// Not a FHIR resource; nothing written.
    Skipped,
    Error,
}

/// Result of processing one file.
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub file: PathBuf,
    pub status: FileStatus,
    /// Where the prepared document was written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
    /// Resource types referenced from the document.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub referenced_types: Vec<String>,
    /// The prepared document when no output location was given.
    #[serde(skip)]
    pub document: Option<Value>,
}

impl FileResult {
    fn new(file: PathBuf, status: FileStatus) -> Self {
        Self {
            file,
            status,
            output: None,
            message: None,
            violations: Vec::new(),
            referenced_types: Vec::new(),
            document: None,
        }
    }

    fn with_message(file: PathBuf, status: FileStatus, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(file, status)
        }
    }
}

/// Aggregated result of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub path: PathBuf,
    pub files_processed: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub results: Vec<FileResult>,
}

impl BatchResult {
    /// Returns true if no document failed. Skipped documents do not count.
    pub fn is_ok(&self) -> bool {
        self.failed == 0
    }
}

/// Prepares documents and writes them out.
pub struct Batch<'a, 'g> {
    resolver: &'a PathTypeResolver<'g>,
    options: &'a NormalizeOptions,
    validator: Option<&'a dyn ShapeValidator>,
    pretty: bool,
}

impl<'a, 'g> Batch<'a, 'g> {
    pub fn new(resolver: &'a PathTypeResolver<'g>, options: &'a NormalizeOptions) -> Self {
        Self {
            resolver,
            options,
            validator: None,
            pretty: false,
        }
    }

    /// Validate every prepared document before writing it.
    pub fn validator(mut self, validator: &'a dyn ShapeValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Pretty-print written documents.
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// Process a file or a directory of `.json` files.
    ///
    /// For a directory input, `output` must be an existing directory and
    /// each document is written under its own file name. For a file input,
    /// `output` may name a directory or a file. Without an output the
    /// prepared documents are returned in the results.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::FileNotFound` if the input does not exist and
    /// `LoadError::NotADirectory` for a directory input without a
    /// directory output. Per-document problems are recorded in the result.
    pub fn process_path(&self, input: &Path, output: Option<&Path>) -> Result<BatchResult, LoadError> {
        if !input.exists() {
            return Err(LoadError::FileNotFound {
                path: input.to_path_buf(),
            });
        }

        let base = if input.is_dir() {
            if let Some(out) = output {
                if !out.is_dir() {
                    return Err(LoadError::NotADirectory {
                        path: out.to_path_buf(),
                    });
                }
            }
            input
        } else {
            input.parent().unwrap_or(Path::new(""))
        };

        let files = collect_documents(input);
        let results: Vec<FileResult> = files
            .iter()
            .map(|file| {
                let target = output.map(|out| output_path(file, out));
                let mut result = self.process_file(file, target.as_deref());
                result.file = file.strip_prefix(base).unwrap_or(file).to_path_buf();
                result
            })
            .collect();

        let count = |status: FileStatus| results.iter().filter(|r| r.status == status).count();
        Ok(BatchResult {
            path: input.to_path_buf(),
            files_processed: results.len(),
            succeeded: count(FileStatus::Ok),
            skipped: count(FileStatus::Skipped),
            failed: count(FileStatus::Error),
            results,
        })
    }

    /// Prepare a single document, writing it to `target` if given.
    pub fn process_file(&self, file: &Path, target: Option<&Path>) -> FileResult {
        let path = file.to_path_buf();

        let document = match load_document(file) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(file = %file.display(), error = %e, "cannot load document");
                return FileResult::with_message(path, FileStatus::Error, e.to_string());
            }
        };

        let prepared = match prepare(document, self.resolver, self.options) {
            Ok(prepared) => prepared,
            Err(e @ NormalizeError::NotAResource) => {
                warn!(file = %file.display(), "skipping: {}", e);
                return FileResult::with_message(path, FileStatus::Skipped, e.to_string());
            }
            Err(e) => {
                warn!(file = %file.display(), error = %e, "cannot normalize document");
                return FileResult::with_message(path, FileStatus::Error, e.to_string());
            }
        };

        if let Some(validator) = self.validator {
            if let Err(e) = self.validate(validator, &prepared.tree) {
                warn!(
                    file = %file.display(),
                    validator = validator.name(),
                    error = %e,
                    "validation failed"
                );
                let mut result = FileResult::with_message(path, FileStatus::Error, e.to_string());
                if let ValidateError::Invalid { errors } = e {
                    result.violations = errors;
                }
                return result;
            }
        }

        let mut result = FileResult::new(path, FileStatus::Ok);
        result.referenced_types = prepared.referenced_types.into_iter().collect();

        match target {
            Some(target) => {
                if let Err(e) = self.write(&prepared.tree, target) {
                    warn!(file = %file.display(), error = %e, "cannot write result");
                    return FileResult::with_message(result.file, FileStatus::Error, e.to_string());
                }
                debug!(file = %file.display(), output = %target.display(), "wrote document");
                result.output = Some(target.to_path_buf());
            }
            None => result.document = Some(prepared.tree),
        }
        result
    }

    fn validate(&self, validator: &dyn ShapeValidator, tree: &Value) -> Result<(), ValidateError> {
        let focus = focus_node(tree).ok_or_else(|| ValidateError::NoFocusNode {
            message: "document root has no @id".to_string(),
        })?;
        let shape = shape_label(tree).ok_or_else(|| ValidateError::NoFocusNode {
            message: "document root has no resource type".to_string(),
        })?;
        validator.validate(tree, focus, &shape)
    }

    fn write(&self, tree: &Value, target: &Path) -> Result<(), LoadError> {
        let text = if self.pretty {
            serde_json::to_string_pretty(tree)
        } else {
            serde_json::to_string(tree)
        }
        .map_err(|source| LoadError::InvalidJson { source })?;

        std::fs::write(target, text).map_err(|source| LoadError::WriteError {
            path: target.to_path_buf(),
            source,
        })
    }
}

/// Output location for an input file: inside `out` when it is a
/// directory, `out` itself otherwise.
fn output_path(file: &Path, out: &Path) -> PathBuf {
    if out.is_dir() {
        match file.file_name() {
            Some(name) => out.join(name),
            None => out.to_path_buf(),
        }
    } else {
        out.to_path_buf()
    }
}
