//! Document loading from various sources.
//!
//! Handles loading FHIR JSON documents from files, strings, and HTTP URLs,
//! and enumerating the documents of an input directory.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::LoadError;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Load a JSON document from a file path.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist,
/// or `LoadError::InvalidJson` if the file isn't valid JSON.
pub fn load_document(path: &Path) -> Result<Value, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| LoadError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    load_document_str(&content)
}

/// Load a JSON document from a string.
///
/// # Errors
///
/// Returns `LoadError::InvalidJson` if the string isn't valid JSON.
pub fn load_document_str(content: &str) -> Result<Value, LoadError> {
    serde_json::from_str(content).map_err(|source| LoadError::InvalidJson { source })
}

/// Load a JSON document from an HTTP/HTTPS URL.
///
/// Requires the `remote` feature (enabled by default).
///
/// # Errors
///
/// Returns `LoadError::NetworkError` if the request fails or the response
/// isn't valid JSON.
#[cfg(feature = "remote")]
pub fn load_document_url(url: &str) -> Result<Value, LoadError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|source| LoadError::NetworkError {
            url: url.to_string(),
            source,
        })?;

    let response = client
        .get(url)
        .header(reqwest::header::ACCEPT, "application/fhir+json, application/json")
        .send()
        .and_then(|r| r.error_for_status())
        .map_err(|source| LoadError::NetworkError {
            url: url.to_string(),
            source,
        })?;

    response.json().map_err(|source| LoadError::NetworkError {
        url: url.to_string(),
        source,
    })
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Load a document from a file path or URL.
///
/// URL loading requires the `remote` feature.
pub fn load_document_auto(source: &str) -> Result<Value, LoadError> {
    if is_url(source) {
        #[cfg(feature = "remote")]
        {
            load_document_url(source)
        }
        #[cfg(not(feature = "remote"))]
        {
            Err(LoadError::FileNotFound {
                path: PathBuf::from(source),
            })
        }
    } else {
        load_document(Path::new(source))
    }
}

/// Collect the input documents named by a path.
///
/// A file is returned as-is when it has a `.json` extension. For a
/// directory, the `.json` files directly inside it are returned sorted;
/// subdirectories are not descended into.
pub fn collect_documents(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        if is_json(path) {
            return vec![path.to_path_buf()];
        }
        return vec![];
    }

    let Ok(entries) = std::fs::read_dir(path) else {
        return vec![];
    };

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && is_json(p))
        .collect();
    files.sort();
    files
}

fn is_json(path: &Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
}
