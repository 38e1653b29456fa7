//! Path type resolution against the schema graph.
//!
//! Answers "what declared type does this property path have?" for paths
//! that are rarely declared verbatim. A path such as
//! `Observation.referenceRange.low.value` has no node of its own; its type
//! is found by following the declared range of the closest declaring
//! prefix (`Observation.referenceRange.low` -> `Quantity`) and resolving
//! the remaining suffix from there (`Quantity.value`).

use dashmap::DashMap;
use tracing::warn;

use crate::schema::{dotted, SchemaGraph};

/// Upper bound on prefix splices for a single resolution.
const MAX_SPLICES: usize = 32;

/// Classification queries built on the generic resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeQuery {
    /// `date`, `time` or `dateTime` fields.
    DateLike,
    /// Fields whose value is a canonical URL of another resource.
    Canonical,
}

impl TypeQuery {
    /// Range types that satisfy this query.
    pub fn targets(&self) -> &'static [&'static str] {
        match self {
            TypeQuery::DateLike => &["date", "time", "dateTime"],
            TypeQuery::Canonical => &["canonical"],
        }
    }
}

/// Resolves property paths to their declared types.
///
/// Holds a memo of classification results keyed by the joined path. The
/// schema is immutable, so entries are never invalidated.
#[derive(Debug)]
pub struct PathTypeResolver<'g> {
    graph: &'g SchemaGraph,
    memo: DashMap<(TypeQuery, String), Option<String>>,
}

impl<'g> PathTypeResolver<'g> {
    pub fn new(graph: &'g SchemaGraph) -> Self {
        Self {
            graph,
            memo: DashMap::new(),
        }
    }

    /// The graph this resolver reads from.
    pub fn graph(&self) -> &'g SchemaGraph {
        self.graph
    }

    /// Resolve the effective type of `path` and return it if it is one of
    /// `targets`.
    ///
    /// A directly declared range decides the answer even when it is not a
    /// target. Otherwise the longest declaring proper prefix is followed
    /// and the unconsumed suffix is resolved against its range. `None`
    /// means the path is untyped or not a target type.
    pub fn resolves_to<S: AsRef<str>>(&self, path: &[S], targets: &[&str]) -> Option<String> {
        let mut current: Vec<String> = path.iter().map(|s| s.as_ref().to_string()).collect();

        for _ in 0..=MAX_SPLICES {
            if let Some(range) = self.graph.range(&current[..]) {
                return targets.contains(&range).then(|| range.to_string());
            }

            let (consumed, range) = (1..current.len())
                .rev()
                .find_map(|i| self.graph.range(&current[..i]).map(|r| (i, r)))?;

            let mut spliced = Vec::with_capacity(current.len() - consumed + 1);
            spliced.push(range.to_string());
            spliced.extend_from_slice(&current[consumed..]);
            current = spliced;
        }

        warn!(
            path = %dotted(path),
            "path resolution exceeded {} splices; treating as untyped",
            MAX_SPLICES
        );
        None
    }

    /// Memoized classification of a path.
    pub fn classify<S: AsRef<str>>(&self, path: &[S], query: TypeQuery) -> Option<String> {
        let key = (query, dotted(path));
        if let Some(hit) = self.memo.get(&key) {
            return hit.value().clone();
        }
        let resolved = self.resolves_to(path, query.targets());
        self.memo.insert(key, resolved.clone());
        resolved
    }

    /// The date-family type of a path, if it is a date, time or dateTime.
    pub fn date_type<S: AsRef<str>>(&self, path: &[S]) -> Option<String> {
        self.classify(path, TypeQuery::DateLike)
    }

    /// Whether a path holds a canonical reference.
    pub fn is_canonical<S: AsRef<str>>(&self, path: &[S]) -> bool {
        self.classify(path, TypeQuery::Canonical).is_some()
    }
}
