//! Lockfile graph extraction.
//!
//! Walks both the flat `packages` table (lockfile v2/v3) and the nested
//! `dependencies` tree (lockfile v1) of an untyped document and emits one
//! candidate [`PackageRecord`] per entry. Candidates are not deduplicated
//! here; see [`crate::merge`].

use crate::decode::{
    as_metadata, bool_field, key_set, object_field, string_array_or, string_field,
};
use crate::error::{InsightError, Result};
use crate::types::{Origin, PackageRecord};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::{BTreeSet, HashSet};
use std::hash::{Hash, Hasher};
use tracing::debug;

const PACKAGES_KEY: &str = "packages";
const DEPENDENCIES_KEY: &str = "dependencies";
const PATH_SEPARATOR: &str = "node_modules/";

/// Metadata keys decoded into typed fields; everything else goes to `raw`.
const KNOWN_FIELDS: &[&str] = &[
    "name",
    "version",
    "resolved",
    "integrity",
    "dev",
    "optional",
    "peer",
    "extraneous",
    "dependencies",
    "requires",
    "peerDependencies",
    "bundleDependencies",
    "bundledDependencies",
];

/// Output of one extraction pass
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Candidates in traversal order, flat table first
    pub candidates: Vec<PackageRecord>,
    /// Names declared by the root manifest as dependencies or devDependencies
    pub explicit_names: BTreeSet<String>,
}

/// Parse lockfile text into an untyped document.
///
/// Nested `dependencies` trees take two JSON levels per package, so the
/// parser's recursion limit is lifted and its stack grown on demand instead.
pub fn parse_document(text: &str) -> Result<Value> {
    let mut json = serde_json::Deserializer::from_str(text);
    json.disable_recursion_limit();

    let value = Value::deserialize(serde_stacker::Deserializer::new(&mut json))
        .map_err(|e| InsightError::parse(e.to_string()))?;
    json.end().map_err(|e| InsightError::parse(e.to_string()))?;
    Ok(value)
}

/// Extract candidate records from a parsed lockfile of any generation
pub fn extract(document: &Value) -> Extraction {
    let Some(root) = document.as_object() else {
        debug!("Lockfile document is not an object, nothing to extract");
        return Extraction::default();
    };

    let mut ctx = ExtractionContext::default();

    // Explicitness depends only on the root entry, so settle it before
    // touching the rest of the table.
    let table = object_field(root, PACKAGES_KEY);
    let explicit_names = table.map(root_explicit_names).unwrap_or_default();

    if let Some(table) = table {
        ctx.visit_table(table);
    }
    if let Some(tree) = object_field(root, DEPENDENCIES_KEY) {
        ctx.visit_tree(tree);
    }

    debug!(
        "Extracted {} candidates ({} explicit names)",
        ctx.candidates.len(),
        explicit_names.len()
    );

    Extraction {
        candidates: ctx.candidates,
        explicit_names,
    }
}

fn root_explicit_names(table: &Map<String, Value>) -> BTreeSet<String> {
    let Some(root) = table.get("") else {
        return BTreeSet::new();
    };
    let meta = as_metadata(root);
    let mut names = key_set(&meta, "dependencies");
    names.extend(key_set(&meta, "devDependencies"));
    names
}

/// Package name implied by an installation path key
fn name_from_path(path: &str) -> &str {
    match path.rfind(PATH_SEPARATOR) {
        Some(pos) => &path[pos + PATH_SEPARATOR.len()..],
        None => path,
    }
}

/// A metadata node compared by address, not by content
#[derive(Clone, Copy)]
struct NodeRef<'a>(&'a Map<String, Value>);

impl PartialEq for NodeRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for NodeRef<'_> {}

impl Hash for NodeRef<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(self.0, state)
    }
}

/// State threaded through one traversal
#[derive(Default)]
struct ExtractionContext<'a> {
    candidates: Vec<PackageRecord>,
    visited: HashSet<NodeRef<'a>>,
    counter: u64,
}

impl<'a> ExtractionContext<'a> {
    fn visit_table(&mut self, table: &'a Map<String, Value>) {
        for (path, value) in table {
            if path.is_empty() {
                continue;
            }
            let meta = as_metadata(value);
            let name = string_field(&meta, "name").or_else(|| trimmed(name_from_path(path)));
            self.push_candidate(Origin::Packages, Some(path), name, &meta);
        }
    }

    /// Depth-first walk with an explicit stack; each node is expanded at
    /// most once no matter how many parents reach it.
    fn visit_tree(&mut self, tree: &'a Map<String, Value>) {
        let mut stack: Vec<(&'a String, &'a Value)> = tree.iter().rev().collect();

        while let Some((key, value)) = stack.pop() {
            let name = trimmed(key);
            match as_metadata(value) {
                Cow::Borrowed(node) => {
                    if !self.visited.insert(NodeRef(node)) {
                        continue;
                    }
                    let name = name.or_else(|| string_field(node, "name"));
                    self.push_candidate(Origin::Dependencies, None, name, node);
                    if let Some(children) = object_field(node, DEPENDENCIES_KEY) {
                        stack.extend(children.iter().rev());
                    }
                }
                Cow::Owned(meta) => {
                    self.push_candidate(Origin::Dependencies, None, name, &meta);
                }
            }
        }
    }

    fn push_candidate(
        &mut self,
        origin: Origin,
        path: Option<&str>,
        name: Option<String>,
        meta: &Map<String, Value>,
    ) {
        let Some(name) = name else {
            debug!("Dropping {} entry without a name (path: {:?})", origin, path);
            return;
        };

        let version = string_field(meta, "version");
        let id = self.candidate_id(origin, path, &name, version.as_deref());
        let mut record = PackageRecord::new(id, name, version, origin);

        record.resolved = string_field(meta, "resolved");
        record.integrity = string_field(meta, "integrity");
        record.path = path.map(String::from);
        record.dev = bool_field(meta, "dev");
        record.optional = bool_field(meta, "optional");
        record.peer = bool_field(meta, "peer");
        record.extraneous = bool_field(meta, "extraneous");
        record.dependencies = key_set(meta, "dependencies");
        record.requires = key_set(meta, "requires");
        record.peer_dependencies = key_set(meta, "peerDependencies");
        record.bundled_dependencies =
            string_array_or(meta, "bundleDependencies", "bundledDependencies");
        record.raw = meta
            .iter()
            .filter(|(key, _)| !KNOWN_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        self.candidates.push(record);
    }

    fn candidate_id(
        &mut self,
        origin: Origin,
        path: Option<&str>,
        name: &str,
        version: Option<&str>,
    ) -> String {
        if path.is_none() && version.is_none() {
            self.counter += 1;
            return format!("{}|{}|#{}", origin.tag(), name, self.counter);
        }

        [Some(origin.tag()), path, Some(name), version]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("|")
    }
}

fn trimmed(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}
