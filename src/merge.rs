//! Identity resolution and field merging of extracted candidates

use crate::extract::Extraction;
use crate::types::{Origin, PackageRecord};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Folds candidates into canonical records keyed by identity.
///
/// Canonical records are kept in insertion order; `by_name` indexes them so
/// the identity search does not rescan every record. When several records
/// share a name the earliest inserted one that matches wins.
#[derive(Debug, Default)]
pub struct MergeResolver {
    records: Vec<PackageRecord>,
    by_name: HashMap<String, Vec<usize>>,
}

impl MergeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `candidate` into a matching canonical record, or insert it
    pub fn fold(&mut self, candidate: PackageRecord) {
        let existing = self.by_name.get(candidate.name()).and_then(|indices| {
            indices.iter().copied().find(|&i| match candidate.version() {
                None => true,
                Some(version) => self.records[i].version() == Some(version),
            })
        });

        match existing {
            Some(index) => self.records[index].absorb(candidate),
            None => {
                self.by_name
                    .entry(candidate.name().to_string())
                    .or_default()
                    .push(self.records.len());
                self.records.push(candidate);
            }
        }
    }

    /// Number of canonical records folded so far
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Finalize: keep flat-table records, collapse residual duplicates by
    /// (name, version), mark explicit names and order by (name, version).
    pub fn finish(self, explicit_names: &BTreeSet<String>) -> Vec<PackageRecord> {
        let folded = self.records.len();
        let mut survivors: BTreeMap<(String, String), PackageRecord> = BTreeMap::new();

        for record in self
            .records
            .into_iter()
            .filter(|r| r.origins.contains(&Origin::Packages))
        {
            let key = (
                record.name().to_string(),
                record.version().unwrap_or_default().to_string(),
            );
            match survivors.get_mut(&key) {
                Some(representative) => representative.absorb(record),
                None => {
                    survivors.insert(key, record);
                }
            }
        }

        debug!(
            "Merged {} canonical records into {} packages",
            folded,
            survivors.len()
        );

        survivors
            .into_values()
            .map(|mut record| {
                record.explicit = explicit_names.contains(record.name());
                record
            })
            .collect()
    }
}

/// Resolve an extraction into the canonical, ordered package list
pub fn resolve(extraction: Extraction) -> Vec<PackageRecord> {
    let mut resolver = MergeResolver::new();
    for candidate in extraction.candidates {
        resolver.fold(candidate);
    }
    resolver.finish(&extraction.explicit_names)
}

impl PackageRecord {
    /// Merge another attestation of the same package into this one.
    ///
    /// Scalars and flags keep the first value seen, sets are unioned and the
    /// raw bag takes the incoming side on key conflicts. Identity, id and
    /// enrichment state are never touched.
    pub fn absorb(&mut self, other: PackageRecord) {
        fill(&mut self.resolved, other.resolved);
        fill(&mut self.integrity, other.integrity);
        fill(&mut self.path, other.path);
        fill(&mut self.dev, other.dev);
        fill(&mut self.optional, other.optional);
        fill(&mut self.peer, other.peer);
        fill(&mut self.extraneous, other.extraneous);

        self.origins.extend(other.origins);
        self.dependencies.extend(other.dependencies);
        self.requires.extend(other.requires);
        self.peer_dependencies.extend(other.peer_dependencies);
        self.bundled_dependencies.extend(other.bundled_dependencies);

        for (key, value) in other.raw {
            self.raw.insert(key, value);
        }
    }
}

fn fill<T>(slot: &mut Option<T>, incoming: Option<T>) {
    if slot.is_none() {
        *slot = incoming;
    }
}
