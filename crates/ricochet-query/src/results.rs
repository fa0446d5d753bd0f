//! Alias results
//!
//! The aliases a query observed at its point, grouped by the allocation
//! origin they were propagated from. Results are immutable once returned.

use ricochet_analysis::SolverStats;
use ricochet_core::{AccessPath, StmtId};
use serde::{Deserialize, Serialize};
use std::collections::{btree_map, BTreeMap, BTreeSet};

/// Where an aliased value was created
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AllocationOrigin {
    /// Allocation statement (the method start for parameter origins)
    pub point: StmtId,
    /// `null` assignments and conservative parameter origins
    pub is_null: bool,
    /// Access path the allocation was found for
    pub fact: AccessPath,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct OriginEntry {
    origin: AllocationOrigin,
    aliases: BTreeSet<AccessPath>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ResultsRecord {
    point: StmtId,
    path: AccessPath,
    timed_out: bool,
    stats: SolverStats,
    origins: Vec<OriginEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "ResultsRecord", from = "ResultsRecord")]
pub struct AliasResults {
    point: StmtId,
    path: AccessPath,
    aliases: BTreeMap<AllocationOrigin, BTreeSet<AccessPath>>,
    timed_out: bool,
    stats: SolverStats,
}

impl AliasResults {
    pub fn new(point: StmtId, path: AccessPath) -> Self {
        Self {
            point,
            path,
            aliases: BTreeMap::new(),
            timed_out: false,
            stats: SolverStats::default(),
        }
    }

    pub(crate) fn insert(&mut self, origin: AllocationOrigin, alias: AccessPath) {
        self.aliases.entry(origin).or_default().insert(alias);
    }

    pub(crate) fn finish(mut self, timed_out: bool, stats: SolverStats) -> Self {
        self.timed_out = timed_out;
        self.stats = stats;
        self
    }

    pub fn point(&self) -> StmtId {
        self.point
    }

    pub fn path(&self) -> &AccessPath {
        &self.path
    }

    /// The budget ran out; the results are a subset of the full answer
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn stats(&self) -> &SolverStats {
        &self.stats
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Number of allocation origins
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn get(&self, origin: &AllocationOrigin) -> Option<&BTreeSet<AccessPath>> {
        self.aliases.get(origin)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, AllocationOrigin, BTreeSet<AccessPath>> {
        self.aliases.iter()
    }

    /// Drop origins from `null` and from conservative parameter turns
    pub fn without_null_allocation_sites(&self) -> Self {
        let mut out = self.clone();
        out.aliases.retain(|origin, _| !origin.is_null);
        out
    }

    /// Every alias observed at the query point, whatever its origin
    pub fn may_alias_set(&self) -> BTreeSet<AccessPath> {
        self.aliases.values().flatten().cloned().collect()
    }

    pub fn allocation_sites(&self) -> BTreeSet<StmtId> {
        self.aliases.keys().map(|origin| origin.point).collect()
    }
}

impl<'a> IntoIterator for &'a AliasResults {
    type Item = (&'a AllocationOrigin, &'a BTreeSet<AccessPath>);
    type IntoIter = btree_map::Iter<'a, AllocationOrigin, BTreeSet<AccessPath>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl From<AliasResults> for ResultsRecord {
    fn from(results: AliasResults) -> Self {
        Self {
            point: results.point,
            path: results.path,
            timed_out: results.timed_out,
            stats: results.stats,
            origins: results
                .aliases
                .into_iter()
                .map(|(origin, aliases)| OriginEntry { origin, aliases })
                .collect(),
        }
    }
}

impl From<ResultsRecord> for AliasResults {
    fn from(record: ResultsRecord) -> Self {
        Self {
            point: record.point,
            path: record.path,
            aliases: record
                .origins
                .into_iter()
                .map(|entry| (entry.origin, entry.aliases))
                .collect(),
            timed_out: record.timed_out,
            stats: record.stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use ricochet_core::Local;

    fn origin(point: usize, is_null: bool) -> AllocationOrigin {
        AllocationOrigin {
            point: StmtId::from(point),
            is_null,
            fact: AccessPath::local(Local::from(0)),
        }
    }

    fn sample() -> AliasResults {
        let mut results = AliasResults::new(StmtId::from(9), AccessPath::local(Local::from(1)));
        results.insert(origin(2, false), AccessPath::local(Local::from(1)));
        results.insert(origin(2, false), AccessPath::local(Local::from(3)));
        results.insert(origin(0, true), AccessPath::local(Local::from(1)));
        results
    }

    #[test]
    fn test_without_null_allocation_sites() {
        let results = sample().without_null_allocation_sites();
        assert_eq!(results.len(), 1);
        assert_eq!(results.allocation_sites(), BTreeSet::from([StmtId::from(2)]));
    }

    #[test]
    fn test_may_alias_set_merges_origins() {
        let aliases = sample().may_alias_set();
        assert_eq!(
            aliases,
            BTreeSet::from([AccessPath::local(Local::from(1)), AccessPath::local(Local::from(3))])
        );
    }

    #[test]
    fn test_json_keeps_origins() {
        let results = sample().finish(true, SolverStats::default());
        let json = serde_json::to_string(&results).unwrap();
        let back: AliasResults = serde_json::from_str(&json).unwrap();
        assert_eq!(back, results);
        assert!(back.timed_out());
    }
}
