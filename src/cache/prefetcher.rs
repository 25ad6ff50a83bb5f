//! Prefetching: predicts which keys will be requested soon after a hit
//! so the coordinator can warm L1 before they are asked for.
//!
//! Strategies are pluggable through [`RelatedKeys`]:
//! 1. [`GraphNeighbors`]: explicit relationships registered by callers
//! 2. [`SharedPrefix`]: recently seen keys with the same prefix
//!
//! Both are advisory. Whether either improves hit rate depends on the
//! workload, so they are chosen in configuration, not hard-wired.

use std::collections::{HashMap, HashSet, VecDeque};

/// Undirected adjacency between keys. Owns no entry data.
#[derive(Debug, Default)]
pub struct RelationshipGraph {
    edges: HashMap<String, HashSet<String>>,
}

impl RelationshipGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `a` and `b` tend to be requested together.
    pub fn add(&mut self, a: &str, b: &str) {
        if a == b {
            return;
        }
        self.edges
            .entry(a.to_string())
            .or_default()
            .insert(b.to_string());
        self.edges
            .entry(b.to_string())
            .or_default()
            .insert(a.to_string());
    }

    pub fn neighbors(&self, key: &str) -> impl Iterator<Item = &str> {
        self.edges
            .get(key)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// Number of keys with at least one relationship.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Coordinator state a heuristic may consult.
pub struct PrefetchContext<'a> {
    pub graph: &'a RelationshipGraph,
    /// Recently requested keys, newest last.
    pub recent: &'a VecDeque<String>,
}

/// A strategy proposing keys related to one that was just read.
pub trait RelatedKeys: Send + Sync {
    fn name(&self) -> &'static str;

    /// Candidate keys, most promising first. May include `key` itself or
    /// duplicates; the caller filters.
    fn related(&self, key: &str, ctx: &PrefetchContext<'_>) -> Vec<String>;
}

/// Keys linked through [`RelationshipGraph::add`].
#[derive(Debug, Default, Clone, Copy)]
pub struct GraphNeighbors;

impl RelatedKeys for GraphNeighbors {
    fn name(&self) -> &'static str {
        "graph"
    }

    fn related(&self, key: &str, ctx: &PrefetchContext<'_>) -> Vec<String> {
        let mut keys: Vec<String> = ctx.graph.neighbors(key).map(str::to_owned).collect();
        // HashSet order is arbitrary; keep proposals stable.
        keys.sort();
        keys
    }
}

/// Recent keys sharing the prefix before the last separator.
///
/// `doc:42:chunk:3` proposes other recent `doc:42:chunk:*` keys, newest
/// first. Keys without a separator have no prefix and propose nothing.
#[derive(Debug, Clone, Copy)]
pub struct SharedPrefix {
    separator: char,
}

impl SharedPrefix {
    pub fn new(separator: char) -> Self {
        Self { separator }
    }

    fn prefix<'k>(&self, key: &'k str) -> Option<&'k str> {
        key.rfind(self.separator)
            .map(|idx| &key[..idx + self.separator.len_utf8()])
    }
}

impl Default for SharedPrefix {
    fn default() -> Self {
        Self::new(':')
    }
}

impl RelatedKeys for SharedPrefix {
    fn name(&self) -> &'static str {
        "shared-prefix"
    }

    fn related(&self, key: &str, ctx: &PrefetchContext<'_>) -> Vec<String> {
        let Some(prefix) = self.prefix(key) else {
            return Vec::new();
        };
        ctx.recent
            .iter()
            .rev()
            .filter(|candidate| candidate.as_str() != key && candidate.starts_with(prefix))
            .cloned()
            .collect()
    }
}

/// Run every heuristic in order and keep the first `limit` distinct
/// candidates other than `key`.
pub fn collect_candidates(
    heuristics: &[Box<dyn RelatedKeys>],
    key: &str,
    ctx: &PrefetchContext<'_>,
    limit: usize,
) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for heuristic in heuristics {
        for candidate in heuristic.related(key, ctx) {
            if out.len() >= limit {
                return out;
            }
            if candidate != key && seen.insert(candidate.clone()) {
                out.push(candidate);
            }
        }
    }
    out
}
