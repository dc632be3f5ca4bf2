use crate::{EmbeddingStore, Error, Metric, Result};
use ahash::AHashSet;
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;

pub type NeighborList = SmallVec<[u32; 16]>;

/// Construction and search parameters of an HNSW graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswParams {
    /// Links per node on upper levels; level 0 keeps twice as many
    pub max_connections: usize,
    pub max_layers: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    /// Seed for level assignment, so a rebuild from the same input yields
    /// the same graph
    pub seed: u64,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            max_connections: 16,
            max_layers: 4,
            ef_construction: 200,
            ef_search: 50,
            seed: 42,
        }
    }
}

/// Serializable HNSW topology.
///
/// Holds document ids and per-level neighbor lists only; vectors are
/// resolved from the embedding store when the index is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HnswGraph {
    pub ids: Vec<u64>,
    pub layers: Vec<Vec<NeighborList>>,
    pub entry_point: u32,
}

impl HnswGraph {
    fn empty(capacity: usize) -> Self {
        Self {
            ids: Vec::with_capacity(capacity),
            layers: Vec::with_capacity(capacity),
            entry_point: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn max_level(&self) -> usize {
        self.layers
            .get(self.entry_point as usize)
            .map(|levels| levels.len().saturating_sub(1))
            .unwrap_or(0)
    }

    /// Structural checks run before a loaded graph is trusted
    pub fn validate(&self) -> Result<()> {
        let n = self.ids.len();
        if self.layers.len() != n {
            return Err(Error::IndexCorrupt(format!(
                "graph has {} ids but {} adjacency entries",
                n,
                self.layers.len()
            )));
        }
        if n == 0 {
            return Ok(());
        }
        if self.entry_point as usize >= n {
            return Err(Error::IndexCorrupt(format!(
                "entry point {} out of range",
                self.entry_point
            )));
        }

        let mut seen = AHashSet::with_capacity(n);
        for &id in &self.ids {
            if !seen.insert(id) {
                return Err(Error::IndexCorrupt(format!("duplicate document {} in graph", id)));
            }
        }

        let top = self.max_level();
        for (node, levels) in self.layers.iter().enumerate() {
            if levels.is_empty() {
                return Err(Error::IndexCorrupt(format!("node {} has no levels", node)));
            }
            if levels.len() - 1 > top {
                return Err(Error::IndexCorrupt(format!(
                    "node {} is above the entry point level",
                    node
                )));
            }
            for (level, neighbors) in levels.iter().enumerate() {
                for &neighbor in neighbors {
                    let ok = self
                        .layers
                        .get(neighbor as usize)
                        .map(|l| l.len() > level)
                        .unwrap_or(false);
                    if !ok {
                        return Err(Error::IndexCorrupt(format!(
                            "node {} links to invalid neighbor {} on level {}",
                            node, neighbor, level
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Generation-stamped visited marks, cleared in O(1)
struct VisitedSet {
    marks: Vec<u32>,
    epoch: u32,
}

impl VisitedSet {
    fn new(capacity: usize) -> Self {
        Self {
            marks: vec![0; capacity],
            epoch: 1,
        }
    }

    /// Grow to cover `capacity` nodes; existing marks stay stale
    fn ensure(&mut self, capacity: usize) {
        if self.marks.len() < capacity {
            self.marks.resize(capacity, 0);
        }
    }

    #[inline]
    fn clear(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        if self.epoch == 0 {
            self.marks.fill(0);
            self.epoch = 1;
        }
    }

    /// Returns true the first time `idx` is seen in this epoch
    #[inline]
    fn insert(&mut self, idx: u32) -> bool {
        let slot = &mut self.marks[idx as usize];
        if *slot == self.epoch {
            false
        } else {
            *slot = self.epoch;
            true
        }
    }
}

thread_local! {
    /// Per-thread visited marks reused across searches of any index
    static SEARCH_VISITED: RefCell<VisitedSet> = RefCell::new(VisitedSet::new(0));
}

/// Distance-ordered node; ties resolve on node number so every search is
/// deterministic for a fixed graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Scored {
    dist: OrderedFloat<f32>,
    node: u32,
}

/// Immutable HNSW index over one embedding store
pub struct HnswIndex {
    metric: Metric,
    dim: usize,
    params: HnswParams,
    /// Prepared vectors in node order, `dim` floats per node
    vectors: Vec<f32>,
    graph: HnswGraph,
}

impl fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HnswIndex")
            .field("metric", &self.metric)
            .field("dim", &self.dim)
            .field("nodes", &self.graph.ids.len())
            .field("max_level", &self.graph.max_level())
            .field("params", &self.params)
            .finish()
    }
}

impl HnswIndex {
    /// Build a graph over `ids`, inserting them in the given order
    pub fn build(store: &EmbeddingStore, ids: &[u64], metric: Metric, params: HnswParams) -> Result<Self> {
        if params.max_connections == 0 || params.max_layers == 0 {
            return Err(Error::InvalidArgument(
                "HNSW needs at least one layer and one connection".into(),
            ));
        }

        let mut index = Self {
            metric,
            dim: store.dimension(),
            params,
            vectors: resolve_vectors(store, ids, metric)?,
            graph: HnswGraph::empty(ids.len()),
        };
        index.graph.ids.extend_from_slice(ids);

        let mut seen = AHashSet::with_capacity(ids.len());
        if let Some(dup) = ids.iter().find(|id| !seen.insert(**id)) {
            return Err(Error::IndexCorrupt(format!("duplicate document {} in index input", dup)));
        }

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut visited = VisitedSet::new(ids.len());
        for node in 0..ids.len() {
            let level = index.random_level(&mut rng);
            index.insert(node as u32, level, &mut visited);
        }
        tracing::debug!(
            nodes = ids.len(),
            max_level = index.graph.max_level(),
            %metric,
            "built HNSW graph"
        );
        Ok(index)
    }

    /// Rehydrate a stored graph against the embedding store
    pub fn from_graph(graph: HnswGraph, store: &EmbeddingStore, metric: Metric, params: HnswParams) -> Result<Self> {
        graph.validate()?;
        let vectors = resolve_vectors(store, &graph.ids, metric)?;
        Ok(Self {
            metric,
            dim: store.dimension(),
            params,
            vectors,
            graph,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.graph.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn metric(&self) -> Metric {
        self.metric
    }

    #[inline]
    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    pub fn set_ef_search(&mut self, ef_search: usize) {
        self.params.ef_search = ef_search.max(1);
    }

    #[inline]
    pub fn graph(&self) -> &HnswGraph {
        &self.graph
    }

    #[inline]
    pub fn ids(&self) -> &[u64] {
        &self.graph.ids
    }

    #[inline]
    pub fn doc_id(&self, node: u32) -> u64 {
        self.graph.ids[node as usize]
    }

    #[inline]
    fn vector(&self, node: u32) -> &[f32] {
        let start = node as usize * self.dim;
        &self.vectors[start..start + self.dim]
    }

    #[inline]
    fn neighbors(&self, node: u32, level: usize) -> &[u32] {
        self.graph.layers[node as usize]
            .get(level)
            .map(|l| l.as_slice())
            .unwrap_or(&[])
    }

    #[inline]
    fn capacity(&self, level: usize) -> usize {
        if level == 0 {
            self.params.max_connections * 2
        } else {
            self.params.max_connections
        }
    }

    #[inline]
    fn scored(&self, query: &[f32], node: u32) -> Scored {
        Scored {
            dist: OrderedFloat(self.metric.distance(query, self.vector(node))),
            node,
        }
    }

    fn random_level(&self, rng: &mut StdRng) -> usize {
        let promote = 1.0 / self.params.max_connections.max(2) as f32;
        let mut level = 0;
        while level + 1 < self.params.max_layers && rng.random::<f32>() < promote {
            level += 1;
        }
        level
    }

    fn insert(&mut self, node: u32, level: usize, visited: &mut VisitedSet) {
        self.graph.layers.push(vec![NeighborList::new(); level + 1]);
        if node == 0 {
            self.graph.entry_point = 0;
            return;
        }

        let query = self.vector(node).to_vec();
        let top = self.graph.max_level();
        let mut entry = vec![self.graph.entry_point];

        for lc in (level + 1..=top).rev() {
            let found = self.search_layer(&query, &entry, 1, lc, visited);
            if let Some(&(best, _)) = found.first() {
                entry = vec![best];
            }
        }

        for lc in (0..=level.min(top)).rev() {
            let found = self.search_layer(&query, &entry, self.params.ef_construction, lc, visited);
            let selected: NeighborList = found
                .iter()
                .take(self.capacity(lc))
                .map(|&(n, _)| n)
                .collect();
            for &neighbor in &selected {
                self.connect(neighbor, node, lc);
            }
            self.graph.layers[node as usize][lc] = selected;
            entry = found.into_iter().map(|(n, _)| n).collect();
        }

        if level > top {
            self.graph.entry_point = node;
        }
    }

    /// Add a back link and shrink the list to the closest neighbors
    fn connect(&mut self, from: u32, to: u32, level: usize) {
        let cap = self.capacity(level);
        let mut list = std::mem::take(&mut self.graph.layers[from as usize][level]);
        list.push(to);
        if list.len() > cap {
            let base = self.vector(from);
            list.sort_by_cached_key(|&n| (OrderedFloat(self.metric.distance(base, self.vector(n))), n));
            list.truncate(cap);
        }
        self.graph.layers[from as usize][level] = list;
    }

    /// Beam search on one level; returns `(node, distance)` ascending
    fn search_layer(
        &self,
        query: &[f32],
        entry: &[u32],
        ef: usize,
        level: usize,
        visited: &mut VisitedSet,
    ) -> Vec<(u32, f32)> {
        visited.clear();
        let ef = ef.max(1);
        let mut candidates: BinaryHeap<Reverse<Scored>> = BinaryHeap::with_capacity(ef * 2);
        let mut results: BinaryHeap<Scored> = BinaryHeap::with_capacity(ef + 1);

        for &e in entry {
            if visited.insert(e) {
                let s = self.scored(query, e);
                candidates.push(Reverse(s));
                results.push(s);
            }
        }
        while results.len() > ef {
            results.pop();
        }

        while let Some(Reverse(current)) = candidates.pop() {
            if results.len() >= ef {
                if let Some(worst) = results.peek() {
                    if current > *worst {
                        break;
                    }
                }
            }

            for &neighbor in self.neighbors(current.node, level) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let s = self.scored(query, neighbor);
                let admit = match results.peek() {
                    Some(worst) => results.len() < ef || s < *worst,
                    None => true,
                };
                if admit {
                    candidates.push(Reverse(s));
                    results.push(s);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out = results.into_vec();
        out.sort_unstable();
        out.into_iter().map(|s| (s.node, s.dist.0)).collect()
    }

    /// k-NN over a prepared query; returns `(node, distance)` ascending,
    /// at most `want` entries
    pub fn search(&self, query: &[f32], want: usize, ef: usize) -> Vec<(u32, f32)> {
        if self.is_empty() || want == 0 {
            return Vec::new();
        }

        SEARCH_VISITED.with(|cell| match cell.try_borrow_mut() {
            Ok(mut visited) => {
                visited.ensure(self.len());
                self.search_with(query, want, ef, &mut visited)
            }
            Err(_) => self.search_with(query, want, ef, &mut VisitedSet::new(self.len())),
        })
    }

    fn search_with(&self, query: &[f32], want: usize, ef: usize, visited: &mut VisitedSet) -> Vec<(u32, f32)> {
        let mut entry = vec![self.graph.entry_point];
        for lc in (1..=self.graph.max_level()).rev() {
            let found = self.search_layer(query, &entry, 1, lc, visited);
            if let Some(&(best, _)) = found.first() {
                entry = vec![best];
            }
        }

        let mut found = self.search_layer(query, &entry, ef.max(want), 0, visited);
        found.truncate(want);
        found
    }
}

fn resolve_vectors(store: &EmbeddingStore, ids: &[u64], metric: Metric) -> Result<Vec<f32>> {
    let mut vectors = Vec::with_capacity(ids.len() * store.dimension());
    for &id in ids {
        let v = store.get(id).ok_or_else(|| {
            Error::IndexCorrupt(format!("index references document {} absent from embeddings", id))
        })?;
        vectors.extend(metric.prepare(v));
    }
    Ok(vectors)
}
