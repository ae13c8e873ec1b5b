//! Data association: sparse bipartite graph over gate-passing
//! (track, cluster) pairs, connected-component partitioning (union-find),
//! and an O(n³) Hungarian solve per component.
//!
//! Components are independent sub-problems; the matching is optimal over
//! the feasible set because infeasible pairs never enter the graph and
//! dummy rows/columns carry a cost larger than any feasible edge. Clusters
//! with no feasible track come back unassigned (births); tracks with no
//! feasible cluster come back missed.

use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Bipartite graph
// ---------------------------------------------------------------------------

/// An edge between a track slot and a cluster slot that passed gating.
#[derive(Clone, Debug)]
pub struct AssignEdge {
    pub track_idx: usize,
    pub cluster_idx: usize,
    /// Mahalanobis distance squared (the assignment cost)
    pub cost: f64,
}

/// Sparse bipartite graph between track indices and cluster indices.
#[derive(Clone, Debug, Default)]
pub struct BipartiteGraph {
    pub edges: Vec<AssignEdge>,
    pub n_tracks: usize,
    pub n_clusters: usize,
}

impl BipartiteGraph {
    pub fn new(n_tracks: usize, n_clusters: usize) -> Self {
        Self {
            edges: Vec::new(),
            n_tracks,
            n_clusters,
        }
    }

    pub fn add_edge(&mut self, track_idx: usize, cluster_idx: usize, cost: f64) {
        self.edges.push(AssignEdge {
            track_idx,
            cluster_idx,
            cost,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Union-Find (path halving + union by rank)
// ---------------------------------------------------------------------------

struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, x: usize, y: usize) {
        let rx = self.find(x);
        let ry = self.find(y);
        if rx == ry {
            return;
        }
        match self.rank[rx].cmp(&self.rank[ry]) {
            std::cmp::Ordering::Less => self.parent[rx] = ry,
            std::cmp::Ordering::Greater => self.parent[ry] = rx,
            std::cmp::Ordering::Equal => {
                self.parent[ry] = rx;
                self.rank[rx] += 1;
            }
        }
    }
}

/// A connected component of the bipartite graph.
#[derive(Clone, Debug)]
pub struct Component {
    pub track_indices: Vec<usize>,
    pub cluster_indices: Vec<usize>,
    pub edges: Vec<AssignEdge>,
}

/// Partition the graph into connected components. Tracks are nodes
/// `0..n_tracks`, clusters are nodes `n_tracks..n_tracks+n_clusters`.
/// Output is sorted by smallest track index so downstream iteration is
/// deterministic.
pub fn partition_components(graph: &BipartiteGraph) -> Vec<Component> {
    let n_total = graph.n_tracks + graph.n_clusters;
    let mut uf = UnionFind::new(n_total);

    for e in &graph.edges {
        uf.union(e.track_idx, graph.n_tracks + e.cluster_idx);
    }

    let mut comp_map: HashMap<usize, Component> = HashMap::new();
    for e in &graph.edges {
        let root = uf.find(e.track_idx);
        let comp = comp_map.entry(root).or_insert_with(|| Component {
            track_indices: Vec::new(),
            cluster_indices: Vec::new(),
            edges: Vec::new(),
        });
        comp.edges.push(e.clone());
    }

    for comp in comp_map.values_mut() {
        comp.track_indices = comp.edges.iter().map(|e| e.track_idx).collect();
        comp.track_indices.sort_unstable();
        comp.track_indices.dedup();
        comp.cluster_indices = comp.edges.iter().map(|e| e.cluster_idx).collect();
        comp.cluster_indices.sort_unstable();
        comp.cluster_indices.dedup();
    }

    let mut comps: Vec<Component> = comp_map.into_values().collect();
    comps.sort_by_key(|c| c.track_indices.first().copied().unwrap_or(usize::MAX));
    comps
}

// ---------------------------------------------------------------------------
// Hungarian algorithm — O(n³) Jonker-Volgenant style potentials
// ---------------------------------------------------------------------------

/// Assignment result for one component (or the whole frame, merged).
#[derive(Clone, Debug, Default)]
pub struct Assignment {
    /// Matched (track_idx, cluster_idx) pairs
    pub pairs: Vec<(usize, usize)>,
    /// Tracks with no feasible cluster (missed this frame)
    pub unmatched_tracks: Vec<usize>,
    /// Clusters with no feasible track (birth candidates)
    pub unmatched_clusters: Vec<usize>,
}

/// Solve one component on a square matrix padded with `dummy_cost`
/// rows/columns. A pair is only reported when its edge was feasible;
/// dummy assignments decode to missed tracks / unassigned clusters.
pub fn solve_component(component: &Component, dummy_cost: f64) -> Assignment {
    let nt = component.track_indices.len();
    let nc = component.cluster_indices.len();

    if nt == 0 || nc == 0 {
        return Assignment {
            pairs: vec![],
            unmatched_tracks: component.track_indices.clone(),
            unmatched_clusters: component.cluster_indices.clone(),
        };
    }

    let n = nt.max(nc);
    let mut cost = vec![dummy_cost; n * n];
    let mut feasible = vec![false; n * n];

    let track_local: HashMap<usize, usize> = component
        .track_indices
        .iter()
        .enumerate()
        .map(|(i, &t)| (t, i))
        .collect();
    let cluster_local: HashMap<usize, usize> = component
        .cluster_indices
        .iter()
        .enumerate()
        .map(|(j, &c)| (c, j))
        .collect();

    for e in &component.edges {
        if let (Some(&ri), Some(&ci)) = (
            track_local.get(&e.track_idx),
            cluster_local.get(&e.cluster_idx),
        ) {
            // Keep the cheapest edge if duplicates appear.
            if !feasible[ri * n + ci] || e.cost < cost[ri * n + ci] {
                cost[ri * n + ci] = e.cost;
                feasible[ri * n + ci] = true;
            }
        }
    }

    let row_assign = run_hungarian(&cost, n);

    let mut pairs = Vec::new();
    let mut unmatched_tracks = Vec::new();
    let mut matched_clusters = vec![false; n];

    for (ri, &ci) in row_assign.iter().enumerate() {
        if ri < nt && ci < nc && feasible[ri * n + ci] {
            pairs.push((component.track_indices[ri], component.cluster_indices[ci]));
            matched_clusters[ci] = true;
        } else if ri < nt {
            unmatched_tracks.push(component.track_indices[ri]);
        }
    }

    let unmatched_clusters: Vec<usize> = (0..nc)
        .filter(|&j| !matched_clusters[j])
        .map(|j| component.cluster_indices[j])
        .collect();

    Assignment {
        pairs,
        unmatched_tracks,
        unmatched_clusters,
    }
}

/// Core Hungarian algorithm on a square n×n cost matrix (row-major).
/// Returns row_assignment[row] = assigned column.
fn run_hungarian(cost: &[f64], n: usize) -> Vec<usize> {
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; n + 1];
    // p[j] = row assigned to column j (1-indexed, 0 = none)
    let mut p = vec![0usize; n + 1];
    let mut way = vec![0usize; n + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![f64::INFINITY; n + 1];
        let mut used = vec![false; n + 1];

        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0;
            for j in 1..=n {
                if !used[j] {
                    let val = cost[(i0 - 1) * n + (j - 1)] - u[i0] - v[j];
                    if val < minv[j] {
                        minv[j] = val;
                        way[j] = j0;
                    }
                    if minv[j] < delta {
                        delta = minv[j];
                        j1 = j;
                    }
                }
            }
            for j in 0..=n {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }

        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut row_assign = vec![0usize; n];
    for j in 1..=n {
        if p[j] != 0 {
            row_assign[p[j] - 1] = j - 1;
        }
    }
    row_assign
}

// ---------------------------------------------------------------------------
// Whole-frame solve + association probability
// ---------------------------------------------------------------------------

/// Solve the full frame: partition into components, solve each, merge, and
/// account for tracks/clusters that never entered the graph. The merged
/// pair list is sorted by (track_idx, cluster_idx) so downstream effects
/// are deterministic.
pub fn associate(graph: &BipartiteGraph, dummy_cost: f64) -> Assignment {
    let components = partition_components(graph);

    let mut merged = Assignment::default();
    let mut seen_tracks = vec![false; graph.n_tracks];
    let mut seen_clusters = vec![false; graph.n_clusters];

    for comp in &components {
        for &t in &comp.track_indices {
            seen_tracks[t] = true;
        }
        for &c in &comp.cluster_indices {
            seen_clusters[c] = true;
        }
        let a = solve_component(comp, dummy_cost);
        merged.pairs.extend(a.pairs);
        merged.unmatched_tracks.extend(a.unmatched_tracks);
        merged.unmatched_clusters.extend(a.unmatched_clusters);
    }

    for (t, seen) in seen_tracks.iter().enumerate() {
        if !seen {
            merged.unmatched_tracks.push(t);
        }
    }
    for (c, seen) in seen_clusters.iter().enumerate() {
        if !seen {
            merged.unmatched_clusters.push(c);
        }
    }

    merged.pairs.sort_unstable();
    merged.unmatched_tracks.sort_unstable();
    merged.unmatched_clusters.sort_unstable();
    merged
}

/// Soft association probability for one (track, cluster) pair:
/// `exp(-d²/2)` over the sum across all of the track's feasible clusters
/// plus a clutter term. Used for quality computation only, never for the
/// assignment itself.
pub fn association_probability(d2: f64, feasible_d2s: &[f64], clutter_density: f64) -> f64 {
    let numer = (-0.5 * d2).exp();
    let denom: f64 = feasible_d2s.iter().map(|&x| (-0.5 * x).exp()).sum::<f64>() + clutter_density;
    if denom <= 0.0 {
        0.0
    } else {
        (numer / denom).clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
