//! Density-based clustering of one frame's detections (DBSCAN variant).
//!
//! # Distance
//! Weighted composite between detections a, b:
//!
//! ```text
//! d(a,b) = w_r * |range_a - range_b|
//!        + w_a * angle_diff(az_a, az_b) * mean_range
//!        + w_v * ||v_a - v_b||
//! ```
//!
//! The azimuth term is scaled by the pair's mean range so it carries the
//! same units as the range term.
//!
//! # Epsilon
//! Fixed, or adaptive `eps(r) = eps0 + k * r` so angular uncertainty at
//! long range does not fragment real targets.
//!
//! Tie-break: a point density-reachable from two clusters belongs to the
//! first that discovered it, deterministic in input order.

use crate::config::ClusteringConfig;
use crate::math::angle_diff;
use crate::types::{Cluster, Detection, Vec3};

/// Point labels during the scan.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Label {
    Unvisited,
    Noise,
    Member(u32),
}

/// DBSCAN clusterer over one frame of detections. Stateless between
/// frames; clusters are ephemeral.
pub struct DbscanClusterer {
    config: ClusteringConfig,
}

impl DbscanClusterer {
    pub fn new(config: ClusteringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    /// Cluster one frame. Detections failing the SNR preprocess and points
    /// in low-density regions are discarded as noise.
    pub fn cluster(&self, detections: &[Detection]) -> Vec<Cluster> {
        let indices = self.preprocess(detections);
        if indices.len() < self.config.min_points {
            return Vec::new();
        }

        let mut labels = vec![Label::Unvisited; indices.len()];
        let mut next_cluster = 0u32;

        for i in 0..indices.len() {
            if labels[i] != Label::Unvisited {
                continue;
            }
            let neighbors = self.range_query(detections, &indices, i);
            if neighbors.len() < self.config.min_points {
                labels[i] = Label::Noise;
                continue;
            }
            let cluster_id = next_cluster;
            next_cluster += 1;
            self.expand_cluster(detections, &indices, i, neighbors, cluster_id, &mut labels);
        }

        let mut clusters = self.build_clusters(detections, &indices, &labels, next_cluster);

        // Safety valve: keep the top max_clusters by confidence.
        if clusters.len() > self.config.max_clusters {
            tracing::warn!(
                formed = clusters.len(),
                cap = self.config.max_clusters,
                "cluster cap exceeded; keeping highest-confidence clusters"
            );
            clusters.sort_by(|a, b| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.cluster_id.cmp(&b.cluster_id))
            });
            clusters.truncate(self.config.max_clusters);
            clusters.sort_by_key(|c| c.cluster_id);
        }
        clusters
    }

    /// Indices of detections that survive preprocessing, in input order.
    fn preprocess(&self, detections: &[Detection]) -> Vec<usize> {
        if !self.config.enable_preprocessing {
            return (0..detections.len()).collect();
        }
        (0..detections.len())
            .filter(|&i| detections[i].snr >= self.config.snr_threshold)
            .collect()
    }

    /// Composite feature distance between two detections.
    fn distance(&self, a: &Detection, b: &Detection) -> f64 {
        let c = &self.config;
        let mean_range = 0.5 * (a.range + b.range);
        c.range_weight * (a.range - b.range).abs()
            + c.azimuth_weight * angle_diff(a.azimuth, b.azimuth).abs() * mean_range
            + c.velocity_weight * (a.velocity - b.velocity).norm()
    }

    /// Neighborhood radius around a detection.
    fn epsilon_for(&self, d: &Detection) -> f64 {
        if self.config.use_adaptive_epsilon {
            self.config.epsilon + self.config.adaptive_epsilon_factor * d.range
        } else {
            self.config.epsilon
        }
    }

    /// All points (local indices) within epsilon of `center`, including
    /// the center itself.
    fn range_query(&self, detections: &[Detection], indices: &[usize], center: usize) -> Vec<usize> {
        let cd = &detections[indices[center]];
        let eps = self.epsilon_for(cd);
        (0..indices.len())
            .filter(|&j| self.distance(cd, &detections[indices[j]]) <= eps)
            .collect()
    }

    /// Transitively absorb density-reachable points into `cluster_id`.
    fn expand_cluster(
        &self,
        detections: &[Detection],
        indices: &[usize],
        seed: usize,
        seed_neighbors: Vec<usize>,
        cluster_id: u32,
        labels: &mut [Label],
    ) {
        labels[seed] = Label::Member(cluster_id);
        let mut worklist = seed_neighbors;
        let mut cursor = 0;
        while cursor < worklist.len() {
            let j = worklist[cursor];
            cursor += 1;
            match labels[j] {
                Label::Noise => {
                    // Border point: reachable but not core.
                    labels[j] = Label::Member(cluster_id);
                }
                Label::Unvisited => {
                    labels[j] = Label::Member(cluster_id);
                    let neighbors = self.range_query(detections, indices, j);
                    if neighbors.len() >= self.config.min_points {
                        worklist.extend(neighbors);
                    }
                }
                Label::Member(_) => {}
            }
        }
    }

    fn build_clusters(
        &self,
        detections: &[Detection],
        indices: &[usize],
        labels: &[Label],
        n_clusters: u32,
    ) -> Vec<Cluster> {
        let mut members: Vec<Vec<Detection>> = vec![Vec::new(); n_clusters as usize];
        for (local, &global) in indices.iter().enumerate() {
            if let Label::Member(id) = labels[local] {
                members[id as usize].push(detections[global].clone());
            }
        }

        let mut clusters = Vec::new();
        for (id, dets) in members.into_iter().enumerate() {
            if dets.len() < self.config.min_points {
                continue;
            }
            let centroid = mean_position(&dets);
            let mean_velocity = mean_velocity(&dets);
            let confidence = self.cluster_confidence(&dets);
            if confidence < self.config.min_confidence {
                continue;
            }
            let eps = self.epsilon_for(&dets[0]).max(f64::EPSILON);
            let density = dets.len() as f64 / eps;
            clusters.push(Cluster {
                cluster_id: id as u32,
                detections: dets,
                centroid,
                mean_velocity,
                confidence,
                density,
            });
        }
        clusters
    }

    /// confidence = clamp(meanSNR / snr_ref) * clamp(n / saturation_count)
    fn cluster_confidence(&self, dets: &[Detection]) -> f64 {
        let mean_snr = dets.iter().map(|d| d.snr).sum::<f64>() / dets.len() as f64;
        let snr_term = (mean_snr / self.config.snr_ref).clamp(0.0, 1.0);
        let count_term = (dets.len() as f64 / self.config.saturation_count as f64).clamp(0.0, 1.0);
        snr_term * count_term
    }
}

fn mean_position(dets: &[Detection]) -> Vec3 {
    dets.iter().map(|d| d.position).sum::<Vec3>() / dets.len() as f64
}

fn mean_velocity(dets: &[Detection]) -> Vec3 {
    dets.iter().map(|d| d.velocity).sum::<Vec3>() / dets.len() as f64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
