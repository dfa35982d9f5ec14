//! Density-based clustering (DBSCAN) over 2D or 3D coordinates.
//!
//! Core points are found in parallel; expansion then walks the points in
//! input order, so the partition and its label numbering depend only on the
//! coordinates, `eps` and `min_samples`, never on the thread count.

use rayon::prelude::*;

use crate::query::{IndexedQuery, create_query, search_radius};

/// Cluster assignment of every input index; `None` is the noise label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterLabels {
    labels: Vec<Option<usize>>,
    num_clusters: usize,
}

impl ClusterLabels {
    pub fn labels(&self) -> &[Option<usize>] {
        &self.labels
    }

    pub fn num_clusters(&self) -> usize {
        self.num_clusters
    }

    pub fn noise_count(&self) -> usize {
        self.labels.iter().filter(|l| l.is_none()).count()
    }

    /// Member indices per cluster, ordered by label; noise is left out.
    pub fn groups(&self) -> Vec<Vec<usize>> {
        let mut groups = vec![Vec::new(); self.num_clusters];
        for (index, label) in self.labels.iter().enumerate() {
            if let Some(label) = label {
                groups[*label].push(index);
            }
        }
        groups
    }
}

/// DBSCAN where `min_samples` counts the point itself.
pub fn dbscan<const D: usize>(coords: &[[f64; D]], eps: f64, min_samples: usize) -> ClusterLabels
where
    [f64; D]: rstar::Point<Scalar = f64>,
{
    let query: IndexedQuery<D> = create_query(coords);
    let sqr_eps = eps * eps;

    let is_core: Vec<bool> = coords
        .par_iter()
        .map(|&c| search_radius(&query, c, sqr_eps).take(min_samples).count() >= min_samples)
        .collect();

    let mut labels = vec![None; coords.len()];
    let mut num_clusters = 0;
    let mut frontier = Vec::new();
    let mut neighbors = Vec::new();

    for seed in 0..coords.len() {
        if labels[seed].is_some() || !is_core[seed] {
            continue;
        }
        let label = num_clusters;
        num_clusters += 1;
        labels[seed] = Some(label);
        frontier.push(seed);

        while let Some(current) = frontier.pop() {
            neighbors.clear();
            neighbors.extend(search_radius(&query, coords[current], sqr_eps));
            // rstar yields neighbours in tree order
            neighbors.sort_unstable();
            for &neighbor in &neighbors {
                if labels[neighbor].is_some() {
                    continue;
                }
                labels[neighbor] = Some(label);
                if is_core[neighbor] {
                    frontier.push(neighbor);
                }
            }
        }
    }

    ClusterLabels {
        labels,
        num_clusters,
    }
}
