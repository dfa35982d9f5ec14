use rayon::prelude::*;

use crate::cache::GeometryCache;
use crate::clustering::dbscan;
use crate::config::SeparationParams;
use crate::geometry::project_to_plane;
use crate::line::LineSegment;
use crate::point_cloud::PointCloud;

/// One cluster in, zero or more line candidates out.
pub fn separate_lines(
    cluster: &PointCloud,
    params: &SeparationParams,
    cache: &GeometryCache,
) -> Vec<LineSegment> {
    if cluster.len() < params.min_cluster_points {
        return vec![LineSegment::new(cluster.clone(), cache)];
    }
    let direction = cache.line_geometry(cluster).direction;
    let coords: Vec<[f64; 2]> = project_to_plane(cluster.points(), &direction)
        .into_iter()
        .map(|p| [p.x, p.y])
        .collect();
    dbscan(&coords, params.eps, params.min_samples)
        .groups()
        .iter()
        .map(|members| LineSegment::new(cluster.select_by_index(members), cache))
        .collect()
}

/// [`separate_lines`] over every cluster, keeping cluster order.
pub fn separate_all(
    clusters: &[PointCloud],
    params: &SeparationParams,
    cache: &GeometryCache,
) -> Vec<LineSegment> {
    clusters
        .par_iter()
        .map(|cluster| separate_lines(cluster, params, cache))
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}
