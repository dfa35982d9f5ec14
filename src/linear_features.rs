//! Per-point linearity scoring and line-point selection.
//!
//! Every elevated point is scored by the eigenvalue ratio of its radius
//! neighbourhood. Large clouds are scored on a strided subset and the skipped
//! indices are interpolated from their sampled neighbours in input order,
//! which assumes scan order roughly follows the cables.

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::config::{DynamicParams, ExtractorConfig, SamplingParams};
use crate::error::{ExtractionError, Result};
use crate::geometry::{neighborhood_linearity, percentile};
use crate::point_cloud::PointCloud;
use crate::prelude::*;
use crate::query::{PointQuery, create_point_query, search_radius};

/// Neighbourhoods below this size are treated as sparse by the dynamic radius.
const MIN_DYNAMIC_NEIGHBORS: usize = 5;
const SPARSE_GROWTH: f64 = 1.5;
const ROUGH_SHRINK: f64 = 0.6;
const FLAT_GROWTH: f64 = 1.2;
/// Factor applied to the threshold on the single retry.
const RELAXATION: f64 = 0.8;
/// Scores at or below this are ignored by the percentile threshold.
const MIN_VALID_SCORE: f64 = 0.1;
const MIN_VALID_SCORES: usize = 10;

/// Result of the pass-through height filter.
#[derive(Debug, Clone)]
pub struct HeightSplit {
    /// Points above `height_max`; these are scored.
    pub elevated: PointCloud,
    /// Points inside `[height_min, height_max]`.
    pub band: PointCloud,
    pub height_min: f64,
    pub height_max: f64,
    /// Points below `height_min`, dropped as ground outliers.
    pub discarded: usize,
}

/// Height band of the config, falling back to the 25th/75th z-percentiles.
pub fn height_band(cloud: &PointCloud, config: &ExtractorConfig) -> (f64, f64) {
    let needs_percentiles = config.height_min.is_none() || config.height_max.is_none();
    let z: Vec<f64> = if needs_percentiles {
        cloud.z_values().collect()
    } else {
        Vec::new()
    };
    let min = config
        .height_min
        .or_else(|| percentile(&z, 25.0))
        .unwrap_or(f64::NEG_INFINITY);
    let max = config
        .height_max
        .or_else(|| percentile(&z, 75.0))
        .unwrap_or(f64::INFINITY);
    (min, max.max(min))
}

pub fn split_by_height(cloud: &PointCloud, height_min: f64, height_max: f64) -> HeightSplit {
    let (elevated, rest) = cloud.partition(|_, p| p.z > height_max);
    let (band, below) = rest.partition(|_, p| p.z >= height_min);
    HeightSplit {
        elevated,
        band,
        height_min,
        height_max,
        discarded: below.len(),
    }
}

/// Distance between scored indices in adaptive-sampling mode.
pub fn sampling_stride(len: usize, params: &SamplingParams) -> usize {
    if !params.enabled || len <= params.size_threshold {
        return 1;
    }
    // 20%, 15% and 10% of the points
    match len {
        0..=5_000_000 => 5,
        5_000_001..=10_000_000 => 6,
        _ => 10,
    }
}

/// Indices scored exactly: every `stride`-th index plus the last one.
pub fn sample_indices(len: usize, stride: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..len).step_by(stride.max(1)).collect();
    if let Some(&last) = indices.last() {
        if last != len - 1 {
            indices.push(len - 1);
        }
    }
    indices
}

/// Fills every index by linear interpolation between consecutive samples.
pub fn interpolate_scores(len: usize, sampled: &[usize], scores: &[f64]) -> Vec<f64> {
    let mut result = vec![0.0; len];
    for (pair, values) in sampled.windows(2).zip(scores.windows(2)) {
        let (a, b) = (pair[0], pair[1]);
        let span = (b - a) as f64;
        for (offset, slot) in result[a..b].iter_mut().enumerate() {
            *slot = values[0] + (values[1] - values[0]) * offset as f64 / span;
        }
    }
    if let (Some(&last), Some(&value)) = (sampled.last(), scores.last()) {
        result[last] = value;
    }
    result
}

/// Neighbour radius adapted to local density and terrain roughness.
///
/// Sparse neighbourhoods only grow; otherwise the radius shrinks on rough
/// ground, grows on flat ground and stays at `base_radius` in between.
pub fn dynamic_radius(
    points: &[Point],
    query: &PointQuery,
    index: usize,
    base_radius: f64,
    params: &DynamicParams,
) -> f64 {
    let mut count = 0;
    let mut z_min = f64::INFINITY;
    let mut z_max = f64::NEG_INFINITY;
    for neighbor in search_radius(query, points[index].into(), base_radius * base_radius) {
        let z = points[neighbor].z;
        count += 1;
        z_min = z_min.min(z);
        z_max = z_max.max(z);
    }

    if count < MIN_DYNAMIC_NEIGHBORS {
        return (base_radius * SPARSE_GROWTH).min(params.max_radius);
    }
    let z_range = z_max - z_min;
    if z_range > params.rough_z_range {
        (base_radius * ROUGH_SHRINK).max(params.min_radius)
    } else if z_range < params.flat_z_range {
        (base_radius * FLAT_GROWTH).min(params.max_radius)
    } else {
        base_radius
    }
}

fn score_point(
    points: &[Point],
    query: &PointQuery,
    index: usize,
    config: &ExtractorConfig,
    neighbors: &mut Vec<Point>,
) -> f64 {
    let radius = if config.use_dynamic_params {
        dynamic_radius(points, query, index, config.neighbor_radius, &config.dynamic)
    } else {
        config.neighbor_radius
    };
    neighbors.clear();
    neighbors.extend(search_radius(query, points[index].into(), radius * radius).map(|i| points[i]));
    neighborhood_linearity(neighbors)
}

/// Linearity of every point, exact or sampled depending on the cloud size.
pub fn compute_linearity(points: &[Point], query: &PointQuery, config: &ExtractorConfig) -> Vec<f64> {
    let stride = sampling_stride(points.len(), &config.sampling);
    if stride == 1 {
        return (0..points.len())
            .into_par_iter()
            .map_with(Vec::new(), |neighbors, index| {
                score_point(points, query, index, config, neighbors)
            })
            .collect();
    }

    let sampled = sample_indices(points.len(), stride);
    debug!(
        "Adaptive sampling: scoring {} of {} points (stride {})",
        sampled.len(),
        points.len(),
        stride
    );
    let sampled_scores: Vec<f64> = sampled
        .par_iter()
        .map_with(Vec::new(), |neighbors, &index| {
            score_point(points, query, index, config, neighbors)
        })
        .collect();
    interpolate_scores(points.len(), &sampled, &sampled_scores)
}

/// Percentile of the scores above 0.1, clamped to the configured bounds.
/// Falls back to `min_threshold` when fewer than ten scores qualify.
pub fn dynamic_threshold(scores: &[f64], params: &DynamicParams) -> f64 {
    let valid: Vec<f64> = scores.iter().copied().filter(|&s| s > MIN_VALID_SCORE).collect();
    if valid.len() < MIN_VALID_SCORES {
        return params.min_threshold;
    }
    percentile(&valid, params.threshold_percentile)
        .map_or(params.min_threshold, |t| t.clamp(params.min_threshold, params.max_threshold))
}

/// Line points and everything else.
#[derive(Debug, Clone)]
pub struct LineFeatures {
    pub line_cloud: PointCloud,
    /// Elevated points below the threshold followed by the low-height band.
    pub residual_cloud: PointCloud,
    pub scores: Vec<f64>,
    /// Threshold that produced `line_cloud`.
    pub threshold: f64,
    pub relaxed: bool,
}

/// Scores `elevated` and keeps the points whose linearity exceeds the threshold.
///
/// One retry with a relaxed threshold is made before giving up with
/// [`ExtractionError::NoCandidateLinePoints`].
pub fn extract_line_points(
    elevated: &PointCloud,
    band: &PointCloud,
    config: &ExtractorConfig,
) -> Result<LineFeatures> {
    let points = elevated.points();
    let query = create_point_query(points);
    let scores = compute_linearity(points, &query, config);

    let threshold = if config.use_dynamic_params {
        dynamic_threshold(&scores, &config.dynamic)
    } else {
        config.linearity_threshold
    };

    let select = |threshold: f64| elevated.partition(|i, _| scores[i] > threshold);
    let (mut line_cloud, mut rest) = select(threshold);
    let mut used = threshold;
    let mut relaxed = false;
    if line_cloud.is_empty() {
        used = threshold * RELAXATION;
        warn!(
            "No points above linearity threshold {:.3}, retrying with {:.3}",
            threshold, used
        );
        (line_cloud, rest) = select(used);
        relaxed = true;
        if line_cloud.is_empty() {
            return Err(ExtractionError::NoCandidateLinePoints {
                threshold,
                relaxed_threshold: used,
                scored_points: points.len(),
            });
        }
    }
    info!(
        "Linear features: {} of {} elevated points above {:.3}",
        line_cloud.len(),
        points.len(),
        used
    );

    Ok(LineFeatures {
        residual_cloud: PointCloud::concat([&rest, band]),
        line_cloud,
        scores,
        threshold: used,
        relaxed,
    })
}

#[cfg(test)]
mod tests {
    use all_asserts::{assert_ge, assert_gt, assert_lt};
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn line_with_clutter(rng: &mut StdRng) -> Vec<Point> {
        let mut points: Vec<Point> = (0..400)
            .map(|i| Point::new(i as f64 * 0.1, 0.0, 20.0 + rng.random_range(-0.03..0.03)))
            .collect();
        points.extend((0..200).map(|_| {
            Point::new(
                rng.random_range(0.0..40.0),
                rng.random_range(5.0..9.0),
                rng.random_range(18.0..22.0),
            )
        }));
        points
    }

    #[test]
    fn height_band_defaults_to_quartiles() {
        let cloud = PointCloud::from_points((0..=100).map(|i| Point::new(0.0, 0.0, i as f64)).collect());
        let (min, max) = height_band(&cloud, &ExtractorConfig::default());
        assert_relative_eq!(min, 25.0);
        assert_relative_eq!(max, 75.0);

        let explicit = ExtractorConfig {
            height_min: Some(1.0),
            height_max: Some(2.0),
            ..Default::default()
        };
        assert_eq!(height_band(&cloud, &explicit), (1.0, 2.0));
    }

    #[test]
    fn height_split_partitions_by_band() {
        let cloud = PointCloud::from_points((0..10).map(|i| Point::new(0.0, 0.0, i as f64)).collect());
        let split = split_by_height(&cloud, 2.0, 6.0);
        assert_eq!(split.elevated.len(), 3);
        assert_eq!(split.band.len(), 5);
        assert_eq!(split.discarded, 2);
    }

    #[test]
    fn strides_shrink_with_size() {
        let params = SamplingParams::default();
        assert_eq!(sampling_stride(8_000, &params), 1);
        assert_eq!(sampling_stride(8_001, &params), 5);
        assert_eq!(sampling_stride(5_000_000, &params), 5);
        assert_eq!(sampling_stride(5_000_001, &params), 6);
        assert_eq!(sampling_stride(10_000_000, &params), 6);
        assert_eq!(sampling_stride(10_000_001, &params), 10);
        let disabled = SamplingParams {
            enabled: false,
            ..params
        };
        assert_eq!(sampling_stride(20_000_000, &disabled), 1);
    }

    #[test]
    fn sampling_always_covers_the_last_index() {
        assert_eq!(sample_indices(10, 4), vec![0, 4, 8, 9]);
        assert_eq!(sample_indices(9, 4), vec![0, 4, 8]);
        assert!(sample_indices(0, 4).is_empty());
    }

    #[test]
    fn interpolation_is_linear_between_samples() {
        let sampled = [0, 4, 6];
        let scores = [0.0, 1.0, 0.0];
        let full = interpolate_scores(7, &sampled, &scores);
        assert_eq!(full, vec![0.0, 0.25, 0.5, 0.75, 1.0, 0.5, 0.0]);
    }

    #[test]
    fn sampled_scores_track_exact_scores_on_a_cable() {
        let mut rng = StdRng::seed_from_u64(7);
        let points = line_with_clutter(&mut rng);
        let query = create_point_query(&points);
        let exact = compute_linearity(&points, &query, &ExtractorConfig::default());
        let sampled_config = ExtractorConfig {
            sampling: SamplingParams {
                enabled: true,
                size_threshold: 100,
            },
            ..Default::default()
        };
        let sampled = compute_linearity(&points, &query, &sampled_config);
        // along the cable consecutive scores are nearly equal; the last
        // cable samples interpolate towards the clutter that follows
        for i in 1..395 {
            assert_lt!((exact[i] - sampled[i]).abs(), 0.05);
        }
    }

    #[test]
    fn dynamic_radius_reacts_to_density_and_roughness() {
        let params = DynamicParams::default();
        let lonely = vec![Point::origin(), Point::new(50.0, 0.0, 0.0)];
        let query = create_point_query(&lonely);
        assert_relative_eq!(dynamic_radius(&lonely, &query, 0, 1.0, &params), 1.5);

        // sparse and flat: grows once for sparsity, never for flatness
        let sparse = vec![Point::origin(), Point::new(0.5, 0.0, 0.0), Point::new(1.0, 0.0, 0.0)];
        let query = create_point_query(&sparse);
        assert_relative_eq!(dynamic_radius(&sparse, &query, 0, 1.5, &params), 2.25);
        assert_relative_eq!(dynamic_radius(&sparse, &query, 0, 2.5, &params), params.max_radius);

        // a vertical column spans 5.5 m within a 3 m radius
        let rough: Vec<Point> = (0..20).map(|i| Point::new(0.0, 0.0, 0.55 * i as f64)).collect();
        let query = create_point_query(&rough);
        assert_relative_eq!(dynamic_radius(&rough, &query, 10, 3.0, &params), 1.8, epsilon = 1e-12);
        let floored = DynamicParams {
            min_radius: 2.0,
            ..params
        };
        assert_relative_eq!(dynamic_radius(&rough, &query, 10, 3.0, &floored), 2.0);

        // moderate relief keeps the base radius
        let sloped: Vec<Point> = (0..20).map(|i| Point::new(0.1 * i as f64, 0.0, 0.2 * i as f64)).collect();
        let query = create_point_query(&sloped);
        assert_relative_eq!(dynamic_radius(&sloped, &query, 10, 1.5, &params), 1.5);

        let flat: Vec<Point> = (0..20).map(|i| Point::new(0.05 * i as f64, 0.0, 0.0)).collect();
        let query = create_point_query(&flat);
        assert_relative_eq!(dynamic_radius(&flat, &query, 10, 1.0, &params), 1.2, epsilon = 1e-12);
        assert_relative_eq!(dynamic_radius(&flat, &query, 10, 2.8, &params), params.max_radius);
    }

    #[test]
    fn dynamic_threshold_is_clamped() {
        let params = DynamicParams::default();
        let high = vec![0.99; 10];
        assert_eq!(dynamic_threshold(&high, &params), params.max_threshold);

        let mut scores: Vec<f64> = (0..20).map(|i| 0.7 + 0.01 * i as f64).collect();
        // low scores do not drag the percentile down
        scores.extend([0.0, 0.05, 0.1]);
        assert_relative_eq!(dynamic_threshold(&scores, &params), 0.871, epsilon = 1e-9);
    }

    #[test]
    fn dynamic_threshold_needs_ten_valid_scores() {
        let params = DynamicParams::default();
        let few = vec![0.0, 0.1, 0.95, 0.95, 0.95];
        assert_eq!(dynamic_threshold(&few, &params), params.min_threshold);
        assert_eq!(dynamic_threshold(&[], &params), params.min_threshold);
    }

    #[test]
    fn cable_points_score_high() {
        let mut rng = StdRng::seed_from_u64(11);
        let points = line_with_clutter(&mut rng);
        let features = extract_line_points(
            &PointCloud::from_points(points),
            &PointCloud::new(),
            &ExtractorConfig::default(),
        )
        .unwrap();
        let on_cable = features.line_cloud.points().iter().filter(|p| p.y == 0.0).count();
        assert_ge!(on_cable, 380);
        assert_gt!(features.residual_cloud.len(), 0);
        assert!(!features.relaxed);
    }

    #[test]
    fn empty_selection_is_an_error() {
        // isolated points have fewer than three neighbours and score zero
        let points: Vec<Point> = (0..20).map(|i| Point::new(10.0 * i as f64, 0.0, 0.0)).collect();
        let err = extract_line_points(
            &PointCloud::from_points(points),
            &PointCloud::new(),
            &ExtractorConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::NoCandidateLinePoints { scored_points: 20, .. }
        ));
    }
}
