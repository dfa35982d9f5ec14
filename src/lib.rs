use rayon::prelude::*;
use serde::Serialize;
use std::fmt::Display;
use std::time::{Duration, Instant};

use crate::cache::GeometryCache;
use crate::clustering::dbscan;
use crate::curve_fit::{ModelFit, fit_model};
use crate::line::LineSegment;
use crate::linear_features::{extract_line_points, height_band, split_by_height};
use crate::normalize::{LengthReport, filter_by_length, normalize};
use crate::prelude::*;
use crate::reconcile::{ReconcileReport, reconcile};
use crate::separation::separate_all;
use crate::towers::{Tower, TowerStrategy, infer_towers};
use crate::validation::{ValidationSummary, segment_all};

pub use crate::config::ExtractorConfig;
pub use crate::error::{ExtractionError, FitError, Result};
pub use crate::normalize::TransformInfo;
pub use crate::point_cloud::PointCloud;

pub mod prelude {
    use nalgebra::{Point3, Vector3};

    pub type Point = Point3<f64>;
    pub type Vector = Vector3<f64>;
    /// RGB in `[0, 1]`.
    pub type Color = [f32; 3];
}

pub mod cache;
pub mod clustering;
pub mod config;
pub mod curve_fit;
pub mod error;
pub mod geometry;
pub mod line;
pub mod linear_features;
pub mod normalize;
pub mod point_cloud;
pub mod query;
pub mod reconcile;
pub mod segmentation;
pub mod separation;
pub mod towers;
pub mod validation;

impl ExtractorConfig {
    /// Validates the configuration once and freezes it into an extractor.
    pub fn build(self) -> Result<PowerLineExtractor> {
        self.validate()?;
        Ok(PowerLineExtractor { config: self })
    }
}

/// One extracted cable, in the shared frame of its run.
#[derive(Debug, Clone, Serialize)]
pub struct PowerLine {
    /// Position in [`ExtractionResult::lines`].
    pub id: usize,
    pub cloud: PointCloud,
    pub span_length: f64,
    pub path_length: f64,
    pub direction: Vector,
    /// Extreme points along `direction`, ordered lexicographically by `(x, y, z)`.
    pub endpoints: [Point; 2],
    /// One entry per configured curve model.
    pub fits: Vec<ModelFit>,
    pub transform: TransformInfo,
}

impl PowerLine {
    pub fn points(&self) -> &[Point] {
        self.cloud.points()
    }

    /// Points in the input frame.
    pub fn original_points(&self) -> Vec<Point> {
        self.points().iter().map(|p| self.transform.invert(p)).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub lines: Vec<PowerLine>,
    /// Transform shared by every line; `None` when no line survived.
    pub transform: Option<TransformInfo>,
    /// Elevated points below the linearity threshold followed by the
    /// low-height band, in the input frame.
    pub residual_cloud: PointCloud,
    pub linearity_threshold: f64,
    pub threshold_relaxed: bool,
    pub validation: ValidationSummary,
    pub reconciliation: ReconcileReport,
    pub length_report: LengthReport,
    #[serde(skip)]
    pub timings: Timings,
}

impl ExtractionResult {
    /// Towers from the endpoints of the final lines; fails on invalid strategy parameters.
    pub fn towers(&self, strategy: &TowerStrategy) -> Result<Vec<Tower>> {
        infer_towers(&self.lines, strategy)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Timings {
    pub height_filter: Duration,
    pub feature_scoring: Duration,
    pub clustering: Duration,
    pub separation: Duration,
    pub segmentation: Duration,
    pub reconciliation: Duration,
    pub length_filter: Duration,
    pub normalization: Duration,
    pub curve_fitting: Duration,
    pub total: Duration,
    pub input_points: usize,
    pub elevated_points: usize,
    pub line_points: usize,
    pub clusters: usize,
    pub line_candidates: usize,
    pub segments: usize,
    pub reconciled_lines: usize,
    pub final_lines: usize,
}
impl Display for Timings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Timings:
  Height Filter: {:?}
  Feature Scoring: {:?}
  Clustering: {:?}
  Separation: {:?}
  Segmentation: {:?}
  Reconciliation: {:?}
  Length Filter: {:?}
  Normalization: {:?}
  Curve Fitting: {:?}
  Total: {:?}
  Points: {} input, {} elevated, {} on lines
  Clusters: {}
  Line Candidates: {}
  Segments: {}
  Reconciled Lines: {}
  Final Lines: {}",
            self.height_filter,
            self.feature_scoring,
            self.clustering,
            self.separation,
            self.segmentation,
            self.reconciliation,
            self.length_filter,
            self.normalization,
            self.curve_fitting,
            self.total,
            self.input_points,
            self.elevated_points,
            self.line_points,
            self.clusters,
            self.line_candidates,
            self.segments,
            self.reconciled_lines,
            self.final_lines,
        )
    }
}

fn lexicographic(a: &Point, b: &Point) -> std::cmp::Ordering {
    a.x.total_cmp(&b.x)
        .then(a.y.total_cmp(&b.y))
        .then(a.z.total_cmp(&b.z))
}

#[derive(Debug)]
pub struct PowerLineExtractor {
    config: ExtractorConfig,
}
impl PowerLineExtractor {
    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Runs every stage on `cloud`. The geometry cache lives for this call only.
    pub fn extract(&self, cloud: &PointCloud) -> Result<ExtractionResult> {
        if cloud.is_empty() {
            return Err(ExtractionError::EmptyInput);
        }
        if let Some(index) = cloud.points().iter().position(|p| !p.coords.iter().all(|c| c.is_finite())) {
            return Err(ExtractionError::InvalidInput(format!(
                "point {index} has a non-finite coordinate"
            )));
        }
        let cache = GeometryCache::new();
        let result = self.run(cloud, &cache);
        cache.clear();
        result
    }

    fn run(&self, cloud: &PointCloud, cache: &GeometryCache) -> Result<ExtractionResult> {
        let config = &self.config;
        let mut timings = Timings {
            input_points: cloud.len(),
            ..Default::default()
        };
        let start_total = Instant::now();

        let start = Instant::now();
        let (height_min, height_max) = height_band(cloud, config);
        let split = split_by_height(cloud, height_min, height_max);
        timings.height_filter = start.elapsed();
        timings.elevated_points = split.elevated.len();
        log::info!(
            "Height band [{height_min:.2}, {height_max:.2}]: {} elevated, {} in band, {} discarded",
            split.elevated.len(),
            split.band.len(),
            split.discarded
        );

        let start = Instant::now();
        let features = extract_line_points(&split.elevated, &split.band, config)?;
        timings.feature_scoring = start.elapsed();
        timings.line_points = features.line_cloud.len();

        let start = Instant::now();
        let coords: Vec<[f64; 3]> = features.line_cloud.points().iter().map(|&p| p.into()).collect();
        let labels = dbscan(&coords, config.cluster_eps, config.cluster_min_samples);
        let clusters: Vec<PointCloud> = labels
            .groups()
            .iter()
            .map(|members| features.line_cloud.select_by_index(members))
            .collect();
        timings.clustering = start.elapsed();
        timings.clusters = clusters.len();
        log::info!(
            "Clustering: {} clusters, {} noise points",
            clusters.len(),
            labels.noise_count()
        );

        let start = Instant::now();
        let candidates = separate_all(&clusters, &config.separation, cache);
        timings.separation = start.elapsed();
        timings.line_candidates = candidates.len();
        log::info!("Separation: {} line candidates", candidates.len());

        let start = Instant::now();
        let (segments, validation) =
            segment_all(&candidates, &config.segmentation, &config.catenary, cache);
        let segments: Vec<LineSegment> = segments.into_iter().map(|s| s.segment).collect();
        timings.segmentation = start.elapsed();
        timings.segments = segments.len();
        log::info!(
            "Segmentation: {} segments ({} accepted, {} rejected, {} parents kept)",
            segments.len(),
            validation.accepted,
            validation.rejected,
            validation.fallbacks
        );

        let start = Instant::now();
        let (lines, reconciliation) = reconcile(
            segments,
            &config.reconcile,
            config.min_line_length,
            config.absorb_max_gap(),
            cache,
        );
        timings.reconciliation = start.elapsed();
        timings.reconciled_lines = lines.len();

        let start = Instant::now();
        let (lines, length_report) = filter_by_length(
            lines,
            config.length_method,
            config.min_line_length,
            config.min_line_points,
        );
        timings.length_filter = start.elapsed();

        let start = Instant::now();
        let normalized = normalize(
            &lines,
            config.reference_point_method,
            config.reference_scope,
            cache,
        )?;
        timings.normalization = start.elapsed();

        let start = Instant::now();
        let (power_lines, transform): (Vec<PowerLine>, Option<TransformInfo>) = match normalized {
            Some(normalized) => {
                let transform = normalized.transforms.first().copied();
                let power_lines = normalized
                    .lines
                    .par_iter()
                    .zip(normalized.transforms.par_iter())
                    .enumerate()
                    .map(|(id, (line, transform))| self.power_line(id, line, *transform))
                    .collect();
                (power_lines, transform)
            }
            None => (Vec::new(), None),
        };
        timings.curve_fitting = start.elapsed();
        timings.final_lines = power_lines.len();
        if power_lines.is_empty() {
            log::warn!("No power line passed the final filters");
        }

        timings.total = start_total.elapsed();
        log::info!("Extracted {} power lines in {:?}", power_lines.len(), timings.total);

        Ok(ExtractionResult {
            lines: power_lines,
            transform,
            residual_cloud: features.residual_cloud,
            linearity_threshold: features.threshold,
            threshold_relaxed: features.relaxed,
            validation,
            reconciliation,
            length_report,
            timings,
        })
    }

    fn power_line(&self, id: usize, line: &LineSegment, transform: TransformInfo) -> PowerLine {
        let mut endpoints = line.endpoints();
        endpoints.sort_by(lexicographic);

        let fits = if self.config.curve_fits.is_empty() {
            Vec::new()
        } else {
            let (sorted, projections) = line.sorted_along_axis();
            let heights: Vec<f64> = sorted.iter().map(|p| p.z).collect();
            self.config
                .curve_fits
                .iter()
                .map(|&model| {
                    fit_model(model, &projections, &heights, self.config.catenary.max_iterations)
                })
                .collect()
        };

        PowerLine {
            id,
            cloud: line.cloud().clone(),
            span_length: line.span_length(),
            path_length: line.path_length(),
            direction: line.direction(),
            endpoints,
            fits,
            transform,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_is_rejected_at_build() {
        let config = ExtractorConfig {
            neighbor_radius: -1.0,
            ..Default::default()
        };
        assert!(matches!(config.build(), Err(ExtractionError::InvalidConfig(_))));
    }

    #[test]
    fn empty_and_non_finite_input() {
        let extractor = ExtractorConfig::default().build().unwrap();
        assert_eq!(
            extractor.extract(&PointCloud::new()).unwrap_err(),
            ExtractionError::EmptyInput
        );
        let cloud = PointCloud::from_points(vec![Point::new(0.0, f64::NAN, 1.0)]);
        assert!(matches!(
            extractor.extract(&cloud),
            Err(ExtractionError::InvalidInput(_))
        ));
    }

    #[test]
    fn endpoints_are_ordered_lexicographically() {
        let mut endpoints = [Point::new(5.0, 1.0, 0.0), Point::new(5.0, 0.0, 9.0)];
        endpoints.sort_by(lexicographic);
        assert_eq!(endpoints[0], Point::new(5.0, 0.0, 9.0));
    }

    #[test]
    fn timings_display_lists_every_stage() {
        let text = Timings::default().to_string();
        for stage in ["Height Filter", "Clustering", "Reconciliation", "Total", "Final Lines"] {
            assert!(text.contains(stage));
        }
    }
}
