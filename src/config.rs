//! Parameters of one extraction run.
//!
//! The top-level fields mirror the record callers usually tune; the nested
//! structs group the knobs of individual stages. Defaults are tuned for
//! airborne scans of overhead lines.
//!
//! Everything is checked once by [`ExtractorConfig::validate`]; out-of-range
//! values are reported, never clamped.

use serde::{Deserialize, Serialize};

use crate::curve_fit::CurveModel;
use crate::error::{ExtractionError, Result};
use crate::line::LengthMethod;
use crate::normalize::{ReferencePointMethod, ReferenceScope};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Fixed linearity threshold, used unless `use_dynamic_params` is set.
    pub linearity_threshold: f64,
    /// Base neighbour search radius for the linearity score (metres).
    pub neighbor_radius: f64,
    /// Lower edge of the low-height band. `None` uses the 25th z-percentile.
    pub height_min: Option<f64>,
    /// Upper edge of the low-height band; only points above it are scored.
    /// `None` uses the 75th z-percentile.
    pub height_max: Option<f64>,
    pub cluster_eps: f64,
    pub cluster_min_samples: usize,
    pub min_line_points: usize,
    /// Minimum line length in metres, measured with `length_method`.
    pub min_line_length: f64,
    pub length_method: LengthMethod,
    pub reference_point_method: ReferencePointMethod,
    pub reference_scope: ReferenceScope,
    /// Enables the roughness-adaptive radius and the percentile threshold.
    pub use_dynamic_params: bool,
    pub dynamic: DynamicParams,
    pub sampling: SamplingParams,
    pub separation: SeparationParams,
    pub segmentation: SegmentationParams,
    pub catenary: CatenaryParams,
    pub reconcile: ReconcileParams,
    /// Curve models fitted to every final line.
    pub curve_fits: Vec<CurveModel>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            linearity_threshold: 0.81,
            neighbor_radius: 1.5,
            height_min: None,
            height_max: None,
            cluster_eps: 1.5,
            cluster_min_samples: 5,
            min_line_points: 30,
            min_line_length: 10.0,
            length_method: LengthMethod::Span,
            reference_point_method: ReferencePointMethod::Centroid,
            reference_scope: ReferenceScope::FirstLine,
            use_dynamic_params: false,
            dynamic: DynamicParams::default(),
            sampling: SamplingParams::default(),
            separation: SeparationParams::default(),
            segmentation: SegmentationParams::default(),
            catenary: CatenaryParams::default(),
            reconcile: ReconcileParams::default(),
            curve_fits: vec![CurveModel::Catenary],
        }
    }
}

/// Percentile threshold and roughness-adaptive radius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicParams {
    /// Percentile of the non-zero linearity scores used as threshold.
    pub threshold_percentile: f64,
    pub min_threshold: f64,
    pub max_threshold: f64,
    pub min_radius: f64,
    pub max_radius: f64,
    /// Neighbour z-range above which the radius shrinks.
    pub rough_z_range: f64,
    /// Neighbour z-range below which the radius grows.
    pub flat_z_range: f64,
}

impl Default for DynamicParams {
    fn default() -> Self {
        Self {
            threshold_percentile: 90.0,
            min_threshold: 0.6,
            max_threshold: 0.9,
            min_radius: 0.8,
            max_radius: 3.0,
            rough_z_range: 5.0,
            flat_z_range: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    pub enabled: bool,
    /// Clouds larger than this are scored on a strided subset.
    pub size_threshold: usize,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            enabled: true,
            size_threshold: 8000,
        }
    }
}

/// Re-clustering in the plane orthogonal to a cluster's principal direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparationParams {
    pub eps: f64,
    pub min_samples: usize,
    /// Clusters smaller than this are passed through unsplit.
    pub min_cluster_points: usize,
}

impl Default for SeparationParams {
    fn default() -> Self {
        Self {
            eps: 0.5,
            min_samples: 5,
            min_cluster_points: 10,
        }
    }
}

/// Peak splitting of the height profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationParams {
    pub prominence: f64,
    pub min_segment_points: usize,
    pub smooth: bool,
    /// Savitzky-Golay window length, odd.
    pub window_size: usize,
    pub poly_order: usize,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            prominence: 0.5,
            min_segment_points: 20,
            smooth: true,
            window_size: 15,
            poly_order: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatenaryParams {
    pub max_rmse: f64,
    pub max_iterations: usize,
}

impl Default for CatenaryParams {
    fn default() -> Self {
        Self {
            max_rmse: 0.5,
            max_iterations: 200,
        }
    }
}

/// Thresholds of one collinearity merge pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollinearParams {
    /// Largest distance between the closest endpoints (metres).
    pub max_gap: f64,
    /// Largest angle between principal directions (degrees).
    pub max_angle_deg: f64,
    /// Largest lateral offset between the two lines (metres). `None` turns
    /// the check off.
    pub max_lateral_offset: Option<f64>,
}

impl Default for CollinearParams {
    fn default() -> Self {
        Self {
            max_gap: 50.0,
            max_angle_deg: 15.0,
            max_lateral_offset: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileParams {
    pub enabled: bool,
    pub collinear: CollinearParams,
    pub strict: CollinearParams,
    /// Partner search distance for short segments. `None` uses the minimum
    /// line length.
    pub absorb_max_gap: Option<f64>,
    /// Upper bound on rounds of every merge loop.
    pub max_rounds: usize,
}

impl Default for ReconcileParams {
    fn default() -> Self {
        Self {
            enabled: true,
            collinear: CollinearParams::default(),
            strict: CollinearParams {
                max_gap: 10.0,
                max_angle_deg: 5.0,
                max_lateral_offset: None,
            },
            absorb_max_gap: None,
            max_rounds: 64,
        }
    }
}

pub(crate) fn invalid(message: impl Into<String>) -> ExtractionError {
    ExtractionError::InvalidConfig(message.into())
}

pub(crate) fn check_positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be a positive finite number, got {value}")))
    }
}

fn check_non_negative(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be a non-negative finite number, got {value}")))
    }
}

fn check_unit_interval(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(format!("{name} must lie in [0, 1], got {value}")))
    }
}

pub(crate) fn check_at_least_one(name: &str, value: usize) -> Result<()> {
    if value >= 1 {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be at least 1")))
    }
}

impl CollinearParams {
    fn validate(&self, pass: &str) -> Result<()> {
        check_non_negative(&format!("{pass}.max_gap"), self.max_gap)?;
        if let Some(offset) = self.max_lateral_offset {
            check_non_negative(&format!("{pass}.max_lateral_offset"), offset)?;
        }
        if !(self.max_angle_deg > 0.0 && self.max_angle_deg <= 90.0) {
            return Err(invalid(format!(
                "{pass}.max_angle_deg must lie in (0, 90], got {}",
                self.max_angle_deg
            )));
        }
        Ok(())
    }
}

impl ExtractorConfig {
    pub fn validate(&self) -> Result<()> {
        check_unit_interval("linearity_threshold", self.linearity_threshold)?;
        check_positive("neighbor_radius", self.neighbor_radius)?;
        for (name, value) in [("height_min", self.height_min), ("height_max", self.height_max)] {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(invalid(format!("{name} must be finite, got {v}")));
                }
            }
        }
        if let (Some(min), Some(max)) = (self.height_min, self.height_max) {
            if min > max {
                return Err(invalid(format!("height_min ({min}) exceeds height_max ({max})")));
            }
        }
        check_positive("cluster_eps", self.cluster_eps)?;
        check_at_least_one("cluster_min_samples", self.cluster_min_samples)?;
        check_non_negative("min_line_length", self.min_line_length)?;

        let dynamic = &self.dynamic;
        if !(0.0..=100.0).contains(&dynamic.threshold_percentile) {
            return Err(invalid("dynamic.threshold_percentile must lie in [0, 100]"));
        }
        check_unit_interval("dynamic.min_threshold", dynamic.min_threshold)?;
        check_unit_interval("dynamic.max_threshold", dynamic.max_threshold)?;
        if dynamic.min_threshold > dynamic.max_threshold {
            return Err(invalid("dynamic.min_threshold exceeds dynamic.max_threshold"));
        }
        check_positive("dynamic.min_radius", dynamic.min_radius)?;
        check_positive("dynamic.max_radius", dynamic.max_radius)?;
        if dynamic.min_radius > dynamic.max_radius {
            return Err(invalid("dynamic.min_radius exceeds dynamic.max_radius"));
        }
        check_non_negative("dynamic.rough_z_range", dynamic.rough_z_range)?;
        check_non_negative("dynamic.flat_z_range", dynamic.flat_z_range)?;
        if dynamic.flat_z_range > dynamic.rough_z_range {
            return Err(invalid("dynamic.flat_z_range exceeds dynamic.rough_z_range"));
        }

        check_at_least_one("sampling.size_threshold", self.sampling.size_threshold)?;

        check_positive("separation.eps", self.separation.eps)?;
        check_at_least_one("separation.min_samples", self.separation.min_samples)?;

        let segmentation = &self.segmentation;
        check_non_negative("segmentation.prominence", segmentation.prominence)?;
        check_at_least_one("segmentation.min_segment_points", segmentation.min_segment_points)?;
        if segmentation.window_size % 2 == 0 {
            return Err(invalid("segmentation.window_size must be odd"));
        }
        if segmentation.poly_order >= segmentation.window_size {
            return Err(invalid(
                "segmentation.poly_order must be smaller than segmentation.window_size",
            ));
        }

        check_positive("catenary.max_rmse", self.catenary.max_rmse)?;
        check_at_least_one("catenary.max_iterations", self.catenary.max_iterations)?;

        let reconcile = &self.reconcile;
        reconcile.collinear.validate("reconcile.collinear")?;
        reconcile.strict.validate("reconcile.strict")?;
        if let Some(gap) = reconcile.absorb_max_gap {
            check_non_negative("reconcile.absorb_max_gap", gap)?;
        }
        check_at_least_one("reconcile.max_rounds", reconcile.max_rounds)?;

        for model in &self.curve_fits {
            if let CurveModel::Polynomial { degree } = model {
                if *degree == 0 {
                    return Err(invalid("polynomial curve fits need a degree of at least 1"));
                }
            }
        }
        Ok(())
    }

    /// Partner search distance used by short-segment absorption.
    pub fn absorb_max_gap(&self) -> f64 {
        self.reconcile.absorb_max_gap.unwrap_or(self.min_line_length)
    }
}
