use rayon::prelude::*;
use serde::Serialize;

use crate::cache::GeometryCache;
use crate::config::{CatenaryParams, SegmentationParams};
use crate::curve_fit::{CurveFit, fit_catenary};
use crate::error::FitError;
use crate::line::LineSegment;
use crate::segmentation::{ProfileSegment, split_line};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Verdict {
    Accepted { rmse: f64 },
    /// Fit succeeded but the RMSE reached the limit.
    Rejected { rmse: f64 },
    Failed(FitError),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted { .. })
    }
}

pub fn judge(fit: &Result<CurveFit, FitError>, params: &CatenaryParams) -> Verdict {
    match fit {
        Ok(fit) if fit.rmse < params.max_rmse => Verdict::Accepted { rmse: fit.rmse },
        Ok(fit) => Verdict::Rejected { rmse: fit.rmse },
        Err(err) => Verdict::Failed(*err),
    }
}

/// A line after segmentation and validation.
#[derive(Debug, Clone)]
pub struct ValidatedSegment {
    pub segment: LineSegment,
    /// Accepted catenary of a split piece; `None` for lines that were not
    /// split and for parents kept after every piece was rejected.
    pub catenary: Option<CurveFit>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ValidationSummary {
    pub unsplit: usize,
    pub accepted: usize,
    pub rejected: usize,
    /// Parents kept because none of their pieces was accepted.
    pub fallbacks: usize,
}

impl std::ops::AddAssign for ValidationSummary {
    fn add_assign(&mut self, other: Self) {
        self.unsplit += other.unsplit;
        self.accepted += other.accepted;
        self.rejected += other.rejected;
        self.fallbacks += other.fallbacks;
    }
}

/// Keeps the pieces whose catenary fit is good enough, or the parent when
/// none is.
pub fn validate_pieces(
    parent: &LineSegment,
    pieces: Vec<ProfileSegment>,
    params: &CatenaryParams,
) -> (Vec<ValidatedSegment>, ValidationSummary) {
    let mut summary = ValidationSummary::default();
    let mut kept = Vec::new();
    for (index, piece) in pieces.into_iter().enumerate() {
        let fit = fit_catenary(&piece.projections, &piece.heights, params.max_iterations);
        let verdict = judge(&fit, params);
        log::debug!("segment {index} of {} points: {verdict:?}", piece.segment.len());
        match fit {
            Ok(fit) if verdict.is_accepted() => {
                summary.accepted += 1;
                kept.push(ValidatedSegment {
                    segment: piece.segment,
                    catenary: Some(fit),
                });
            }
            _ => summary.rejected += 1,
        }
    }
    if kept.is_empty() {
        summary.fallbacks += 1;
        kept.push(ValidatedSegment {
            segment: parent.clone(),
            catenary: None,
        });
    }
    (kept, summary)
}

/// Peak splitting followed by catenary validation of the pieces.
pub fn segment_line(
    line: &LineSegment,
    segmentation: &SegmentationParams,
    catenary: &CatenaryParams,
    cache: &GeometryCache,
) -> (Vec<ValidatedSegment>, ValidationSummary) {
    match split_line(line, segmentation, cache) {
        Some(pieces) => validate_pieces(line, pieces, catenary),
        None => (
            vec![ValidatedSegment {
                segment: line.clone(),
                catenary: None,
            }],
            ValidationSummary {
                unsplit: 1,
                ..Default::default()
            },
        ),
    }
}

/// [`segment_line`] over every line, keeping input order.
pub fn segment_all(
    lines: &[LineSegment],
    segmentation: &SegmentationParams,
    catenary: &CatenaryParams,
    cache: &GeometryCache,
) -> (Vec<ValidatedSegment>, ValidationSummary) {
    let results: Vec<_> = lines
        .par_iter()
        .map(|line| segment_line(line, segmentation, catenary, cache))
        .collect();
    let mut summary = ValidationSummary::default();
    let mut segments = Vec::new();
    for (kept, line_summary) in results {
        summary += line_summary;
        segments.extend(kept);
    }
    (segments, summary)
}

#[cfg(test)]
mod tests {
    use all_asserts::assert_lt;

    use super::*;
    use crate::point_cloud::PointCloud;
    use crate::prelude::*;

    fn line(profile: impl Fn(f64) -> f64, length: f64, count: usize) -> LineSegment {
        let points = (0..count)
            .map(|i| {
                let x = length * i as f64 / (count - 1) as f64;
                Point::new(x, 0.0, profile(x))
            })
            .collect();
        LineSegment::new(PointCloud::from_points(points), &GeometryCache::new())
    }

    #[test]
    fn catenary_spans_are_accepted() {
        let cache = GeometryCache::new();
        let parent = line(
            |x| {
                let centre = if x < 100.0 { 50.0 } else { 150.0 };
                150.0 * ((x - centre) / 150.0).cosh() - 120.0
            },
            200.0,
            401,
        );
        let (segments, summary) = segment_line(
            &parent,
            &SegmentationParams::default(),
            &CatenaryParams::default(),
            &cache,
        );
        assert_eq!(segments.len(), 2);
        assert_eq!(summary.accepted, 2);
        for segment in &segments {
            let fit = segment.catenary.as_ref().unwrap();
            assert_lt!(fit.rmse, CatenaryParams::default().max_rmse);
        }
    }

    #[test]
    fn rejected_pieces_fall_back_to_the_parent() {
        let cache = GeometryCache::new();
        // two steep parabolic humps meeting at x = 50: neither half is a catenary
        let parent = line(
            |x| {
                let centre = if x < 50.0 { 25.0 } else { 75.0 };
                0.1 * (x - centre).powi(2)
            },
            100.0,
            401,
        );
        let (segments, summary) = segment_line(
            &parent,
            &SegmentationParams::default(),
            &CatenaryParams::default(),
            &cache,
        );
        assert_eq!(summary.accepted, 0);
        assert_eq!(summary.rejected, 2);
        assert_eq!(summary.fallbacks, 1);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].segment.len(), 401);
        assert!(segments[0].catenary.is_none());
    }

    #[test]
    fn unsplit_lines_carry_no_fit() {
        let cache = GeometryCache::new();
        let flat = line(|_| 20.0, 50.0, 100);
        let (segments, summary) = segment_all(
            &[flat.clone(), flat],
            &SegmentationParams::default(),
            &CatenaryParams::default(),
            &cache,
        );
        assert_eq!(segments.len(), 2);
        assert_eq!(summary.unsplit, 2);
        assert!(segments.iter().all(|s| s.catenary.is_none()));
    }

    #[test]
    fn verdicts() {
        let params = CatenaryParams::default();
        assert_eq!(judge(&Err(FitError::Singular), &params), Verdict::Failed(FitError::Singular));
        assert!(!judge(&Err(FitError::NonFinite), &params).is_accepted());
    }
}
