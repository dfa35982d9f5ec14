//! Final length filter and the shared coordinate frame of one run.
//!
//! All lines of a run are shifted by one translation `[rx, ry, 0]` taken from
//! a global reference point; heights are never shifted. The translation is
//! verified after it is applied.

use serde::{Deserialize, Serialize};

use crate::cache::GeometryCache;
use crate::error::{ExtractionError, Result};
use crate::geometry::{centroid, principal_direction, project_onto_axis};
use crate::line::{LengthMethod, LineSegment};
use crate::prelude::*;

/// Round-trip and zeroing tolerance of the verification.
pub const TRANSFORM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferencePointMethod {
    #[default]
    #[serde(alias = "center")]
    Centroid,
    MinZ,
    MaxZ,
    /// Smallest projection onto the principal direction.
    Start,
    /// Largest projection onto the principal direction.
    End,
}

/// Which points `Start` and `End` are taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceScope {
    #[default]
    FirstLine,
    AllLines,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransformInfo {
    pub method: ReferencePointMethod,
    pub reference_point: Point,
    pub translation_vector: Vector,
}

impl TransformInfo {
    pub fn from_reference(method: ReferencePointMethod, reference_point: Point) -> Self {
        TransformInfo {
            method,
            reference_point,
            translation_vector: Vector::new(reference_point.x, reference_point.y, 0.0),
        }
    }

    /// The reference point in the new frame, `(0, 0, z)`.
    pub fn transformed_reference_point(&self) -> Point {
        self.reference_point - self.translation_vector
    }

    pub fn apply(&self, point: &Point) -> Point {
        point - self.translation_vector
    }

    pub fn invert(&self, point: &Point) -> Point {
        point + self.translation_vector
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LengthEntry {
    /// Position of the line in the filter's input.
    pub index: usize,
    pub length: f64,
    pub point_count: usize,
    pub kept: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LengthReport {
    pub method: LengthMethod,
    pub min_length: f64,
    pub min_points: usize,
    pub entries: Vec<LengthEntry>,
}

impl LengthReport {
    pub fn kept_count(&self) -> usize {
        self.entries.iter().filter(|e| e.kept).count()
    }

    pub fn removed_count(&self) -> usize {
        self.entries.len() - self.kept_count()
    }

    pub fn kept_lengths(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.iter().filter(|e| e.kept).map(|e| e.length)
    }
}

/// Drops lines shorter than `min_length` or with fewer than `min_points`
/// points, keeping the order of the rest.
pub fn filter_by_length(
    lines: Vec<LineSegment>,
    method: LengthMethod,
    min_length: f64,
    min_points: usize,
) -> (Vec<LineSegment>, LengthReport) {
    let mut entries = Vec::with_capacity(lines.len());
    let mut kept = Vec::new();
    for (index, line) in lines.into_iter().enumerate() {
        let length = line.length(method);
        let keep = length >= min_length && line.len() >= min_points;
        if !keep {
            log::debug!(
                "removed line {index}: {length:.2} m over {} points (minimum {min_length} m, {min_points} points)",
                line.len()
            );
        }
        entries.push(LengthEntry {
            index,
            length,
            point_count: line.len(),
            kept: keep,
        });
        if keep {
            kept.push(line);
        }
    }
    let report = LengthReport {
        method,
        min_length,
        min_points,
        entries,
    };
    log::info!(
        "length filter kept {} lines, removed {}",
        report.kept_count(),
        report.removed_count()
    );
    (kept, report)
}

/// First point with the largest `key`.
fn first_max_by(points: &[Point], key: impl Fn(&Point) -> f64) -> Option<Point> {
    points
        .iter()
        .copied()
        .reduce(|best, p| if key(&p) > key(&best) { p } else { best })
}

fn projection_extreme(points: &[Point], method: ReferencePointMethod) -> Option<Point> {
    let direction = principal_direction(points);
    let center = centroid(points)?;
    let projections = project_onto_axis(points, &center, &direction);
    let sign = if method == ReferencePointMethod::Start { -1.0 } else { 1.0 };
    let best = (0..points.len()).reduce(|best, i| {
        if sign * projections[i] > sign * projections[best] {
            i
        } else {
            best
        }
    })?;
    Some(points[best])
}

/// The global reference point of a set of lines, `None` when there are no
/// points.
pub fn reference_point(
    lines: &[LineSegment],
    method: ReferencePointMethod,
    scope: ReferenceScope,
) -> Option<Point> {
    let all_points: Vec<Point> = lines.iter().flat_map(|l| l.points().iter().copied()).collect();
    match method {
        ReferencePointMethod::Centroid => centroid(&all_points),
        ReferencePointMethod::MinZ => first_max_by(&all_points, |p| -p.z),
        ReferencePointMethod::MaxZ => first_max_by(&all_points, |p| p.z),
        ReferencePointMethod::Start | ReferencePointMethod::End => match scope {
            ReferenceScope::FirstLine => {
                projection_extreme(lines.iter().find(|l| !l.is_empty())?.points(), method)
            }
            ReferenceScope::AllLines => projection_extreme(&all_points, method),
        },
    }
}

/// Lines moved into the shared frame, each with the transform it carries.
#[derive(Debug, Clone)]
pub struct NormalizedLines {
    pub lines: Vec<LineSegment>,
    pub transforms: Vec<TransformInfo>,
}

/// Translates every line by the same `[rx, ry, 0]` and verifies the result.
///
/// Returns `Ok(None)` for an empty line set.
pub fn normalize(
    lines: &[LineSegment],
    method: ReferencePointMethod,
    scope: ReferenceScope,
    cache: &GeometryCache,
) -> Result<Option<NormalizedLines>> {
    let Some(reference) = reference_point(lines, method, scope) else {
        return Ok(None);
    };
    let transform = TransformInfo::from_reference(method, reference);
    log::debug!(
        "reference point ({:.3}, {:.3}, {:.3}) by {method:?}",
        reference.x,
        reference.y,
        reference.z
    );
    let normalized = NormalizedLines {
        lines: lines
            .iter()
            .map(|line| LineSegment::new(line.cloud().translated(&transform.translation_vector), cache))
            .collect(),
        transforms: vec![transform; lines.len()],
    };
    verify_transformation(lines, &normalized)?;
    Ok(Some(normalized))
}

/// Checks that every line shares one translation, that every point maps back
/// onto its original and that the reference point lands on `x = y = 0`.
pub fn verify_transformation(original: &[LineSegment], normalized: &NormalizedLines) -> Result<()> {
    let fail = |message: String| Err(ExtractionError::TransformVerification(message));
    if original.len() != normalized.lines.len() || original.len() != normalized.transforms.len() {
        return fail(format!(
            "{} original lines, {} transformed, {} transforms",
            original.len(),
            normalized.lines.len(),
            normalized.transforms.len()
        ));
    }
    let Some(first) = normalized.transforms.first() else {
        return Ok(());
    };
    for (index, ((before, after), transform)) in original
        .iter()
        .zip(&normalized.lines)
        .zip(&normalized.transforms)
        .enumerate()
    {
        if (transform.translation_vector - first.translation_vector).amax() > 0.0 {
            return fail(format!("line {index} uses a different translation vector"));
        }
        if before.len() != after.len() {
            return fail(format!("line {index} changed its point count"));
        }
        let round_trip_ok = before
            .points()
            .iter()
            .zip(after.points())
            .all(|(p, q)| (transform.invert(q) - p).amax() <= TRANSFORM_TOLERANCE);
        if !round_trip_ok {
            return fail(format!("line {index} does not map back onto its original points"));
        }
        let zeroed = transform.transformed_reference_point();
        if zeroed.x.abs() > TRANSFORM_TOLERANCE || zeroed.y.abs() > TRANSFORM_TOLERANCE {
            return fail(format!("line {index} reference point is not at x = y = 0"));
        }
    }
    Ok(())
}
