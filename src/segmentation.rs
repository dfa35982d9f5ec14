//! Longitudinal splitting of line candidates at height peaks.
//!
//! Along a cable the height profile rises towards every support tower, so
//! the sorted profile is smoothed and split at its prominent local maxima.

use std::ops::Range;

use nalgebra::DMatrix;

use crate::cache::GeometryCache;
use crate::config::SegmentationParams;
use crate::line::LineSegment;
use crate::point_cloud::PointCloud;

/// A piece of a split line with its height profile.
#[derive(Debug, Clone)]
pub struct ProfileSegment {
    pub segment: LineSegment,
    /// Projections onto the parent's principal direction, shifted to start at 0.
    pub projections: Vec<f64>,
    pub heights: Vec<f64>,
}

/// Savitzky-Golay least-squares projection matrix, `(order + 1) × window`.
///
/// Row `j` maps a window of samples to the coefficient of `tʲ` of the
/// polynomial fitted around the window centre.
fn savgol_projection(window: usize, order: usize) -> Option<DMatrix<f64>> {
    let half = (window / 2) as f64;
    let vandermonde = DMatrix::from_fn(window, order + 1, |row, col| {
        (row as f64 - half).powi(col as i32)
    });
    let normal = vandermonde.transpose() * &vandermonde;
    normal
        .try_inverse()
        .map(|inverse| inverse * vandermonde.transpose())
}

fn polynomial_at(coefficients: &[f64], t: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, c| acc * t + c)
}

/// Savitzky-Golay smoothing with polynomial interpolation at both edges.
///
/// Sequences not longer than the window are returned unchanged.
pub fn savgol_filter(values: &[f64], window: usize, order: usize) -> Vec<f64> {
    let n = values.len();
    if n <= window || window <= order || window % 2 == 0 {
        return values.to_vec();
    }
    let Some(projection) = savgol_projection(window, order) else {
        return values.to_vec();
    };
    let half = window / 2;
    let centre = projection.row(0);

    let mut smoothed = vec![0.0; n];
    for i in half..n - half {
        smoothed[i] = values[i - half..=i + half]
            .iter()
            .zip(centre.iter())
            .map(|(v, w)| v * w)
            .sum();
    }

    let fit_window = |start: usize| -> Vec<f64> {
        (0..=order)
            .map(|row| {
                projection
                    .row(row)
                    .iter()
                    .zip(&values[start..start + window])
                    .map(|(w, v)| w * v)
                    .sum()
            })
            .collect()
    };
    let head = fit_window(0);
    for (i, value) in smoothed.iter_mut().enumerate().take(half) {
        *value = polynomial_at(&head, i as f64 - half as f64);
    }
    let tail = fit_window(n - window);
    for i in n - half..n {
        smoothed[i] = polynomial_at(&tail, (i + window - n) as f64 - half as f64);
    }
    smoothed
}

/// Strict local maxima; a flat top is reported at its middle sample and the
/// first and last samples are never maxima.
fn local_maxima(values: &[f64]) -> Vec<usize> {
    let mut maxima = Vec::new();
    if values.len() < 3 {
        return maxima;
    }
    let last = values.len() - 1;
    let mut i = 1;
    while i < last {
        if values[i - 1] < values[i] {
            let mut ahead = i + 1;
            while ahead < last && values[ahead] == values[i] {
                ahead += 1;
            }
            if values[ahead] < values[i] {
                maxima.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    maxima
}

/// Height of a peak above the higher of its two bases.
pub fn peak_prominence(values: &[f64], peak: usize) -> f64 {
    let height = values[peak];
    let left_min = values[..=peak]
        .iter()
        .rev()
        .take_while(|&&v| v <= height)
        .fold(height, |m, &v| m.min(v));
    let right_min = values[peak..]
        .iter()
        .take_while(|&&v| v <= height)
        .fold(height, |m, &v| m.min(v));
    height - left_min.max(right_min)
}

/// Indices of local maxima whose prominence is at least `min_prominence`.
pub fn find_peaks(values: &[f64], min_prominence: f64) -> Vec<usize> {
    local_maxima(values)
        .into_iter()
        .filter(|&peak| peak_prominence(values, peak) >= min_prominence)
        .collect()
}

/// Sample ranges between consecutive peaks. The peak sample closes the
/// segment on its left; ranges with `min_points` samples or fewer are dropped.
pub fn split_ranges(len: usize, peaks: &[usize], min_points: usize) -> Vec<Range<usize>> {
    let mut bounds = Vec::with_capacity(peaks.len() + 2);
    bounds.push(0);
    bounds.extend(peaks.iter().map(|&p| p + 1));
    bounds.push(len);
    bounds
        .windows(2)
        .map(|pair| pair[0]..pair[1])
        .filter(|range| range.len() > min_points)
        .collect()
}

/// Splits `line` at the prominent peaks of its height profile.
///
/// Returns `None` when the line is too short to split or has no peak, in
/// which case it passes through unchanged.
pub fn split_line(
    line: &LineSegment,
    params: &SegmentationParams,
    cache: &GeometryCache,
) -> Option<Vec<ProfileSegment>> {
    if line.len() < 2 * params.min_segment_points {
        return None;
    }
    let (sorted, projections) = line.sorted_along_axis();
    let heights: Vec<f64> = sorted.iter().map(|p| p.z).collect();
    let profile = if params.smooth {
        savgol_filter(&heights, params.window_size, params.poly_order)
    } else {
        heights.clone()
    };
    let peaks = find_peaks(&profile, params.prominence);
    if peaks.is_empty() {
        return None;
    }
    log::debug!("line of {} points has {} height peaks", line.len(), peaks.len());

    let pieces = split_ranges(sorted.len(), &peaks, params.min_segment_points)
        .into_iter()
        .map(|range| {
            let origin = projections[range.start];
            ProfileSegment {
                segment: LineSegment::new(PointCloud::from_points(sorted[range.clone()].to_vec()), cache),
                projections: projections[range.clone()].iter().map(|p| p - origin).collect(),
                heights: heights[range].to_vec(),
            }
        })
        .collect();
    Some(pieces)
}
