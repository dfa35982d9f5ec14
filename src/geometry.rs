use nalgebra::{Matrix3, Matrix3xX, SymmetricEigen, Vector2};

use crate::prelude::*;

/// Axis returned for point sets that carry no direction.
pub const DEFAULT_AXIS: Vector = Vector::new(1.0, 0.0, 0.0);

/// Eigenvalues sorted descending with matching unit eigenvectors as columns.
#[derive(Debug, Clone, Copy)]
pub struct Eigen {
    pub values: [f64; 3],
    pub vectors: Matrix3<f64>,
}

impl Eigen {
    pub fn principal(&self) -> Vector {
        self.vectors.column(0).into_owned()
    }
}

pub fn centroid(points: &[Point]) -> Option<Point> {
    if points.is_empty() {
        return None;
    }
    let sum = points.iter().fold(Vector::zeros(), |acc, p| acc + p.coords);
    Some(Point::from(sum / points.len() as f64))
}

fn points_as_matrix(points: &[Point]) -> Matrix3xX<f64> {
    Matrix3xX::from_columns(bytemuck::cast_slice::<Point, Vector>(points))
}

/// Sample covariance of the centered points. `None` below two points.
pub fn covariance(points: &[Point]) -> Option<Matrix3<f64>> {
    if points.len() < 2 {
        return None;
    }
    let mut matrix = points_as_matrix(points);
    let mean = matrix.column_mean();
    for mut column in matrix.column_iter_mut() {
        column -= &mean;
    }
    Some(&matrix * matrix.transpose() / (points.len() - 1) as f64)
}

pub fn eigen_decomposition(covariance: Matrix3<f64>) -> Eigen {
    let eigen = SymmetricEigen::new(covariance);
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));
    let values = order.map(|i| eigen.eigenvalues[i].max(0.0));
    let vectors = Matrix3::from_columns(&order.map(|i| eigen.eigenvectors.column(i).into_owned()));
    Eigen { values, vectors }
}

/// `(λ1 - λ2) / λ1` for eigenvalues sorted descending, `0` when `λ1` is zero.
pub fn linearity(values: &[f64; 3]) -> f64 {
    let [l1, l2, _] = *values;
    if l1 > 0.0 { (l1 - l2) / l1 } else { 0.0 }
}

/// Linearity of a neighborhood, `0` below three points.
pub fn neighborhood_linearity(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    covariance(points)
        .map(|c| linearity(&eigen_decomposition(c).values))
        .unwrap_or(0.0)
}

/// Direction of largest variance.
///
/// Two points give their normalized connecting vector; fewer give [`DEFAULT_AXIS`].
pub fn principal_direction(points: &[Point]) -> Vector {
    match points {
        [] | [_] => DEFAULT_AXIS,
        [a, b] => (b - a).try_normalize(f64::EPSILON).unwrap_or(DEFAULT_AXIS),
        _ => covariance(points)
            .map(|c| eigen_decomposition(c).principal())
            .and_then(|d| d.try_normalize(f64::EPSILON))
            .unwrap_or(DEFAULT_AXIS),
    }
}

/// Orthonormal basis of the plane perpendicular to `normal`.
///
/// The first vector is built from the axis least aligned with `normal`.
pub fn plane_basis(normal: &Vector) -> (Vector, Vector) {
    let n = normal.try_normalize(f64::EPSILON).unwrap_or(DEFAULT_AXIS);
    let (ax, ay, az) = (n.x.abs(), n.y.abs(), n.z.abs());
    let v1 = if ax < ay && ax < az {
        Vector::new(0.0, -n.z, n.y)
    } else if ay < az {
        Vector::new(-n.z, 0.0, n.x)
    } else {
        Vector::new(-n.y, n.x, 0.0)
    };
    let v1 = v1.normalize();
    let v2 = n.cross(&v1);
    (v1, v2)
}

/// 2D coordinates of the points in the plane perpendicular to `normal`.
pub fn project_to_plane(points: &[Point], normal: &Vector) -> Vec<Vector2<f64>> {
    let (v1, v2) = plane_basis(normal);
    points
        .iter()
        .map(|p| Vector2::new(p.coords.dot(&v1), p.coords.dot(&v2)))
        .collect()
}

/// Signed projections of the points onto `direction`, measured from `origin`.
pub fn project_onto_axis(points: &[Point], origin: &Point, direction: &Vector) -> Vec<f64> {
    points.iter().map(|p| (p - origin).dot(direction)).collect()
}

/// Angle in radians between two undirected axes, in `[0, π/2]`.
pub fn axis_angle(a: &Vector, b: &Vector) -> f64 {
    let cos = a.dot(b).abs() / (a.norm() * b.norm());
    if cos.is_finite() { cos.min(1.0).acos() } else { 0.0 }
}

/// Distance from `point` to the infinite line through `origin` along `direction`.
pub fn distance_to_line(point: &Point, origin: &Point, direction: &Vector) -> f64 {
    let offset = point - origin;
    (offset - direction * offset.dot(direction)).norm()
}

/// Percentile with linear interpolation between closest ranks, `q` in `[0, 100]`.
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}
