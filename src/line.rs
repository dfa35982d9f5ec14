//! Line candidates and their derived geometry.

use serde::{Deserialize, Serialize};

use crate::cache::GeometryCache;
use crate::geometry::{axis_angle, centroid, distance_to_line, principal_direction, project_onto_axis};
use crate::point_cloud::PointCloud;
use crate::prelude::*;

/// How the length of a line is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthMethod {
    /// Extent of the projections onto the principal direction.
    #[default]
    Span,
    /// Sum of consecutive gaps after sorting by projection.
    Path,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LineGeometry {
    /// Unit principal direction.
    pub direction: Vector,
    pub centroid: Point,
    /// Point with the smallest projection onto `direction`.
    pub start: Point,
    /// Point with the largest projection onto `direction`.
    pub end: Point,
    pub span_length: f64,
    pub path_length: f64,
}

impl LineGeometry {
    pub fn compute(points: &[Point]) -> LineGeometry {
        let direction = principal_direction(points);
        let Some(center) = centroid(points) else {
            return LineGeometry {
                direction,
                centroid: Point::origin(),
                start: Point::origin(),
                end: Point::origin(),
                span_length: 0.0,
                path_length: 0.0,
            };
        };
        let projections = project_onto_axis(points, &center, &direction);
        let mut order: Vec<usize> = (0..points.len()).collect();
        order.sort_by(|&a, &b| projections[a].total_cmp(&projections[b]));

        let first = order[0];
        let last = order[order.len() - 1];
        let path_length = order
            .windows(2)
            .map(|pair| (points[pair[1]] - points[pair[0]]).norm())
            .sum();

        LineGeometry {
            direction,
            centroid: center,
            start: points[first],
            end: points[last],
            span_length: projections[last] - projections[first],
            path_length,
        }
    }

    pub fn length(&self, method: LengthMethod) -> f64 {
        match method {
            LengthMethod::Span => self.span_length,
            LengthMethod::Path => self.path_length,
        }
    }
}

/// A point set believed to belong to one cable, with its cached geometry.
#[derive(Debug, Clone)]
pub struct LineSegment {
    cloud: PointCloud,
    geometry: LineGeometry,
}

impl LineSegment {
    pub fn new(cloud: PointCloud, cache: &GeometryCache) -> Self {
        let geometry = cache.line_geometry(&cloud);
        LineSegment { cloud, geometry }
    }

    pub fn cloud(&self) -> &PointCloud {
        &self.cloud
    }

    pub fn points(&self) -> &[Point] {
        self.cloud.points()
    }

    pub fn len(&self) -> usize {
        self.cloud.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cloud.is_empty()
    }

    pub fn geometry(&self) -> &LineGeometry {
        &self.geometry
    }

    pub fn direction(&self) -> Vector {
        self.geometry.direction
    }

    pub fn endpoints(&self) -> [Point; 2] {
        [self.geometry.start, self.geometry.end]
    }

    pub fn span_length(&self) -> f64 {
        self.geometry.span_length
    }

    pub fn path_length(&self) -> f64 {
        self.geometry.path_length
    }

    pub fn length(&self, method: LengthMethod) -> f64 {
        self.geometry.length(method)
    }

    /// Points sorted along the principal direction with their projections
    /// measured from the centroid.
    pub fn sorted_along_axis(&self) -> (Vec<Point>, Vec<f64>) {
        let points = self.points();
        let projections =
            project_onto_axis(points, &self.geometry.centroid, &self.geometry.direction);
        let mut order: Vec<usize> = (0..points.len()).collect();
        order.sort_by(|&a, &b| projections[a].total_cmp(&projections[b]));
        (
            order.iter().map(|&i| points[i]).collect(),
            order.iter().map(|&i| projections[i]).collect(),
        )
    }

    /// Smallest distance between any endpoint of `self` and any endpoint of `other`.
    pub fn endpoint_distance(&self, other: &LineSegment) -> f64 {
        let mut best = f64::INFINITY;
        for a in self.endpoints() {
            for b in other.endpoints() {
                best = best.min((a - b).norm());
            }
        }
        best
    }

    /// Angle in radians between the two principal directions.
    pub fn angle_to(&self, other: &LineSegment) -> f64 {
        axis_angle(&self.geometry.direction, &other.geometry.direction)
    }

    /// Lateral distance between the closest endpoint pair, measured against
    /// both infinite lines; the smaller of the two is returned.
    pub fn lateral_offset(&self, other: &LineSegment) -> f64 {
        let (mine, theirs) = self.closest_endpoints(other);
        let to_other = distance_to_line(&mine, &other.geometry.centroid, &other.geometry.direction);
        let to_self = distance_to_line(&theirs, &self.geometry.centroid, &self.geometry.direction);
        to_other.min(to_self)
    }

    fn closest_endpoints(&self, other: &LineSegment) -> (Point, Point) {
        let mut best = (self.geometry.start, other.geometry.start);
        let mut best_distance = f64::INFINITY;
        for a in self.endpoints() {
            for b in other.endpoints() {
                let d = (a - b).norm();
                if d < best_distance {
                    best_distance = d;
                    best = (a, b);
                }
            }
        }
        best
    }

    /// Point-set union of both segments.
    pub fn merged(&self, other: &LineSegment, cache: &GeometryCache) -> LineSegment {
        LineSegment::new(PointCloud::concat([&self.cloud, &other.cloud]), cache)
    }

    /// Point-set union of many segments, in the given order.
    pub fn merge_all<'a>(
        segments: impl IntoIterator<Item = &'a LineSegment>,
        cache: &GeometryCache,
    ) -> LineSegment {
        LineSegment::new(PointCloud::concat(segments.into_iter().map(|s| &s.cloud)), cache)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn straight(from: f64, to: f64, y: f64, count: usize) -> PointCloud {
        PointCloud::from_points(
            (0..count)
                .map(|i| {
                    let t = from + (to - from) * i as f64 / (count - 1) as f64;
                    Point::new(t, y, 10.0)
                })
                .collect(),
        )
    }

    #[test]
    fn span_and_path_agree_on_straight_lines() {
        let cache = GeometryCache::new();
        let segment = LineSegment::new(straight(0.0, 20.0, 0.0, 41), &cache);
        assert_relative_eq!(segment.span_length(), 20.0, epsilon = 1e-9);
        assert_relative_eq!(segment.path_length(), 20.0, epsilon = 1e-9);
        assert_relative_eq!(segment.direction().x.abs(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn path_exceeds_span_on_zigzag() {
        let cache = GeometryCache::new();
        let points = (0..21)
            .map(|i| Point::new(i as f64, if i % 2 == 0 { 0.0 } else { 0.5 }, 0.0))
            .collect();
        let segment = LineSegment::new(PointCloud::from_points(points), &cache);
        assert!(segment.path_length() > segment.span_length());
    }

    #[test]
    fn degenerate_segments_have_zero_length() {
        let cache = GeometryCache::new();
        let single = LineSegment::new(PointCloud::from_points(vec![Point::new(1.0, 2.0, 3.0)]), &cache);
        assert_eq!(single.span_length(), 0.0);
        assert_eq!(single.path_length(), 0.0);
        let empty = LineSegment::new(PointCloud::new(), &cache);
        assert_eq!(empty.length(LengthMethod::Path), 0.0);
    }

    #[test]
    fn pairwise_relations() {
        let cache = GeometryCache::new();
        let a = LineSegment::new(straight(0.0, 20.0, 0.0, 41), &cache);
        let b = LineSegment::new(straight(21.5, 41.5, 0.0, 41), &cache);
        let parallel = LineSegment::new(straight(0.0, 20.0, 3.0, 41), &cache);

        assert_relative_eq!(a.endpoint_distance(&b), 1.5, epsilon = 1e-9);
        assert_relative_eq!(a.angle_to(&b), 0.0, epsilon = 1e-6);
        assert_relative_eq!(a.lateral_offset(&b), 0.0, epsilon = 1e-6);
        assert_relative_eq!(a.lateral_offset(&parallel), 3.0, epsilon = 1e-6);

        let merged = a.merged(&b, &cache);
        assert_eq!(merged.len(), 82);
        assert_relative_eq!(merged.span_length(), 41.5, epsilon = 1e-6);
    }

    #[test]
    fn sorted_along_axis_is_monotonic() {
        let cache = GeometryCache::new();
        let mut points: Vec<Point> = (0..30).map(|i| Point::new(i as f64, 0.0, 0.0)).collect();
        points.reverse();
        points.swap(3, 17);
        let segment = LineSegment::new(PointCloud::from_points(points), &cache);
        let (_, projections) = segment.sorted_along_axis();
        assert!(projections.windows(2).all(|w| w[0] <= w[1]));
    }
}
