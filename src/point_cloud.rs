use std::sync::Arc;

use serde::Serialize;

use crate::error::{ExtractionError, Result};
use crate::prelude::*;

/// Immutable, cheaply clonable point collection.
///
/// Coordinates live in a shared buffer; every transformation builds a new
/// cloud instead of editing this one.
#[derive(Clone, Debug, Serialize)]
pub struct PointCloud {
    points: Arc<[Point]>,
    colors: Option<Arc<[Color]>>,
}

impl Default for PointCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl PointCloud {
    pub fn new() -> Self {
        PointCloud {
            points: Arc::from(Vec::new()),
            colors: None,
        }
    }

    pub fn from_points(points: Vec<Point>) -> Self {
        PointCloud {
            points: points.into(),
            colors: None,
        }
    }

    pub fn with_colors(points: Vec<Point>, colors: Vec<Color>) -> Result<Self> {
        if points.len() != colors.len() {
            return Err(ExtractionError::InvalidInput(format!(
                "{} points but {} colors",
                points.len(),
                colors.len()
            )));
        }
        Ok(PointCloud {
            points: points.into(),
            colors: Some(colors.into()),
        })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn colors(&self) -> Option<&[Color]> {
        self.colors.as_deref()
    }

    /// The shared coordinate buffer, used as the identity of this point set.
    pub fn shared_points(&self) -> &Arc<[Point]> {
        &self.points
    }

    pub fn select_by_index(&self, indices: &[usize]) -> PointCloud {
        PointCloud {
            points: indices.iter().map(|&i| self.points[i]).collect(),
            colors: self
                .colors
                .as_ref()
                .map(|colors| indices.iter().map(|&i| colors[i]).collect()),
        }
    }

    /// Splits the cloud into the points matching `keep` and the rest.
    pub fn partition(&self, mut keep: impl FnMut(usize, &Point) -> bool) -> (PointCloud, PointCloud) {
        let (selected, rest): (Vec<usize>, Vec<usize>) =
            (0..self.len()).partition(|&i| keep(i, &self.points[i]));
        (self.select_by_index(&selected), self.select_by_index(&rest))
    }

    /// Concatenates clouds in order. Colors survive only when every input has them.
    pub fn concat<'a>(clouds: impl IntoIterator<Item = &'a PointCloud>) -> PointCloud {
        let clouds: Vec<&PointCloud> = clouds.into_iter().collect();
        let points: Vec<Point> = clouds
            .iter()
            .flat_map(|c| c.points.iter().copied())
            .collect();
        let colors = clouds
            .iter()
            .map(|c| c.colors.as_deref())
            .collect::<Option<Vec<_>>>()
            .map(|all| all.concat().into());
        PointCloud {
            points: points.into(),
            colors,
        }
    }

    /// A new cloud with every point moved by `-offset`.
    pub fn translated(&self, offset: &Vector) -> PointCloud {
        PointCloud {
            points: self.points.iter().map(|p| p - offset).collect(),
            colors: self.colors.clone(),
        }
    }

    pub fn z_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.z)
    }
}

impl From<Vec<Point>> for PointCloud {
    fn from(points: Vec<Point>) -> Self {
        PointCloud::from_points(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PointCloud {
        PointCloud::with_colors(
            vec![
                Point::new(0.0, 0.0, 0.0),
                Point::new(1.0, 0.0, 5.0),
                Point::new(2.0, 0.0, 10.0),
            ],
            vec![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        )
        .unwrap()
    }

    #[test]
    fn color_length_mismatch_is_rejected() {
        let err = PointCloud::with_colors(vec![Point::origin()], vec![]).unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidInput(_)));
    }

    #[test]
    fn partition_keeps_colors_aligned() {
        let cloud = sample();
        let (high, low) = cloud.partition(|_, p| p.z > 4.0);
        assert_eq!(high.len(), 2);
        assert_eq!(low.len(), 1);
        assert_eq!(high.colors().unwrap()[0], [0.0, 1.0, 0.0]);
        assert_eq!(low.colors().unwrap()[0], [1.0, 0.0, 0.0]);
        // the source is untouched
        assert_eq!(cloud.len(), 3);
    }

    #[test]
    fn concat_drops_colors_when_any_input_lacks_them() {
        let colored = sample();
        let plain = PointCloud::from_points(vec![Point::new(9.0, 9.0, 9.0)]);
        let both = PointCloud::concat([&colored, &colored]);
        assert_eq!(both.len(), 6);
        assert_eq!(both.colors().map(<[_]>::len), Some(6));
        let mixed = PointCloud::concat([&colored, &plain]);
        assert_eq!(mixed.len(), 4);
        assert!(mixed.colors().is_none());
    }

    #[test]
    fn translated_builds_new_buffer() {
        let cloud = sample();
        let moved = cloud.translated(&Vector::new(1.0, 0.0, 0.0));
        assert_eq!(moved.points()[0], Point::new(-1.0, 0.0, 0.0));
        assert_eq!(cloud.points()[0], Point::origin());
        assert!(!Arc::ptr_eq(cloud.shared_points(), moved.shared_points()));
    }
}
