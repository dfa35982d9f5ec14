use powerline_extractor::config::{CollinearParams, ReconcileParams};
use powerline_extractor::prelude::*;
use powerline_extractor::{ExtractorConfig, PowerLineExtractor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

pub fn seeded(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

fn jitter(rng: &mut StdRng, sigma: f64) -> Vector {
    Vector::new(
        sigma * rng.sample::<f64, _>(StandardNormal),
        sigma * rng.sample::<f64, _>(StandardNormal),
        sigma * rng.sample::<f64, _>(StandardNormal),
    )
}

/// `count` evenly spaced samples of the segment `from`-`to` with Gaussian noise.
pub fn straight_line(rng: &mut StdRng, from: Point, to: Point, count: usize, sigma: f64) -> Vec<Point> {
    (0..count)
        .map(|i| {
            let t = i as f64 / (count - 1) as f64;
            from + (to - from) * t + jitter(rng, sigma)
        })
        .collect()
}

/// A cable along +x at lateral offset `y`, hanging as a catenary with scale
/// `a` whose lowest point sits at mid-span on `height`.
pub fn sagging_line(
    rng: &mut StdRng,
    length: f64,
    y: f64,
    height: f64,
    a: f64,
    count: usize,
    sigma: f64,
) -> Vec<Point> {
    (0..count)
        .map(|i| {
            let x = length * i as f64 / (count - 1) as f64;
            let z = height + a * (((x - length / 2.0) / a).cosh() - 1.0);
            Point::new(x, y, z) + jitter(rng, sigma)
        })
        .collect()
}

/// Uniform clutter inside the box `min`-`max`.
pub fn scatter(rng: &mut StdRng, count: usize, min: Point, max: Point) -> Vec<Point> {
    (0..count)
        .map(|_| {
            Point::new(
                rng.random_range(min.x..max.x),
                rng.random_range(min.y..max.y),
                rng.random_range(min.z..max.z),
            )
        })
        .collect()
}

/// Default settings with an explicit height band, so that scenes made mostly
/// of cable points are scored in full.
pub fn banded_config(height_max: f64) -> ExtractorConfig {
    ExtractorConfig {
        height_min: Some(0.0),
        height_max: Some(height_max),
        ..Default::default()
    }
}

/// Banded settings with the lateral offset check on, so that parallel
/// conductors of one corridor are never merged.
pub fn corridor_config(height_max: f64) -> ExtractorConfig {
    let defaults = ReconcileParams::default();
    ExtractorConfig {
        reconcile: ReconcileParams {
            collinear: CollinearParams {
                max_lateral_offset: Some(2.0),
                ..defaults.collinear
            },
            strict: CollinearParams {
                max_lateral_offset: Some(1.0),
                ..defaults.strict
            },
            ..defaults
        },
        ..banded_config(height_max)
    }
}

pub fn extractor(config: ExtractorConfig) -> PowerLineExtractor {
    config.build().expect("test configuration is valid")
}

/// Distance from `point` to the closest point of `cloud`.
pub fn nearest_distance(cloud: &[Point], point: &Point) -> f64 {
    cloud
        .iter()
        .map(|p| (p - point).norm())
        .fold(f64::INFINITY, f64::min)
}
