//! Run-scoped memo of per-cloud line geometry.
//!
//! Entries are keyed by point count and a hash of a strided sample of the
//! coordinates. A key match is only trusted after the stored buffer is shown
//! to hold the same points, so colliding keys recompute instead of returning
//! geometry of another cloud.

use std::hash::{BuildHasher, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ahash::{HashMap, RandomState};
use log::debug;
use parking_lot::Mutex;

use crate::line::LineGeometry;
use crate::point_cloud::PointCloud;
use crate::prelude::*;

const HASH_SAMPLES: usize = 64;

type CacheKey = (usize, u64);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub collisions: usize,
    pub entries: usize,
}

pub struct GeometryCache {
    hasher: RandomState,
    entries: Mutex<HashMap<CacheKey, Vec<(Arc<[Point]>, LineGeometry)>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
    collisions: AtomicUsize,
}

impl Default for GeometryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl GeometryCache {
    pub fn new() -> Self {
        GeometryCache {
            hasher: RandomState::with_seeds(0x9e37_79b9, 0x7f4a_7c15, 0xf39c_c060, 0x5ced_c834),
            entries: Mutex::new(HashMap::default()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            collisions: AtomicUsize::new(0),
        }
    }

    fn key(&self, points: &[Point]) -> CacheKey {
        let mut hasher = self.hasher.build_hasher();
        let len = points.len();
        let mut write = |p: &Point| {
            for c in p.coords.iter() {
                hasher.write_u64(c.to_bits());
            }
        };
        if len <= HASH_SAMPLES {
            points.iter().for_each(&mut write);
        } else {
            (0..HASH_SAMPLES)
                .map(|k| k * (len - 1) / (HASH_SAMPLES - 1))
                .for_each(|i| write(&points[i]));
        }
        (len, hasher.finish())
    }

    /// Geometry of `cloud`, computed at most once per distinct point set.
    pub fn line_geometry(&self, cloud: &PointCloud) -> LineGeometry {
        let shared = cloud.shared_points();
        let key = self.key(shared);

        let mut collided = false;
        if let Some(bucket) = self.entries.lock().get(&key) {
            for (stored, geometry) in bucket {
                if Arc::ptr_eq(stored, shared) || stored[..] == shared[..] {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return *geometry;
                }
            }
            collided = true;
        }
        if collided {
            self.collisions.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let geometry = LineGeometry::compute(shared);
        self.entries
            .lock()
            .entry(key)
            .or_default()
            .push((shared.clone(), geometry));
        geometry
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
            entries: self.entries.lock().values().map(Vec::len).sum(),
        }
    }

    pub fn clear(&self) {
        let stats = self.stats();
        debug!(
            "Geometry cache: {} hits, {} misses, {} collisions, {} entries released",
            stats.hits, stats.misses, stats.collisions, stats.entries
        );
        self.entries.lock().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.collisions.store(0, Ordering::Relaxed);
    }
}
