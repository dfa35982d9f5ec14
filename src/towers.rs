//! Support tower positions inferred from where line endpoints gather.

use serde::{Deserialize, Serialize};

use crate::PowerLine;
use crate::clustering::dbscan;
use crate::config::{check_at_least_one, check_positive};
use crate::error::Result;
use crate::geometry::centroid;
use crate::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TowerStrategy {
    /// DBSCAN over all endpoints; endpoints left as noise belong to no tower.
    Density { eps: f64, min_samples: usize },
    /// Greedy fixed-size groups: the first unused endpoint and its
    /// `group_size - 1` nearest unused neighbours. Leftovers are dropped.
    NearestGroups { group_size: usize },
}

impl Default for TowerStrategy {
    fn default() -> Self {
        TowerStrategy::Density {
            eps: 30.0,
            min_samples: 2,
        }
    }
}

impl TowerStrategy {
    pub fn validate(&self) -> Result<()> {
        match *self {
            TowerStrategy::Density { eps, min_samples } => {
                check_positive("towers.eps", eps)?;
                check_at_least_one("towers.min_samples", min_samples)
            }
            TowerStrategy::NearestGroups { group_size } => {
                check_at_least_one("towers.group_size", group_size)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tower {
    pub id: usize,
    /// Centroid of the grouped endpoints.
    pub position: Point,
    /// Highest grouped endpoint.
    pub highest_point: Point,
    /// Ids of the lines with an endpoint in this group, sorted and unique.
    pub line_ids: Vec<usize>,
    pub endpoint_count: usize,
}

impl Tower {
    /// Centroid in the plane at the height of the highest endpoint.
    pub fn top(&self) -> Point {
        Point::new(self.position.x, self.position.y, self.highest_point.z)
    }
}

#[derive(Debug, Clone, Copy)]
struct Endpoint {
    line_id: usize,
    point: Point,
}

fn build_tower(id: usize, members: &[Endpoint]) -> Option<Tower> {
    let points: Vec<Point> = members.iter().map(|e| e.point).collect();
    let position = centroid(&points)?;
    let highest_point = points
        .iter()
        .copied()
        .reduce(|best, p| if p.z > best.z { p } else { best })?;
    let mut line_ids: Vec<usize> = members.iter().map(|e| e.line_id).collect();
    line_ids.sort_unstable();
    line_ids.dedup();
    Some(Tower {
        id,
        position,
        highest_point,
        line_ids,
        endpoint_count: members.len(),
    })
}

fn density_groups(endpoints: &[Endpoint], eps: f64, min_samples: usize) -> Vec<Vec<Endpoint>> {
    let coords: Vec<[f64; 3]> = endpoints.iter().map(|e| e.point.coords.into()).collect();
    dbscan(&coords, eps, min_samples)
        .groups()
        .into_iter()
        .map(|members| members.into_iter().map(|i| endpoints[i]).collect())
        .collect()
}

fn nearest_groups(endpoints: &[Endpoint], group_size: usize) -> Vec<Vec<Endpoint>> {
    let mut remaining: Vec<Endpoint> = endpoints.to_vec();
    let mut groups = Vec::new();
    while remaining.len() >= group_size {
        let seed = remaining.remove(0);
        let mut by_distance: Vec<(f64, usize)> = remaining
            .iter()
            .enumerate()
            .map(|(i, e)| ((e.point - seed.point).norm(), i))
            .collect();
        by_distance.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let mut chosen: Vec<usize> = by_distance[..group_size - 1].iter().map(|&(_, i)| i).collect();

        let mut group = vec![seed];
        group.extend(chosen.iter().map(|&i| remaining[i]));
        chosen.sort_unstable();
        for i in chosen.into_iter().rev() {
            remaining.remove(i);
        }
        groups.push(group);
    }
    if !remaining.is_empty() {
        log::debug!("{} endpoints left over after grouping", remaining.len());
    }
    groups
}

/// Groups the endpoints of all lines into towers.
pub fn infer_towers(lines: &[PowerLine], strategy: &TowerStrategy) -> Result<Vec<Tower>> {
    strategy.validate()?;
    let endpoints: Vec<Endpoint> = lines
        .iter()
        .flat_map(|line| {
            line.endpoints.iter().map(|&point| Endpoint {
                line_id: line.id,
                point,
            })
        })
        .collect();
    let groups = match *strategy {
        TowerStrategy::Density { eps, min_samples } => density_groups(&endpoints, eps, min_samples),
        TowerStrategy::NearestGroups { group_size } => nearest_groups(&endpoints, group_size),
    };
    let towers: Vec<Tower> = groups
        .iter()
        .filter_map(|members| build_tower(0, members))
        .enumerate()
        .map(|(id, tower)| Tower { id, ..tower })
        .collect();
    log::info!("{} towers from {} line endpoints", towers.len(), endpoints.len());
    Ok(towers)
}
