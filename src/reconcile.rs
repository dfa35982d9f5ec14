//! Reassembly of cables broken up by clustering gaps, occlusion or peak
//! splitting.
//!
//! Three bounded passes run in order: a generous collinear merge, absorption
//! of short segments into their nearest short neighbour, and a strict
//! collinear merge. Each pass stops after a round without merges or after
//! `max_rounds` rounds.

use serde::Serialize;

use crate::cache::GeometryCache;
use crate::config::{CollinearParams, ReconcileParams};
use crate::line::LineSegment;

/// Which qualifying collinear pairs are merged in one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MergePolicy {
    /// Every connected group of qualifying pairs becomes one segment.
    All,
    /// Pairs are taken closest first; a segment merges at most once per round.
    Closest,
}

/// Merge counts of one pass, one entry per executed round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub merges_per_round: Vec<usize>,
    /// `false` when the pass was cut off by the round limit.
    pub converged: bool,
}

impl MergeReport {
    pub fn total_merges(&self) -> usize {
        self.merges_per_round.iter().sum()
    }

    fn record(&mut self, merges: usize) -> bool {
        self.merges_per_round.push(merges);
        if merges == 0 {
            self.converged = true;
        }
        merges > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub collinear: MergeReport,
    pub absorption: MergeReport,
    pub strict: MergeReport,
}

/// Endpoint gap and direction angle within bounds, plus the lateral offset
/// when that check is configured.
pub fn is_collinear(a: &LineSegment, b: &LineSegment, params: &CollinearParams) -> bool {
    a.endpoint_distance(b) <= params.max_gap
        && a.angle_to(b) < params.max_angle_deg.to_radians()
        && params
            .max_lateral_offset
            .is_none_or(|max| a.lateral_offset(b) <= max)
}

fn find(parent: &mut [usize], i: usize) -> usize {
    if parent[i] != i {
        parent[i] = find(parent, parent[i]);
    }
    parent[i]
}

/// Unions every qualifying pair; roots are always the smallest index.
fn merge_all_round(
    segments: &[LineSegment],
    params: &CollinearParams,
    cache: &GeometryCache,
) -> (Vec<LineSegment>, usize) {
    let n = segments.len();
    let mut parent: Vec<usize> = (0..n).collect();
    let mut merges = 0;
    for i in 0..n {
        for j in i + 1..n {
            if is_collinear(&segments[i], &segments[j], params) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[ri.max(rj)] = ri.min(rj);
                    merges += 1;
                }
            }
        }
    }
    if merges == 0 {
        return (segments.to_vec(), 0);
    }

    let mut groups: Vec<Vec<usize>> = vec![Vec::new(); n];
    for i in 0..n {
        let root = find(&mut parent, i);
        groups[root].push(i);
    }
    let merged = groups
        .into_iter()
        .filter(|members| !members.is_empty())
        .map(|members| match members.as_slice() {
            [single] => segments[*single].clone(),
            _ => LineSegment::merge_all(members.iter().map(|&i| &segments[i]), cache),
        })
        .collect();
    (merged, merges)
}

/// Pairs each segment with at most one partner, then rebuilds the list with
/// every merged pair at the position of its first member.
fn apply_pairs(
    segments: &[LineSegment],
    pairs: &[(usize, usize)],
    cache: &GeometryCache,
) -> Vec<LineSegment> {
    let mut partner: Vec<Option<usize>> = vec![None; segments.len()];
    let mut absorbed = vec![false; segments.len()];
    for &(i, j) in pairs {
        let (first, second) = (i.min(j), i.max(j));
        partner[first] = Some(second);
        absorbed[second] = true;
    }
    segments
        .iter()
        .enumerate()
        .filter(|(i, _)| !absorbed[*i])
        .map(|(i, segment)| match partner[i] {
            Some(j) => segment.merged(&segments[j], cache),
            None => segment.clone(),
        })
        .collect()
}

fn merge_closest_round(
    segments: &[LineSegment],
    params: &CollinearParams,
    cache: &GeometryCache,
) -> (Vec<LineSegment>, usize) {
    let n = segments.len();
    let mut candidates = Vec::new();
    for i in 0..n {
        for j in i + 1..n {
            if is_collinear(&segments[i], &segments[j], params) {
                candidates.push((segments[i].endpoint_distance(&segments[j]), i, j));
            }
        }
    }
    candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then((a.1, a.2).cmp(&(b.1, b.2))));

    let mut used = vec![false; n];
    let mut pairs = Vec::new();
    for (_, i, j) in candidates {
        if !used[i] && !used[j] {
            used[i] = true;
            used[j] = true;
            pairs.push((i, j));
        }
    }
    if pairs.is_empty() {
        return (segments.to_vec(), 0);
    }
    (apply_pairs(segments, &pairs, cache), pairs.len())
}

/// Repeated collinearity merging until a round merges nothing.
pub fn merge_collinear(
    segments: Vec<LineSegment>,
    params: &CollinearParams,
    policy: MergePolicy,
    max_rounds: usize,
    cache: &GeometryCache,
) -> (Vec<LineSegment>, MergeReport) {
    let mut segments = segments;
    let mut report = MergeReport::default();
    for _ in 0..max_rounds {
        let (next, merges) = match policy {
            MergePolicy::All => merge_all_round(&segments, params, cache),
            MergePolicy::Closest => merge_closest_round(&segments, params, cache),
        };
        segments = next;
        if !report.record(merges) {
            break;
        }
    }
    log::debug!(
        "{policy:?} collinear merge: {} merges in {} rounds, {} segments left",
        report.total_merges(),
        report.merges_per_round.len(),
        segments.len()
    );
    (segments, report)
}

/// Merges segments shorter than `min_length` (span) with their nearest
/// short neighbour.
///
/// Short segments are visited in index order. A visited segment picks the
/// closest other short segment not yet merged this round whose endpoint
/// distance is within `max_gap`; ties go to the lower index.
pub fn absorb_short_segments(
    segments: Vec<LineSegment>,
    min_length: f64,
    max_gap: f64,
    max_rounds: usize,
    cache: &GeometryCache,
) -> (Vec<LineSegment>, MergeReport) {
    let mut segments = segments;
    let mut report = MergeReport::default();
    for _ in 0..max_rounds {
        let short: Vec<bool> = segments.iter().map(|s| s.span_length() < min_length).collect();
        let mut used = vec![false; segments.len()];
        let mut pairs = Vec::new();
        for i in 0..segments.len() {
            if !short[i] || used[i] {
                continue;
            }
            let nearest = (0..segments.len())
                .filter(|&j| j != i && short[j] && !used[j])
                .map(|j| (segments[i].endpoint_distance(&segments[j]), j))
                .filter(|(distance, _)| *distance <= max_gap)
                .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            if let Some((_, j)) = nearest {
                used[i] = true;
                used[j] = true;
                pairs.push((i, j));
            }
        }
        if !pairs.is_empty() {
            segments = apply_pairs(&segments, &pairs, cache);
        }
        if !report.record(pairs.len()) {
            break;
        }
    }
    log::debug!(
        "short segment absorption: {} merges in {} rounds, {} segments left",
        report.total_merges(),
        report.merges_per_round.len(),
        segments.len()
    );
    (segments, report)
}

/// Collinear merge, short-segment absorption and strict collinear merge.
pub fn reconcile(
    segments: Vec<LineSegment>,
    params: &ReconcileParams,
    min_line_length: f64,
    absorb_max_gap: f64,
    cache: &GeometryCache,
) -> (Vec<LineSegment>, ReconcileReport) {
    if !params.enabled {
        return (segments, ReconcileReport::default());
    }
    let (segments, collinear) = merge_collinear(
        segments,
        &params.collinear,
        MergePolicy::All,
        params.max_rounds,
        cache,
    );
    let (segments, absorption) =
        absorb_short_segments(segments, min_line_length, absorb_max_gap, params.max_rounds, cache);
    let (segments, strict) = merge_collinear(
        segments,
        &params.strict,
        MergePolicy::Closest,
        params.max_rounds,
        cache,
    );
    let report = ReconcileReport {
        collinear,
        absorption,
        strict,
    };
    if !(report.collinear.converged && report.absorption.converged && report.strict.converged) {
        log::warn!("segment reconciliation hit the limit of {} rounds", params.max_rounds);
    }
    (segments, report)
}
