//! Correlation of sequence cones across cameras.
//!
//! Every participating sequence cone becomes a sector polygon with its apex on the
//! camera, projected on a local plane around the fleet. Sequences whose time windows
//! overlap and whose sectors intersect form the edges of an overlap graph; its maximal
//! cliques become event groups once checked for locality.

use crate::config::OverlapConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use uuid::Uuid;

const EARTH_RADIUS_KM: f64 = 6371.0;
/// Arc sampling of a sector
const ARC_STEPS: usize = 36;
const MIN_AREA_KM2: f64 = 1e-9;

/// What the grouping needs to know about a sequence
#[derive(Debug, Clone)]
pub struct SequenceCone {
    pub sequence_id: Uuid,
    pub lat: f64,
    pub lon: f64,
    pub cone_azimuth: f64,
    pub cone_angle: f64,
    pub is_wildfire: Option<bool>,
    pub started_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SmokeLocation {
    pub lat: f64,
    pub lon: f64,
}

/// Groups a sequence belongs to, with one smoke location per group
#[derive(Debug, Clone, Serialize)]
pub struct SequenceGroups {
    pub sequence_id: Uuid,
    pub event_groups: Vec<Vec<Uuid>>,
    pub event_smoke_locations: Vec<Option<SmokeLocation>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Point {
    x: f64,
    y: f64,
}

/// Equirectangular projection, in km, around a reference point
struct LocalPlane {
    lat0: f64,
    lon0: f64,
    cos_lat0: f64,
}

impl LocalPlane {
    fn around(cones: &[SequenceCone]) -> Self {
        let n = cones.len().max(1) as f64;
        let lat0 = cones.iter().map(|c| c.lat).sum::<f64>() / n;
        let lon0 = cones.iter().map(|c| c.lon).sum::<f64>() / n;
        Self { lat0, lon0, cos_lat0: lat0.to_radians().cos() }
    }

    fn project(&self, lat: f64, lon: f64) -> Point {
        Point {
            x: EARTH_RADIUS_KM * (lon - self.lon0).to_radians() * self.cos_lat0,
            y: EARTH_RADIUS_KM * (lat - self.lat0).to_radians(),
        }
    }

    fn unproject(&self, p: Point) -> SmokeLocation {
        SmokeLocation {
            lat: self.lat0 + (p.y / EARTH_RADIUS_KM).to_degrees(),
            lon: self.lon0 + (p.x / (EARTH_RADIUS_KM * self.cos_lat0)).to_degrees(),
        }
    }
}

/// Sector with its apex on the camera, counter-clockwise
fn sector(apex: Point, azimuth: f64, angle: f64, radius_km: f64) -> Vec<Point> {
    let start = azimuth - angle / 2.0;
    let mut points = vec![apex];
    for k in 0..=ARC_STEPS {
        let bearing = (start + angle * k as f64 / ARC_STEPS as f64).to_radians();
        points.push(Point {
            x: apex.x + radius_km * bearing.sin(),
            y: apex.y + radius_km * bearing.cos(),
        });
    }
    // bearings grow clockwise
    points.reverse();
    points
}

fn signed_area(poly: &[Point]) -> f64 {
    let n = poly.len();
    (0..n)
        .map(|i| {
            let (a, b) = (poly[i], poly[(i + 1) % n]);
            a.x * b.y - b.x * a.y
        })
        .sum::<f64>()
        / 2.0
}

fn centroid(poly: &[Point]) -> Option<Point> {
    let area = signed_area(poly);
    if area.abs() < MIN_AREA_KM2 {
        return None;
    }
    let n = poly.len();
    let (mut cx, mut cy) = (0.0, 0.0);
    for i in 0..n {
        let (a, b) = (poly[i], poly[(i + 1) % n]);
        let cross = a.x * b.y - b.x * a.y;
        cx += (a.x + b.x) * cross;
        cy += (a.y + b.y) * cross;
    }
    Some(Point { x: cx / (6.0 * area), y: cy / (6.0 * area) })
}

fn cross(a: Point, b: Point, p: Point) -> f64 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

fn segment_intersection(p: Point, q: Point, a: Point, b: Point) -> Point {
    let (d1, d2) = (cross(a, b, p), cross(a, b, q));
    let t = d1 / (d1 - d2);
    Point { x: p.x + t * (q.x - p.x), y: p.y + t * (q.y - p.y) }
}

/// Sutherland-Hodgman clipping of two convex counter-clockwise polygons
fn intersect_convex(subject: &[Point], clip: &[Point]) -> Vec<Point> {
    let mut output = subject.to_vec();
    let n = clip.len();
    for i in 0..n {
        if output.is_empty() {
            break;
        }
        let (a, b) = (clip[i], clip[(i + 1) % n]);
        let input = std::mem::take(&mut output);
        let m = input.len();
        for j in 0..m {
            let (p, q) = (input[j], input[(j + 1) % m]);
            let (p_in, q_in) = (cross(a, b, p) >= 0.0, cross(a, b, q) >= 0.0);
            match (p_in, q_in) {
                (true, true) => output.push(q),
                (true, false) => output.push(segment_intersection(p, q, a, b)),
                (false, true) => {
                    output.push(segment_intersection(p, q, a, b));
                    output.push(q);
                }
                (false, false) => {}
            }
        }
    }
    output
}

pub fn haversine_km(a: SmokeLocation, b: SmokeLocation) -> f64 {
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Bron-Kerbosch with pivoting, cliques of at least two members
fn maximal_cliques(adjacency: &[HashSet<usize>]) -> Vec<Vec<usize>> {
    fn expand(
        r: &mut Vec<usize>,
        mut p: HashSet<usize>,
        mut x: HashSet<usize>,
        adjacency: &[HashSet<usize>],
        out: &mut Vec<Vec<usize>>,
    ) {
        if p.is_empty() && x.is_empty() {
            if r.len() >= 2 {
                let mut clique = r.clone();
                clique.sort_unstable();
                out.push(clique);
            }
            return;
        }
        let pivot = p
            .union(&x)
            .max_by_key(|u| p.intersection(&adjacency[**u]).count())
            .copied();
        let candidates: Vec<usize> = match pivot {
            Some(u) => p.difference(&adjacency[u]).copied().collect(),
            None => p.iter().copied().collect(),
        };
        for v in candidates {
            r.push(v);
            let p_next = p.intersection(&adjacency[v]).copied().collect();
            let x_next = x.intersection(&adjacency[v]).copied().collect();
            expand(r, p_next, x_next, adjacency, out);
            r.pop();
            p.remove(&v);
            x.insert(v);
        }
    }

    let mut out = Vec::new();
    let all: HashSet<usize> = (0..adjacency.len()).collect();
    expand(&mut Vec::new(), all, HashSet::new(), adjacency, &mut out);
    out
}

/// Compute event groups for every input sequence
pub fn compute_event_groups(sequences: &[SequenceCone], config: &OverlapConfig) -> Vec<SequenceGroups> {
    let plane = LocalPlane::around(sequences);

    // Labeled false positives take no part in grouping
    let sectors: Vec<Option<Vec<Point>>> = sequences
        .iter()
        .map(|s| {
            if s.is_wildfire == Some(false) || s.cone_angle <= 0.0 {
                return None;
            }
            let apex = plane.project(s.lat, s.lon);
            Some(sector(apex, s.cone_azimuth, s.cone_angle.min(180.0), config.r_km))
        })
        .collect();

    let pair_centroid = |i: usize, j: usize| -> Option<Point> {
        match (&sectors[i], &sectors[j]) {
            (Some(a), Some(b)) => centroid(&intersect_convex(a, b)),
            _ => None,
        }
    };

    let n = sequences.len();
    let mut adjacency = vec![HashSet::new(); n];
    for i in 0..n {
        for j in (i + 1)..n {
            let (a, b) = (&sequences[i], &sequences[j]);
            if a.started_at > b.last_seen_at || b.started_at > a.last_seen_at {
                continue;
            }
            if pair_centroid(i, j).is_some() {
                adjacency[i].insert(j);
                adjacency[j].insert(i);
            }
        }
    }

    let cliques = maximal_cliques(&adjacency);
    let grouped: HashSet<usize> = cliques.iter().flatten().copied().collect();

    let mut work: BTreeSet<Vec<usize>> = cliques.into_iter().collect();
    work.extend((0..n).filter(|i| !grouped.contains(i)).map(|i| vec![i]));

    let pairs_of = |group: &[usize]| -> Vec<Vec<usize>> {
        let mut pairs = Vec::new();
        for (k, &i) in group.iter().enumerate() {
            for &j in &group[k + 1..] {
                pairs.push(vec![i, j]);
            }
        }
        pairs
    };

    let mut candidates = BTreeSet::new();
    for group in work {
        if group.len() <= 2 {
            candidates.insert(group);
            continue;
        }
        let centroids: Vec<SmokeLocation> = pairs_of(&group)
            .iter()
            .filter_map(|pair| pair_centroid(pair[0], pair[1]))
            .map(|p| plane.unproject(p))
            .collect();
        let mut diameter = 0.0_f64;
        for (k, a) in centroids.iter().enumerate() {
            for b in &centroids[k + 1..] {
                diameter = diameter.max(haversine_km(*a, *b));
            }
        }
        if centroids.len() >= 2 && diameter <= config.max_dist_km {
            candidates.insert(group);
        } else {
            candidates.extend(pairs_of(&group));
        }
    }

    let candidates: Vec<Vec<usize>> = candidates.into_iter().collect();
    let sets: Vec<HashSet<usize>> = candidates.iter().map(|g| g.iter().copied().collect()).collect();
    let groups: Vec<&Vec<usize>> = candidates
        .iter()
        .enumerate()
        .filter(|(i, _)| !sets.iter().enumerate().any(|(j, other)| *i != j && sets[*i].is_subset(other)))
        .map(|(_, g)| g)
        .collect();

    let smoke_location = |group: &[usize]| -> Option<SmokeLocation> {
        if group.len() < 2 {
            return None;
        }
        let points: Vec<SmokeLocation> = pairs_of(group)
            .iter()
            .filter_map(|pair| pair_centroid(pair[0], pair[1]))
            .map(|p| plane.unproject(p))
            .collect();
        if points.is_empty() {
            return None;
        }
        let mut lats: Vec<f64> = points.iter().map(|p| p.lat).collect();
        let mut lons: Vec<f64> = points.iter().map(|p| p.lon).collect();
        Some(SmokeLocation { lat: median(&mut lats), lon: median(&mut lons) })
    };

    let mut result: Vec<SequenceGroups> = sequences
        .iter()
        .map(|s| SequenceGroups {
            sequence_id: s.sequence_id,
            event_groups: Vec::new(),
            event_smoke_locations: Vec::new(),
        })
        .collect();

    for group in groups {
        let ids: Vec<Uuid> = group.iter().map(|i| sequences[*i].sequence_id).collect();
        let location = smoke_location(group);
        for &i in group {
            result[i].event_groups.push(ids.clone());
            result[i].event_smoke_locations.push(location);
        }
    }

    result
}
