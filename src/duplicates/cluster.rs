//! Density-based clustering (DBSCAN) and the two metrics it runs with.
//!
//! Points are compared pairwise, so a run over `n` points costs `n²`
//! distance evaluations. The call is not interruptible.

use std::collections::VecDeque;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Cluster `points`.
///
/// Two points are neighbours when `distance(a, b) <= eps`. A point with at
/// least `min_points` neighbours (itself included) is a core point; clusters
/// grow from core points through their neighbours. The result holds one
/// label per input point, `None` for noise. Labels are numbered in order of
/// the first core point of each cluster, so the same input in the same
/// order yields the same labels.
pub fn dbscan<P, F>(points: &[P], eps: f64, min_points: usize, distance: F) -> Vec<Option<usize>>
where
    F: Fn(&P, &P) -> f64,
{
    let n = points.len();
    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut next_label = 0;

    let neighbours = |i: usize| -> Vec<usize> {
        (0..n)
            .filter(|&j| distance(&points[i], &points[j]) <= eps)
            .collect()
    };

    for start in 0..n {
        if visited[start] {
            continue;
        }
        visited[start] = true;

        let seeds = neighbours(start);
        if seeds.len() < min_points {
            continue;
        }

        let label = next_label;
        next_label += 1;
        labels[start] = Some(label);

        let mut queue: VecDeque<usize> = seeds.into_iter().collect();
        while let Some(point) = queue.pop_front() {
            if labels[point].is_none() {
                labels[point] = Some(label);
            }
            if visited[point] {
                continue;
            }
            visited[point] = true;

            let reach = neighbours(point);
            if reach.len() >= min_points {
                queue.extend(reach.into_iter().filter(|&j| !visited[j] || labels[j].is_none()));
            }
        }
    }

    labels
}

/// City-block distance between two equally long vectors.
#[must_use]
pub fn manhattan(a: &[u8], b: &[u8]) -> f64 {
    let sum: u64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| u64::from(x.abs_diff(*y)))
        .sum();
    let tail = a.len().abs_diff(b.len()) as u64;
    (sum + tail) as f64
}

/// Great-circle central angle between two `[lat, lon]` points in radians.
#[must_use]
pub fn haversine(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    let dlat = b[0] - a[0];
    let dlon = b[1] - a[1];
    let h = (dlat / 2.0).sin().powi(2) + a[0].cos() * b[0].cos() * (dlon / 2.0).sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin()
}

/// Neighbourhood radius for fingerprints of `vector_len` bits at a
/// divergence of `divergence` percent.
#[must_use]
pub fn perceptual_radius(vector_len: usize, divergence: f64) -> f64 {
    (vector_len as f64 * divergence / 100.0).ceil()
}

/// Neighbourhood radius, as a central angle, for `distance_km`.
#[must_use]
pub fn gps_radius(distance_km: f64) -> f64 {
    distance_km / EARTH_RADIUS_KM
}
