//! Dominant color extraction by k-means clustering in RGB space.
//!
//! Pixels are treated as points in 3-D Euclidean space. With a single cluster the
//! centroid is just the per-channel mean, so [`extract_dominant_color`] takes a one
//! pass shortcut. [`kmeans`] handles the general case and is what a palette
//! feature would build on.

use std::collections::HashSet;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;

use crate::color::Color;
use crate::pixels::PixelBuffer;

pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_MAX_ITERATIONS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QuantizeError {
    #[error("image contains no pixels")]
    EmptyImage,
    #[error("cluster count must be at least 1")]
    ZeroClusters,
}

/// Parameters for [`kmeans`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmeansOptions {
    k: usize,
    max_iterations: usize,
    seed: u64,
}

impl Default for KmeansOptions {
    fn default() -> Self {
        Self::new(1)
    }
}

impl KmeansOptions {
    pub const fn new(k: usize) -> Self {
        Self {
            k,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            seed: DEFAULT_SEED,
        }
    }

    #[must_use]
    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Seed for picking the initial centroids. The same seed and input always
    /// give the same clusters.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn k(&self) -> usize {
        self.k
    }
}

/// One cluster of the result: its centroid color and how many pixels it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cluster {
    pub color: Color,
    pub population: usize,
}

type Point = [f64; 3];

#[inline(always)]
fn squared_distance(a: &Point, b: &Point) -> f64 {
    let dr = a[0] - b[0];
    let dg = a[1] - b[1];
    let db = a[2] - b[2];
    dr * dr + dg * dg + db * db
}

/// Index of the nearest centroid. Strict `<` keeps the lowest index on ties.
#[inline(always)]
fn nearest(point: &Point, centroids: &[Point]) -> usize {
    let mut best_idx = 0;
    let mut best_dist = f64::INFINITY;
    for (idx, centroid) in centroids.iter().enumerate() {
        let dist = squared_distance(point, centroid);
        if dist < best_dist {
            best_dist = dist;
            best_idx = idx;
        }
    }
    best_idx
}

/// The representative color of a pixel buffer.
///
/// Equivalent to single-cluster k-means: the per-channel arithmetic mean of every
/// pixel, accumulated in `f64` and rounded once at the end.
pub fn extract_dominant_color(pixels: &PixelBuffer) -> Result<Color, QuantizeError> {
    if pixels.is_empty() {
        return Err(QuantizeError::EmptyImage);
    }
    let mut sum = [0.0_f64; 3];
    for p in pixels.iter() {
        sum[0] += f64::from(p.red);
        sum[1] += f64::from(p.green);
        sum[2] += f64::from(p.blue);
    }
    let n = pixels.len() as f64;
    Ok(Color::from_channels(sum.map(|s| s / n)))
}

/// Dominant color for an arbitrary cluster count: the centroid of the most
/// populated cluster, lowest index on ties.
pub fn extract_dominant_color_with(
    pixels: &PixelBuffer,
    options: &KmeansOptions,
) -> Result<Color, QuantizeError> {
    if options.k == 1 {
        return extract_dominant_color(pixels);
    }
    let clusters = kmeans(pixels, options)?;
    let mut dominant = clusters[0];
    for cluster in &clusters[1..] {
        if cluster.population > dominant.population {
            dominant = *cluster;
        }
    }
    Ok(dominant.color)
}

/// Lloyd's k-means over the pixel buffer.
///
/// 1. Pick `k` distinct pixel colors as initial centroids by seeded sampling. If the
///    image has fewer than `k` distinct colors, `k` shrinks to that count.
/// 2. Assign every pixel to its nearest centroid (squared Euclidean distance).
/// 3. Move each centroid to the mean of its pixels; a centroid with no pixels stays put.
/// 4. Repeat until no assignment changes or `max_iterations` is reached.
///
/// Clusters are returned in centroid index order.
pub fn kmeans(pixels: &PixelBuffer, options: &KmeansOptions) -> Result<Vec<Cluster>, QuantizeError> {
    if options.k == 0 {
        return Err(QuantizeError::ZeroClusters);
    }
    if pixels.is_empty() {
        return Err(QuantizeError::EmptyImage);
    }

    let points: Vec<Point> = pixels
        .iter()
        .map(|p| [f64::from(p.red), f64::from(p.green), f64::from(p.blue)])
        .collect();

    let mut centroids = initial_centroids(pixels, options.k, options.seed);
    let k = centroids.len();

    // usize::MAX so that the first assignment pass always counts as a change.
    let mut assignments = vec![usize::MAX; points.len()];
    let mut counts = vec![0usize; k];

    for iteration in 0..options.max_iterations {
        // ----------------------
        // Assignment
        // ----------------------
        let mut changed = false;
        for (point, slot) in points.iter().zip(assignments.iter_mut()) {
            let idx = nearest(point, &centroids);
            if *slot != idx {
                *slot = idx;
                changed = true;
            }
        }
        if !changed {
            tracing::trace!(iteration, "k-means converged");
            break;
        }

        // ----------------------
        // Update
        // ----------------------
        let mut sums = vec![[0.0_f64; 3]; k];
        counts.iter_mut().for_each(|c| *c = 0);
        for (point, &idx) in points.iter().zip(assignments.iter()) {
            sums[idx][0] += point[0];
            sums[idx][1] += point[1];
            sums[idx][2] += point[2];
            counts[idx] += 1;
        }
        for ((centroid, sum), &count) in centroids.iter_mut().zip(sums.iter()).zip(counts.iter()) {
            if count > 0 {
                let n = count as f64;
                *centroid = [sum[0] / n, sum[1] / n, sum[2] / n];
            }
        }
    }

    // Populations follow the final assignment, which may lag the last update when
    // the iteration cap was hit.
    let mut populations = vec![0usize; k];
    for &idx in &assignments {
        if idx < k {
            populations[idx] += 1;
        }
    }

    Ok(centroids
        .iter()
        .zip(populations)
        .map(|(centroid, population)| Cluster {
            color: Color::from_channels(*centroid),
            population,
        })
        .collect())
}

fn initial_centroids(pixels: &PixelBuffer, k: usize, seed: u64) -> Vec<Point> {
    let mut seen = HashSet::new();
    let distinct: Vec<Point> = pixels
        .iter()
        .filter(|p| seen.insert((p.red, p.green, p.blue)))
        .map(|p| [f64::from(p.red), f64::from(p.green), f64::from(p.blue)])
        .collect();

    let k = k.min(distinct.len());
    let mut rng = StdRng::seed_from_u64(seed);
    index::sample(&mut rng, distinct.len(), k)
        .into_iter()
        .map(|i| distinct[i])
        .collect()
}
