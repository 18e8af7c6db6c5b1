//! k-means colour breakdown of the masked stone
//!
//! The masked pixels are partitioned in Lab for each configured cluster
//! count. Seeding is deterministic (median lightness first, then farthest
//! point), so repeated runs on the same pixels give the same report.

use opencv::core::Mat;
use palette::{white_point::D65, Lab};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::conversion::{chroma, hue_degrees, masked_lab_pixels, to_lab_mat};
use crate::constants::grading::{CLUSTER_COUNTS, KMEANS_EPSILON, KMEANS_MAX_ITER};
use crate::error::Result;

/// Mean colour and share of one cluster
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterStat {
    pub l: f64,
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub h: f64,
    /// Share of masked pixels, percent rounded to one decimal
    pub percent: f64,
}

/// All clusters for one cluster count, largest share first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterReport {
    pub k: usize,
    pub clusters: Vec<ClusterStat>,
}

#[derive(Debug, Clone, Copy)]
struct Center {
    lab: Lab<D65, f32>,
    sum: [f64; 3],
    count: usize,
}

impl Center {
    fn new(lab: Lab<D65, f32>) -> Self {
        Self {
            lab,
            sum: [0.0; 3],
            count: 0,
        }
    }

    fn add(&mut self, lab: &Lab<D65, f32>) {
        self.sum[0] += lab.l as f64;
        self.sum[1] += lab.a as f64;
        self.sum[2] += lab.b as f64;
        self.count += 1;
    }

    fn mean(&self) -> Option<[f64; 3]> {
        (self.count > 0).then(|| {
            let n = self.count as f64;
            [self.sum[0] / n, self.sum[1] / n, self.sum[2] / n]
        })
    }
}

fn distance_sq(p: &Lab<D65, f32>, q: &Lab<D65, f32>) -> f32 {
    let dl = p.l - q.l;
    let da = p.a - q.a;
    let db = p.b - q.b;
    dl * dl + da * da + db * db
}

fn nearest(pixel: &Lab<D65, f32>, centers: &[Center]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::MAX;
    for (i, c) in centers.iter().enumerate() {
        let d = distance_sq(pixel, &c.lab);
        if d < best_dist {
            best_dist = d;
            best = i;
        }
    }
    best
}

fn seed(pixels: &[Lab<D65, f32>], k: usize) -> Vec<Center> {
    let mut by_l: Vec<usize> = (0..pixels.len()).collect();
    by_l.sort_by(|&i, &j| pixels[i].l.total_cmp(&pixels[j].l));
    let mut centers = vec![Center::new(pixels[by_l[pixels.len() / 2]])];

    let mut min_dist: Vec<f32> = pixels
        .par_iter()
        .map(|p| distance_sq(p, &centers[0].lab))
        .collect();

    while centers.len() < k {
        let (idx, _) = min_dist
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, &d)| if d > best.1 { (i, d) } else { best });
        let lab = pixels[idx];
        min_dist
            .par_iter_mut()
            .zip(pixels.par_iter())
            .for_each(|(d, p)| *d = d.min(distance_sq(p, &lab)));
        centers.push(Center::new(lab));
    }
    centers
}

/// Lloyd iterations from deterministic seeds
fn kmeans(
    pixels: &[Lab<D65, f32>],
    k: usize,
    max_iterations: usize,
    epsilon: f64,
) -> Vec<Center> {
    let mut centers = seed(pixels, k);

    for iteration in 0..max_iterations {
        let labels: Vec<usize> = pixels.par_iter().map(|p| nearest(p, &centers)).collect();

        for c in centers.iter_mut() {
            c.sum = [0.0; 3];
            c.count = 0;
        }
        for (p, &label) in pixels.iter().zip(&labels) {
            centers[label].add(p);
        }

        let mut shift = 0.0f64;
        for c in centers.iter_mut() {
            if let Some([l, a, b]) = c.mean() {
                let moved = Lab::new(l as f32, a as f32, b as f32);
                shift = shift.max(distance_sq(&moved, &c.lab).sqrt() as f64);
                c.lab = moved;
            }
        }
        if shift < epsilon {
            debug!(k, iterations = iteration + 1, "k-means converged");
            break;
        }
    }

    centers
}

/// k-means colour breakdown for several cluster counts
#[derive(Debug, Clone)]
pub struct ClusterAnalyzer {
    counts: Vec<usize>,
    max_iterations: usize,
    epsilon: f64,
}

impl Default for ClusterAnalyzer {
    fn default() -> Self {
        Self {
            counts: CLUSTER_COUNTS.to_vec(),
            max_iterations: KMEANS_MAX_ITER,
            epsilon: KMEANS_EPSILON,
        }
    }
}

impl ClusterAnalyzer {
    pub fn new(counts: Vec<usize>) -> Self {
        Self {
            counts,
            ..Self::default()
        }
    }

    /// Cluster an explicit pixel set.
    ///
    /// Counts larger than the number of pixels are skipped.
    pub fn analyze_pixels(&self, pixels: &[Lab<D65, f32>]) -> Vec<ClusterReport> {
        let total = pixels.len() as f64;
        self.counts
            .iter()
            .filter(|&&k| k > 0 && k <= pixels.len())
            .map(|&k| {
                // centers keep the membership sums of the last assignment
                let centers = kmeans(pixels, k, self.max_iterations, self.epsilon);

                let mut clusters: Vec<ClusterStat> = centers
                    .iter()
                    .filter_map(|c| {
                        let [l, a, b] = c.mean()?;
                        Some(ClusterStat {
                            l,
                            a,
                            b,
                            c: chroma(a, b),
                            h: hue_degrees(a, b),
                            percent: (c.count as f64 * 1000.0 / total).round() / 10.0,
                        })
                    })
                    .collect();
                clusters.sort_by(|x, y| y.percent.total_cmp(&x.percent));
                ClusterReport { k, clusters }
            })
            .collect()
    }

    /// Cluster the masked pixels of a BGR capture
    pub fn analyze(&self, bgr: &Mat, mask: &Mat, assume_srgb: bool) -> Result<Vec<ClusterReport>> {
        let lab = to_lab_mat(bgr, assume_srgb)?;
        let pixels = masked_lab_pixels(&lab, mask)?;
        Ok(self.analyze_pixels(&pixels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(l: f32, a: f32, b: f32, n: usize) -> Vec<Lab<D65, f32>> {
        (0..n)
            .map(|i| {
                let jitter = (i % 5) as f32 * 0.2;
                Lab::new(l + jitter, a - jitter, b)
            })
            .collect()
    }

    #[test]
    fn test_two_blobs_shares() {
        let mut pixels = blob(30.0, 10.0, 10.0, 300);
        pixels.extend(blob(80.0, -5.0, 2.0, 100));

        let reports = ClusterAnalyzer::new(vec![2]).analyze_pixels(&pixels);
        assert_eq!(reports.len(), 1);
        let clusters = &reports[0].clusters;
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].percent, 75.0);
        assert_eq!(clusters[1].percent, 25.0);
        assert!((clusters[0].l - 30.4).abs() < 0.5);
        assert!((clusters[1].l - 80.4).abs() < 0.5);
        assert!((clusters[1].c - (5.4f64.hypot(2.0))).abs() < 0.5);
    }

    #[test]
    fn test_deterministic() {
        let mut pixels = blob(40.0, 2.0, 20.0, 50);
        pixels.extend(blob(60.0, -8.0, 1.0, 70));
        pixels.extend(blob(90.0, 0.0, 0.0, 30));
        let analyzer = ClusterAnalyzer::default();
        assert_eq!(analyzer.analyze_pixels(&pixels), analyzer.analyze_pixels(&pixels));
    }

    #[test]
    fn test_percent_sums_to_hundred() {
        let mut pixels = blob(40.0, 2.0, 20.0, 33);
        pixels.extend(blob(60.0, -8.0, 1.0, 33));
        pixels.extend(blob(90.0, 0.0, 0.0, 34));
        for report in ClusterAnalyzer::default().analyze_pixels(&pixels) {
            let sum: f64 = report.clusters.iter().map(|c| c.percent).sum();
            assert!((sum - 100.0).abs() < 0.5, "k={} sum={}", report.k, sum);
        }
    }

    #[test]
    fn test_too_few_pixels() {
        let pixels = blob(50.0, 0.0, 0.0, 3);
        let reports = ClusterAnalyzer::default().analyze_pixels(&pixels);
        assert_eq!(reports.iter().map(|r| r.k).collect::<Vec<_>>(), vec![2, 3]);
        assert!(ClusterAnalyzer::default().analyze_pixels(&[]).is_empty());
    }
}
