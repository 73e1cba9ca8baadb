//! Neighborhood-preserving 2D projection with cluster labels.
//!
//! The layout follows UMAP: a fuzzy k-nearest-neighbor graph is built in the
//! input space, a PCA projection seeds the 2D coordinates, and the layout is
//! refined by attracting graph neighbors and repelling sampled non-neighbors.
//! Clusters are then assigned with k-means on the 2D coordinates.
//!
//! Results depend on the seed and on the order of the input rows; they are
//! only approximately reproducible across different inputs.

use super::Operator;
use crate::batch::{RecordBatch, Value};
use crate::config::{MetricSettings, Settings};
use crate::error::{EvalError, Result};

const NEGATIVE_SAMPLES: usize = 5;
const GRADIENT_CLIP: f64 = 4.0;
const INIT_SCALE: f64 = 10.0;

/// Tunables for the projection.
#[derive(Debug, Clone, PartialEq)]
pub struct UmapParams {
    pub n_neighbors: usize,
    pub min_dist: f64,
    pub n_epochs: usize,
    pub n_clusters: usize,
    pub seed: u64,
}

impl Default for UmapParams {
    fn default() -> Self {
        Self::from(&MetricSettings::default())
    }
}

impl From<&MetricSettings> for UmapParams {
    fn from(metrics: &MetricSettings) -> Self {
        Self {
            n_neighbors: metrics.umap_neighbors,
            min_dist: metrics.umap_min_dist,
            n_epochs: metrics.umap_epochs,
            n_clusters: metrics.umap_clusters,
            seed: metrics.seed,
        }
    }
}

/// SplitMix64, used for negative sampling.
struct SplitMix64(u64);

impl SplitMix64 {
    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E3779B97F4A7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^ (z >> 31)
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = (*x as f64) - (*y as f64);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Fit the `1 / (1 + a d^2b)` curve to the min_dist membership profile.
fn fit_ab(min_dist: f64) -> (f64, f64) {
    let xs: Vec<f64> = (1..=300).map(|i| i as f64 * 0.01).collect();
    let target = |x: f64| {
        if x < min_dist {
            1.0
        } else {
            (-(x - min_dist)).exp()
        }
    };

    let mut best = (1.577, 0.895, f64::MAX);
    for ai in 1..=60 {
        let a = ai as f64 * 0.1;
        for bi in 30..=200 {
            let b = bi as f64 * 0.01;
            let err: f64 = xs
                .iter()
                .map(|&x| {
                    let d = 1.0 / (1.0 + a * x.powf(2.0 * b)) - target(x);
                    d * d
                })
                .sum();
            if err < best.2 {
                best = (a, b, err);
            }
        }
    }
    (best.0, best.1)
}

/// Symmetrised fuzzy kNN graph as weighted edges `(i, j, w)` with `i < j`.
fn fuzzy_graph(points: &[&[f32]], n_neighbors: usize) -> Vec<(usize, usize, f64)> {
    let n = points.len();
    let k = n_neighbors.min(n - 1);
    let target = (k as f64).log2().max(1e-3);

    let mut weights = vec![std::collections::BTreeMap::<usize, f64>::new(); n];
    for i in 0..n {
        let mut neighbors: Vec<(f64, usize)> = (0..n)
            .filter(|&j| j != i)
            .map(|j| (euclidean(points[i], points[j]), j))
            .collect();
        neighbors.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        neighbors.truncate(k);

        let rho = neighbors.first().map(|n| n.0).unwrap_or(0.0);

        // Binary search for sigma so the memberships sum to log2(k).
        let (mut lo, mut hi, mut sigma) = (0.0f64, f64::INFINITY, 1.0f64);
        for _ in 0..64 {
            let sum: f64 = neighbors
                .iter()
                .map(|(d, _)| (-(d - rho).max(0.0) / sigma).exp())
                .sum();
            if (sum - target).abs() < 1e-5 {
                break;
            }
            if sum > target {
                hi = sigma;
                sigma = (lo + hi) / 2.0;
            } else {
                lo = sigma;
                sigma = if hi.is_infinite() { sigma * 2.0 } else { (lo + hi) / 2.0 };
            }
        }
        let sigma = sigma.max(1e-6);

        for (d, j) in neighbors {
            weights[i].insert(j, (-(d - rho).max(0.0) / sigma).exp());
        }
    }

    let mut edges = Vec::new();
    for i in 0..n {
        for (&j, &w_ij) in &weights[i] {
            if j < i && weights[j].contains_key(&i) {
                continue;
            }
            let w_ji = weights[j].get(&i).copied().unwrap_or(0.0);
            let w = w_ij + w_ji - w_ij * w_ji;
            edges.push((i.min(j), i.max(j), w));
        }
    }
    edges
}

/// Top-two principal components by power iteration, scaled to ±INIT_SCALE.
fn pca_init(points: &[&[f32]]) -> Vec<[f64; 2]> {
    let n = points.len();
    let dim = points[0].len();

    let mut mean = vec![0.0f64; dim];
    for p in points {
        for (m, x) in mean.iter_mut().zip(p.iter()) {
            *m += *x as f64 / n as f64;
        }
    }
    let centered: Vec<Vec<f64>> = points
        .iter()
        .map(|p| p.iter().zip(&mean).map(|(x, m)| *x as f64 - m).collect())
        .collect();

    let mut components: Vec<Vec<f64>> = Vec::new();
    for c in 0..2 {
        let mut v: Vec<f64> = (0..dim).map(|d| 1.0 + ((d + c * 7) % 11) as f64 * 0.1).collect();
        for _ in 0..100 {
            // w = X^T X v, with earlier components deflated
            let scores: Vec<f64> = centered
                .iter()
                .map(|row| row.iter().zip(&v).map(|(x, y)| x * y).sum())
                .collect();
            let mut w = vec![0.0f64; dim];
            for (row, s) in centered.iter().zip(&scores) {
                for (wd, x) in w.iter_mut().zip(row) {
                    *wd += x * s;
                }
            }
            for prev in &components {
                let dot: f64 = w.iter().zip(prev).map(|(a, b)| a * b).sum();
                for (wd, p) in w.iter_mut().zip(prev) {
                    *wd -= dot * p;
                }
            }
            let norm = w.iter().map(|x| x * x).sum::<f64>().sqrt();
            if norm < 1e-12 {
                break;
            }
            v = w.into_iter().map(|x| x / norm).collect();
        }
        components.push(v);
    }

    let mut coords: Vec<[f64; 2]> = centered
        .iter()
        .map(|row| {
            let project = |c: &Vec<f64>| row.iter().zip(c).map(|(x, y)| x * y).sum::<f64>();
            [project(&components[0]), project(&components[1])]
        })
        .collect();

    // One factor for both axes keeps the aspect ratio.
    let max = coords
        .iter()
        .map(|c| c[0].abs().max(c[1].abs()))
        .fold(0.0, f64::max);
    if max > 1e-12 {
        for c in &mut coords {
            c[0] *= INIT_SCALE / max;
            c[1] *= INIT_SCALE / max;
        }
    }
    coords
}

/// Project points into 2D.
///
/// All points must share one length. Zero points give an empty layout; a
/// single point lands on the origin.
pub fn reduce(points: &[&[f32]], params: &UmapParams) -> Result<Vec<[f64; 2]>> {
    let n = points.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    let dim = points[0].len();
    if points.iter().any(|p| p.len() != dim) {
        return Err(EvalError::Model(
            "dimensionality reduction needs vectors of equal length".to_string(),
        ));
    }
    if n == 1 {
        return Ok(vec![[0.0, 0.0]]);
    }

    let (a, b) = fit_ab(params.min_dist);
    let edges = fuzzy_graph(points, params.n_neighbors);
    let mut coords = pca_init(points);
    let mut rng = SplitMix64(params.seed);

    // Break exact ties so coincident points can separate.
    for c in &mut coords {
        c[0] += (rng.next_u64() % 1000) as f64 * 1e-6;
        c[1] += (rng.next_u64() % 1000) as f64 * 1e-6;
    }

    let clip = |g: f64| g.clamp(-GRADIENT_CLIP, GRADIENT_CLIP);

    for epoch in 0..params.n_epochs {
        let alpha = 1.0 - epoch as f64 / params.n_epochs as f64;

        for &(i, j, w) in &edges {
            let dx = [coords[i][0] - coords[j][0], coords[i][1] - coords[j][1]];
            let d2 = dx[0] * dx[0] + dx[1] * dx[1];
            if d2 > 0.0 {
                let coef = -2.0 * a * b * d2.powf(b - 1.0) / (1.0 + a * d2.powf(b));
                for axis in 0..2 {
                    let grad = clip(coef * dx[axis]) * alpha * w;
                    coords[i][axis] += grad;
                    coords[j][axis] -= grad;
                }
            }

            for _ in 0..NEGATIVE_SAMPLES {
                let k = rng.below(n);
                if k == i {
                    continue;
                }
                let dx = [coords[i][0] - coords[k][0], coords[i][1] - coords[k][1]];
                let d2 = dx[0] * dx[0] + dx[1] * dx[1];
                let coef = 2.0 * b / ((0.001 + d2) * (1.0 + a * d2.powf(b)));
                for axis in 0..2 {
                    let grad = if d2 > 0.0 { clip(coef * dx[axis]) } else { GRADIENT_CLIP };
                    coords[i][axis] += grad * alpha * w;
                }
            }
        }
    }

    if coords.iter().any(|c| !c[0].is_finite() || !c[1].is_finite()) {
        return Err(EvalError::Model(
            "dimensionality reduction diverged".to_string(),
        ));
    }
    Ok(coords)
}

/// k-means labels for 2D points, numbered in order of first appearance.
pub fn kmeans(points: &[[f64; 2]], k: usize) -> Vec<usize> {
    let n = points.len();
    if n == 0 {
        return Vec::new();
    }
    let k = k.clamp(1, n);

    let dist2 = |a: &[f64; 2], b: &[f64; 2]| (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2);

    // Farthest-point initialisation from the first point.
    let mut centers = vec![points[0]];
    while centers.len() < k {
        let next = (0..n)
            .max_by(|&x, &y| {
                let dx = centers.iter().map(|c| dist2(&points[x], c)).fold(f64::MAX, f64::min);
                let dy = centers.iter().map(|c| dist2(&points[y], c)).fold(f64::MAX, f64::min);
                dx.total_cmp(&dy).then(y.cmp(&x))
            })
            .unwrap_or(0);
        centers.push(points[next]);
    }

    let mut labels = vec![0usize; n];
    for _ in 0..100 {
        let mut changed = false;
        for (p, label) in points.iter().zip(labels.iter_mut()) {
            let nearest = (0..k)
                .min_by(|&x, &y| dist2(p, &centers[x]).total_cmp(&dist2(p, &centers[y])))
                .unwrap_or(0);
            if *label != nearest {
                *label = nearest;
                changed = true;
            }
        }

        for (c, center) in centers.iter_mut().enumerate() {
            let members: Vec<&[f64; 2]> = points
                .iter()
                .zip(&labels)
                .filter(|(_, l)| **l == c)
                .map(|(p, _)| p)
                .collect();
            if !members.is_empty() {
                let m = members.len() as f64;
                *center = [
                    members.iter().map(|p| p[0]).sum::<f64>() / m,
                    members.iter().map(|p| p[1]).sum::<f64>() / m,
                ];
            }
        }

        if !changed {
            break;
        }
    }

    let mut remap: Vec<Option<usize>> = vec![None; k];
    let mut next = 0;
    labels
        .into_iter()
        .map(|l| {
            *remap[l].get_or_insert_with(|| {
                next += 1;
                next - 1
            })
        })
        .collect()
}

/// Projects one or two embedding columns into a shared 2D layout.
///
/// Emits `umap_0`, `umap_1` (the first column's point), `cluster`, and
/// `symbol`. With one column `symbol` is the column name; with two it is
/// `"same"` when the row's points fall in one cluster and `"different"`
/// otherwise. Row count is preserved; rows with a null embedding get nulls.
#[derive(Debug, Clone)]
pub struct Umap {
    col_in_embs_1: String,
    col_in_embs_2: Option<String>,
    params: Option<UmapParams>,
}

impl Umap {
    pub const OUTPUTS: [&'static str; 4] = ["umap_0", "umap_1", "cluster", "symbol"];

    pub fn new(col_in_embs_1: impl Into<String>, col_in_embs_2: Option<String>) -> Self {
        Self {
            col_in_embs_1: col_in_embs_1.into(),
            col_in_embs_2,
            params: None,
        }
    }
}

impl Operator for Umap {
    fn kind(&self) -> &'static str {
        "umap"
    }

    fn inputs(&self) -> Vec<String> {
        let mut inputs = vec![self.col_in_embs_1.clone()];
        inputs.extend(self.col_in_embs_2.iter().cloned());
        inputs
    }

    fn outputs(&self) -> Vec<String> {
        Self::OUTPUTS.iter().map(|s| s.to_string()).collect()
    }

    fn setup(&mut self, settings: &Settings) -> Result<()> {
        self.params = Some(UmapParams::from(&settings.metrics));
        Ok(())
    }

    fn run(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        let params = self.params.as_ref().ok_or_else(|| EvalError::NotSetUp("umap".into()))?;
        batch.require(&self.inputs())?;

        let first = batch.vectors(&self.col_in_embs_1)?;
        let second = match &self.col_in_embs_2 {
            Some(col) => Some(batch.vectors(col)?),
            None => None,
        };

        // Point index of each row's vectors in the joint layout.
        let mut points: Vec<&[f32]> = Vec::new();
        let mut index_1 = vec![None; batch.num_rows()];
        let mut index_2 = vec![None; batch.num_rows()];
        for (row, v) in first.iter().enumerate() {
            if let Some(v) = *v {
                index_1[row] = Some(points.len());
                points.push(v);
            }
        }
        if let Some(second) = &second {
            for (row, v) in second.iter().enumerate() {
                if let Some(v) = *v {
                    index_2[row] = Some(points.len());
                    points.push(v);
                }
            }
        }

        if let Some(dim) = points.first().map(|p| p.len()) {
            if let Some(bad) = points.iter().find(|p| p.len() != dim) {
                return Err(EvalError::data(
                    self.inputs().join(","),
                    format!("embeddings of length {} and {} cannot share a layout", dim, bad.len()),
                ));
            }
        }

        let coords = reduce(&points, params)?;
        let clusters = kmeans(&coords, params.n_clusters);
        tracing::debug!(points = points.len(), clusters = params.n_clusters, "projected embeddings");

        let mut x = Vec::with_capacity(batch.num_rows());
        let mut y = Vec::with_capacity(batch.num_rows());
        let mut cluster = Vec::with_capacity(batch.num_rows());
        let mut symbol = Vec::with_capacity(batch.num_rows());

        for row in 0..batch.num_rows() {
            match index_1[row] {
                Some(p) => {
                    x.push(Value::float(coords[p][0]));
                    y.push(Value::float(coords[p][1]));
                    cluster.push(Value::Int(clusters[p] as i64));
                }
                None => {
                    x.push(Value::Null);
                    y.push(Value::Null);
                    cluster.push(Value::Null);
                }
            }

            let label = match (&self.col_in_embs_2, index_1[row], index_2[row]) {
                (None, Some(_), _) => Value::from(self.col_in_embs_1.as_str()),
                (Some(_), Some(p), Some(q)) if clusters[p] == clusters[q] => Value::from("same"),
                (Some(_), Some(_), Some(_)) => Value::from("different"),
                _ => Value::Null,
            };
            symbol.push(label);
        }

        batch
            .with_column("umap_0", x)?
            .with_column("umap_1", y)?
            .with_column("cluster", cluster)?
            .with_column("symbol", symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn clustered_vectors() -> Vec<Vec<f32>> {
        let mut vectors = Vec::new();
        for i in 0..6 {
            let jitter = i as f32 * 0.01;
            vectors.push(vec![1.0 + jitter, 0.0, 0.0, jitter]);
            vectors.push(vec![0.0, 0.0, 1.0 + jitter, -jitter]);
        }
        vectors
    }

    fn small_params() -> UmapParams {
        UmapParams {
            n_neighbors: 4,
            n_epochs: 50,
            n_clusters: 2,
            ..UmapParams::default()
        }
    }

    #[test]
    fn test_reduce_edge_cases() {
        let params = small_params();
        assert!(reduce(&[], &params).unwrap().is_empty());
        assert_eq!(reduce(&[&[1.0, 2.0][..]], &params).unwrap(), vec![[0.0, 0.0]]);
        assert!(reduce(&[&[1.0][..], &[1.0, 2.0][..]], &params).is_err());
    }

    #[test]
    fn test_reduce_separates_clusters() {
        let vectors = clustered_vectors();
        let points: Vec<&[f32]> = vectors.iter().map(|v| v.as_slice()).collect();
        let coords = reduce(&points, &small_params()).unwrap();
        assert_eq!(coords.len(), points.len());

        let labels = kmeans(&coords, 2);
        for pair in labels.chunks(2) {
            assert_ne!(pair[0], pair[1]);
        }
        // Even rows share a cluster
        assert!(labels.iter().step_by(2).all(|l| *l == labels[0]));
    }

    #[test]
    fn test_kmeans_labels_by_first_appearance() {
        let points = vec![[10.0, 10.0], [0.0, 0.0], [10.1, 10.0], [0.1, 0.0]];
        assert_eq!(kmeans(&points, 2), vec![0, 1, 0, 1]);
        assert_eq!(kmeans(&points, 10).len(), 4);
        assert!(kmeans(&[], 3).is_empty());
    }

    #[test]
    fn test_operator_preserves_rows() {
        let vectors = clustered_vectors();
        let (questions, responses): (Vec<Value>, Vec<Value>) = vectors
            .chunks(2)
            .map(|pair| (Value::Vector(pair[0].clone()), Value::Vector(pair[1].clone())))
            .unzip();
        let batch = RecordBatch::from_columns(vec![
            ("question_embeddings", questions),
            ("response_embeddings", responses),
        ])
        .unwrap();

        let mut settings = Settings::default();
        settings.metrics.umap_neighbors = 4;
        settings.metrics.umap_epochs = 50;
        settings.metrics.umap_clusters = 2;

        let mut op = Umap::new(
            "question_embeddings",
            Some("response_embeddings".to_string()),
        );
        op.setup(&settings).unwrap();
        let out = op.run(&batch).unwrap();

        assert_eq!(out.num_rows(), batch.num_rows());
        for name in Umap::OUTPUTS {
            assert!(out.contains(name));
        }
        let symbols = out.texts("symbol").unwrap();
        assert!(symbols.iter().all(|s| *s == Some("different")));
    }

    #[test]
    fn test_operator_empty_and_single_column() {
        let batch = RecordBatch::from_columns(vec![("emb", Vec::new())]).unwrap();
        let mut op = Umap::new("emb", None);
        op.setup(&Settings::default()).unwrap();
        let out = op.run(&batch).unwrap();
        assert_eq!(out.num_rows(), 0);
        assert!(out.contains("umap_0"));

        let batch = RecordBatch::from_columns(vec![(
            "emb",
            vec![Value::Vector(vec![1.0, 0.0]), Value::Null],
        )])
        .unwrap();
        let out = op.run(&batch).unwrap();
        assert_eq!(
            out.column("symbol").unwrap().values(),
            &[Value::from("emb"), Value::Null]
        );
    }

    #[test]
    fn test_mixed_lengths_is_data_error() {
        let batch = RecordBatch::from_columns(vec![
            ("a", vec![Value::Vector(vec![1.0, 0.0])]),
            ("b", vec![Value::Vector(vec![1.0])]),
        ])
        .unwrap();
        let mut op = Umap::new("a", Some("b".to_string()));
        op.setup(&Settings::default()).unwrap();
        assert_eq!(op.run(&batch).unwrap_err().kind(), ErrorKind::DataError);
    }
}
