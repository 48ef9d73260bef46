//! UMAP dimensionality reduction for faster clustering
//!
//! `fit` projects a whole corpus and returns a [`FittedUmap`] that later runs
//! hand back to `transform` to place new notes without moving the ones that
//! were already laid out.

use std::collections::{BTreeMap, HashMap, HashSet};

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::config::{Metric, UmapConfig, UMAP_INIT_RANGE, UMAP_SPREAD};
use crate::core::embedding;
use crate::error::{Result, StrataError};
use crate::ui;

/// A note path with its reduced-space coordinates
pub type ReducedPoint = (String, Vec<f32>);

const SIGMA_TOLERANCE: f32 = 1e-5;
const SIGMA_SEARCH_STEPS: usize = 64;
const MIN_SIGMA_SCALE: f32 = 1e-3;
const MIN_SIGMA: f32 = 1e-6;
const GRAD_CLIP: f32 = 4.0;
const REPULSION_EPSILON: f32 = 1e-3;
/// Keeps transform's negative sampling off the fit's random stream
const TRANSFORM_SEED_SALT: u64 = 0x7a5f_3c1d_9e2b_4f60;

/// Points placed by `transform`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Placement {
	pub points: Vec<ReducedPoint>,
	/// Original-space distances computed by the neighbor search
	pub distance_evaluations: usize,
}

/// Reducer model for one corpus, owned by the pipeline
#[derive(Debug, Clone, Default)]
pub enum ReducerState {
	#[default]
	Unfit,
	Fitted(FittedUmap),
}

impl ReducerState {
	pub fn fitted(&self) -> Option<&FittedUmap> {
		match self {
			Self::Fitted(model) => Some(model),
			Self::Unfit => None,
		}
	}

	pub fn is_fitted(&self) -> bool {
		matches!(self, Self::Fitted(_))
	}
}

/// Reference points of a previous fit: original-space rows and their layout
#[derive(Debug, Clone)]
pub struct FittedUmap {
	paths: Vec<String>,
	index: HashMap<String, usize>,
	/// Unit-length rows when the metric is cosine
	data: Array2<f32>,
	layout: Array2<f32>,
	metric: Metric,
	a: f32,
	b: f32,
}

impl FittedUmap {
	/// Rebuild a model from positions laid out by an earlier fit.
	///
	/// Each entry pairs a note's current embedding with its cached reduced
	/// position. Used when the process that held the original model is gone.
	pub fn from_reference(points: &[(&str, &[f32], &[f32])], config: &UmapConfig) -> Result<Self> {
		if points.is_empty() {
			return Err(StrataError::state(
				"No cached positions to rebuild the reducer from",
			));
		}

		let originals: Vec<(&str, &[f32])> = points.iter().map(|(p, e, _)| (*p, *e)).collect();
		check_points(&originals, None)?;

		for (path, _, position) in points {
			if position.len() != config.n_components {
				return Err(StrataError::state(format!(
					"Cached position for {} has {} components, expected {}",
					path,
					position.len(),
					config.n_components
				)));
			}
			if position.iter().any(|v| !v.is_finite()) {
				return Err(StrataError::state(format!(
					"Cached position for {} is not finite",
					path
				)));
			}
		}

		let data = to_matrix(&originals, config.metric);
		let positions: Vec<(&str, &[f32])> = points.iter().map(|(p, _, pos)| (*p, *pos)).collect();
		let layout = to_matrix(&positions, Metric::Euclidean);
		let (a, b) = find_ab_params(UMAP_SPREAD, config.min_dist);

		Ok(Self::new(
			points.iter().map(|(p, _, _)| p.to_string()).collect(),
			data,
			layout,
			config.metric,
			a,
			b,
		))
	}

	fn new(
		paths: Vec<String>,
		data: Array2<f32>,
		layout: Array2<f32>,
		metric: Metric,
		a: f32,
		b: f32,
	) -> Self {
		let index = paths
			.iter()
			.enumerate()
			.map(|(i, p)| (p.clone(), i))
			.collect();
		Self {
			paths,
			index,
			data,
			layout,
			metric,
			a,
			b,
		}
	}

	pub fn len(&self) -> usize {
		self.paths.len()
	}

	pub fn is_empty(&self) -> bool {
		self.paths.is_empty()
	}

	pub fn contains(&self, path: &str) -> bool {
		self.index.contains_key(path)
	}

	pub fn dim(&self) -> usize {
		self.data.ncols()
	}

	pub fn n_components(&self) -> usize {
		self.layout.ncols()
	}

	/// Layout position of a reference point
	pub fn position(&self, path: &str) -> Option<Vec<f32>> {
		self.index.get(path).map(|&i| self.layout.row(i).to_vec())
	}

	/// A model over the given reference points only, in the given order
	pub fn subset(&self, paths: &[String]) -> Result<Self> {
		let rows = paths
			.iter()
			.map(|path| {
				self.index.get(path).copied().ok_or_else(|| {
					StrataError::state(format!("{} is not a reference point of the reducer", path))
				})
			})
			.collect::<Result<Vec<usize>>>()?;

		Ok(Self::new(
			paths.to_vec(),
			self.data.select(Axis(0), &rows),
			self.layout.select(Axis(0), &rows),
			self.metric,
			self.a,
			self.b,
		))
	}
}

/// Project a whole corpus. Output order matches input order.
///
/// Fewer than two points yield an empty model and no positions; the caller
/// skips clustering in that case.
pub fn fit(points: &[(&str, &[f32])], config: &UmapConfig) -> Result<(FittedUmap, Vec<ReducedPoint>)> {
	let n_samples = points.len();
	let (a, b) = find_ab_params(UMAP_SPREAD, config.min_dist);

	if n_samples < 2 {
		ui::debug("Fewer than 2 points, skipping UMAP");
		let empty = FittedUmap::new(
			Vec::new(),
			Array2::zeros((0, 0)),
			Array2::zeros((0, config.n_components)),
			config.metric,
			a,
			b,
		);
		return Ok((empty, Vec::new()));
	}

	let n_features = check_points(points, None)?;
	let n_neighbors = config.n_neighbors.min(n_samples - 1);

	ui::info(&format!(
		"Reducing {}D to {}D using UMAP",
		n_features, config.n_components
	));
	ui::debug(&format!(
		"UMAP neighbors: {} (requested {}), curve a={:.3} b={:.3}",
		n_neighbors, config.n_neighbors, a, b
	));

	let data = to_matrix(points, config.metric);

	ui::debug("Computing K-nearest neighbors...");
	let no_exclusions = vec![None; n_samples];
	let (knn_indices, knn_distances) = compute_knn(
		data.view(),
		data.view(),
		n_neighbors,
		config.metric,
		&no_exclusions,
		true,
	);

	let n_epochs = config.epochs_for(n_samples);
	let edges = fuzzy_simplicial_set(&knn_indices, &knn_distances, n_neighbors, n_epochs);
	ui::debug(&format!("Neighbor graph has {} directed edges", edges.len()));

	let mut rng = make_rng(config.seed);
	let mut layout = initialize_embedding(n_samples, config.n_components, &mut rng);

	ui::debug("Running UMAP optimization...");
	let params = SgdParams::new(config, a, b, n_epochs);
	optimize_layout(&mut layout, None, &edges, &params, &mut rng);

	if layout.iter().any(|v| !v.is_finite()) {
		return Err(StrataError::computation(
			"UMAP layout diverged to non-finite values",
		));
	}

	let result: Vec<ReducedPoint> = points
		.iter()
		.enumerate()
		.map(|(i, (path, _))| (path.to_string(), layout.row(i).to_vec()))
		.collect();

	let model = FittedUmap::new(
		points.iter().map(|(p, _)| p.to_string()).collect(),
		data,
		layout,
		config.metric,
		a,
		b,
	);

	ui::success("UMAP reduction complete");

	Ok((model, result))
}

/// Place new points into the space of a previous fit.
///
/// Reference positions are never modified. A point whose path is already a
/// reference point is placed as if it were new, ignoring its old row. The
/// neighbor search compares every point with every usable reference row, so
/// callers bound the cost by the size of the model they pass in.
pub fn transform(
	model: &FittedUmap,
	points: &[(&str, &[f32])],
	config: &UmapConfig,
) -> Result<Placement> {
	if points.is_empty() {
		return Ok(Placement::default());
	}
	if model.is_empty() {
		return Err(StrataError::state("Reducer model has no reference points"));
	}
	if model.metric != config.metric || model.n_components() != config.n_components {
		return Err(StrataError::state(
			"Reducer model was fitted with a different metric or output dimension",
		));
	}

	check_points(points, Some(model.dim()))?;

	ui::debug(&format!(
		"Placing {} notes into an existing {}-point layout",
		points.len(),
		model.len()
	));

	let queries = to_matrix(points, model.metric);
	let exclude: Vec<Option<usize>> = points
		.iter()
		.map(|(path, _)| model.index.get(*path).copied())
		.collect();

	let available = model.len() - usize::from(exclude.iter().any(Option::is_some));
	if available == 0 {
		return Err(StrataError::state(
			"Reducer model has no usable reference points",
		));
	}
	let n_neighbors = config.n_neighbors.min(available);
	let distance_evaluations =
		points.len() * model.len() - exclude.iter().filter(|e| e.is_some()).count();

	let (knn_indices, knn_distances) = compute_knn(
		queries.view(),
		model.data.view(),
		n_neighbors,
		model.metric,
		&exclude,
		false,
	);

	let n_epochs = (config.epochs_for(model.len()) / 3).max(1);
	let n_components = model.n_components();
	let mut edges = Vec::new();
	let mut layout = Array2::<f32>::zeros((points.len(), n_components));

	for (i, (indices, dists)) in knn_indices.iter().zip(knn_distances.iter()).enumerate() {
		let (sigma, rho) = smooth_knn_dist(dists, n_neighbors);
		let weights: Vec<f32> = dists.iter().map(|&d| membership(d, sigma, rho)).collect();
		let total: f32 = weights.iter().sum();

		// Start at the weighted mean of the neighbors' positions
		for (&j, &w) in indices.iter().zip(weights.iter()) {
			let share = if total > 0.0 {
				w / total
			} else {
				1.0 / indices.len() as f32
			};
			for c in 0..n_components {
				layout[[i, c]] += share * model.layout[[j, c]];
			}
			edges.push(Edge {
				head: i,
				tail: j,
				weight: w,
			});
		}
	}
	prune_weak_edges(&mut edges, n_epochs);

	let mut rng = make_rng(config.seed.map(|s| s ^ TRANSFORM_SEED_SALT));
	let params = SgdParams::new(config, model.a, model.b, n_epochs);
	optimize_layout(&mut layout, Some(model.layout.view()), &edges, &params, &mut rng);

	if layout.iter().any(|v| !v.is_finite()) {
		return Err(StrataError::computation(
			"UMAP transform diverged to non-finite values",
		));
	}

	Ok(Placement {
		points: points
			.iter()
			.enumerate()
			.map(|(i, (path, _))| (path.to_string(), layout.row(i).to_vec()))
			.collect(),
		distance_evaluations,
	})
}

/// Shared dimension of the points, or a data error
fn check_points(points: &[(&str, &[f32])], expected_dim: Option<usize>) -> Result<usize> {
	let dim = match (expected_dim, points.first()) {
		(Some(d), _) => d,
		(None, Some((_, first))) => first.len(),
		(None, None) => return Ok(0),
	};

	let mut seen = HashSet::with_capacity(points.len());
	for (path, values) in points {
		if values.len() != dim {
			return Err(StrataError::data(format!(
				"Dimension mismatch for {}: expected {}, got {}",
				path,
				dim,
				values.len()
			)));
		}
		if values.iter().any(|v| !v.is_finite()) {
			return Err(StrataError::data(format!(
				"Non-finite value in embedding for {}",
				path
			)));
		}
		if !seen.insert(*path) {
			return Err(StrataError::data(format!("Duplicate note path: {}", path)));
		}
	}

	Ok(dim)
}

/// Copy points into a row-major matrix, unit-normalizing rows for cosine
fn to_matrix(points: &[(&str, &[f32])], metric: Metric) -> Array2<f32> {
	let n_features = points.first().map(|(_, v)| v.len()).unwrap_or(0);
	let mut data = Array2::<f32>::zeros((points.len(), n_features));
	for (i, (_, values)) in points.iter().enumerate() {
		let row = match metric {
			Metric::Cosine => embedding::normalize(values),
			Metric::Euclidean => values.to_vec(),
		};
		for (j, val) in row.into_iter().enumerate() {
			data[[i, j]] = val;
		}
	}

	data
}

fn pair_distance(metric: Metric, a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
	match metric {
		// Rows are already unit length (or zero, which reads as distance 1)
		Metric::Cosine => (1.0 - a.dot(&b)).max(0.0),
		Metric::Euclidean => a
			.iter()
			.zip(b.iter())
			.map(|(x, y)| (x - y) * (x - y))
			.sum::<f32>()
			.sqrt(),
	}
}

type KnnResult = (Vec<Vec<usize>>, Vec<Vec<f32>>);

/// Brute-force K-nearest neighbors of each query row among `reference` rows.
///
/// With `self_query` the query and reference are the same matrix and a row is
/// never its own neighbor. `exclude[i]` hides one reference row from query `i`.
fn compute_knn(
	queries: ArrayView2<f32>,
	reference: ArrayView2<f32>,
	k: usize,
	metric: Metric,
	exclude: &[Option<usize>],
	self_query: bool,
) -> KnnResult {
	let n_queries = queries.nrows();
	let n_reference = reference.nrows();

	ui::debug(&format!(
		"Computing KNN (brute force) for {} queries against {} points, k={}",
		n_queries, n_reference, k
	));

	let results: Vec<(Vec<usize>, Vec<f32>)> = (0..n_queries)
		.into_par_iter()
		.map(|i| {
			let query = queries.row(i);
			let mut distances: Vec<(usize, f32)> = (0..n_reference)
				.filter(|&j| !(self_query && i == j) && exclude[i] != Some(j))
				.map(|j| (j, pair_distance(metric, query, reference.row(j))))
				.collect();

			// Stable sort keeps ties in index order, so runs are reproducible
			distances.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
			distances.truncate(k);

			distances.into_iter().unzip()
		})
		.collect();

	results.into_iter().unzip()
}

/// Per-point bandwidth `sigma` and nearest-neighbor offset `rho`.
///
/// `sigma` is found by bisection so that the memberships of the `k`
/// neighbors sum to `log2(k)`.
fn smooth_knn_dist(dists: &[f32], k: usize) -> (f32, f32) {
	if dists.is_empty() {
		return (1.0, 0.0);
	}

	let target = (k.max(1) as f32).log2();
	let rho = dists.iter().copied().find(|&d| d > 0.0).unwrap_or(0.0);

	let mut lo = 0.0f32;
	let mut hi = f32::INFINITY;
	let mut sigma = 1.0f32;

	for _ in 0..SIGMA_SEARCH_STEPS {
		let psum: f32 = dists.iter().map(|&d| membership(d, sigma, rho)).sum();

		if (psum - target).abs() < SIGMA_TOLERANCE {
			break;
		}

		if psum > target {
			hi = sigma;
			sigma = (lo + hi) / 2.0;
		} else {
			lo = sigma;
			sigma = if hi.is_finite() { (lo + hi) / 2.0 } else { sigma * 2.0 };
		}
	}

	let mean = dists.iter().sum::<f32>() / dists.len() as f32;
	let sigma = sigma.max(MIN_SIGMA_SCALE * mean).max(MIN_SIGMA);

	(sigma, rho)
}

fn membership(d: f32, sigma: f32, rho: f32) -> f32 {
	let excess = d - rho;
	if excess <= 0.0 {
		1.0
	} else {
		(-excess / sigma).exp()
	}
}

#[derive(Debug, Clone, Copy)]
struct Edge {
	head: usize,
	tail: usize,
	weight: f32,
}

/// Symmetrized neighbor graph as directed edges in both directions.
///
/// Directed memberships `w(i→j)` and `w(j→i)` are combined with the fuzzy
/// union `a + b - a·b`.
fn fuzzy_simplicial_set(
	knn_indices: &[Vec<usize>],
	knn_distances: &[Vec<f32>],
	k: usize,
	n_epochs: usize,
) -> Vec<Edge> {
	// (low, high) -> (w(low→high), w(high→low))
	let mut pairs: BTreeMap<(usize, usize), (f32, f32)> = BTreeMap::new();

	for (i, (indices, dists)) in knn_indices.iter().zip(knn_distances.iter()).enumerate() {
		let (sigma, rho) = smooth_knn_dist(dists, k);
		for (&j, &d) in indices.iter().zip(dists.iter()) {
			let w = membership(d, sigma, rho);
			if i < j {
				pairs.entry((i, j)).or_insert((0.0, 0.0)).0 = w;
			} else {
				pairs.entry((j, i)).or_insert((0.0, 0.0)).1 = w;
			}
		}
	}

	let mut edges = Vec::with_capacity(pairs.len() * 2);
	for ((i, j), (forward, backward)) in pairs {
		let weight = forward + backward - forward * backward;
		edges.push(Edge { head: i, tail: j, weight });
		edges.push(Edge { head: j, tail: i, weight });
	}

	prune_weak_edges(&mut edges, n_epochs);
	edges
}

/// Drop edges that would not be sampled once during the epoch budget
fn prune_weak_edges(edges: &mut Vec<Edge>, n_epochs: usize) {
	let max_weight = edges.iter().map(|e| e.weight).fold(0.0f32, f32::max);
	let floor = max_weight / n_epochs.max(1) as f32;
	edges.retain(|e| e.weight > 0.0 && e.weight >= floor);
}

/// Fit `1 / (1 + a·x^(2b))` to the target membership curve for `min_dist`.
///
/// Least squares over a coarse-to-fine grid; deterministic and cheap.
pub fn find_ab_params(spread: f32, min_dist: f32) -> (f32, f32) {
	let xs: Vec<f32> = (1..=300).map(|i| i as f32 * spread * 3.0 / 300.0).collect();
	let ys: Vec<f32> = xs
		.iter()
		.map(|&x| {
			if x < min_dist {
				1.0
			} else {
				(-(x - min_dist) / spread).exp()
			}
		})
		.collect();

	let loss = |a: f32, b: f32| -> f32 {
		xs.iter()
			.zip(ys.iter())
			.map(|(&x, &y)| {
				let p = 1.0 / (1.0 + a * x.powf(2.0 * b));
				(p - y) * (p - y)
			})
			.sum()
	};

	let (mut a_lo, mut a_hi, mut b_lo, mut b_hi) = (0.01f32, 10.0f32, 0.1f32, 3.0f32);
	let mut best = (1.0f32, 1.0f32, loss(1.0, 1.0));
	let steps = 40;

	for _ in 0..5 {
		for i in 0..=steps {
			let a = a_lo + (a_hi - a_lo) * i as f32 / steps as f32;
			for j in 0..=steps {
				let b = b_lo + (b_hi - b_lo) * j as f32 / steps as f32;
				let l = loss(a, b);
				if l < best.2 {
					best = (a, b, l);
				}
			}
		}

		let a_span = (a_hi - a_lo) / 10.0;
		let b_span = (b_hi - b_lo) / 10.0;
		a_lo = (best.0 - a_span).max(1e-3);
		a_hi = best.0 + a_span;
		b_lo = (best.1 - b_span).max(1e-2);
		b_hi = best.1 + b_span;
	}

	(best.0, best.1)
}

fn make_rng(seed: Option<u64>) -> StdRng {
	match seed {
		Some(seed) => StdRng::seed_from_u64(seed),
		None => StdRng::from_os_rng(),
	}
}

/// Initialize embedding with random values in range [-10, 10]
fn initialize_embedding(n_samples: usize, n_components: usize, rng: &mut StdRng) -> Array2<f32> {
	let mut init = Array2::<f32>::zeros((n_samples, n_components));
	for v in init.iter_mut() {
		*v = rng.random_range(-UMAP_INIT_RANGE..UMAP_INIT_RANGE);
	}
	init
}

struct SgdParams {
	a: f32,
	b: f32,
	learning_rate: f32,
	negative_sample_rate: usize,
	n_epochs: usize,
}

impl SgdParams {
	fn new(config: &UmapConfig, a: f32, b: f32, n_epochs: usize) -> Self {
		Self {
			a,
			b,
			learning_rate: config.learning_rate,
			negative_sample_rate: config.negative_sample_rate,
			n_epochs,
		}
	}
}

fn clip(v: f32) -> f32 {
	v.clamp(-GRAD_CLIP, GRAD_CLIP)
}

/// Stochastic force-directed layout.
///
/// Edge heads always index `layout`. With `fixed = None` tails index `layout`
/// too and both endpoints move (fit). With `fixed = Some(reference)` tails and
/// negative samples come from the reference layout, which never moves
/// (transform).
fn optimize_layout(
	layout: &mut Array2<f32>,
	fixed: Option<ArrayView2<f32>>,
	edges: &[Edge],
	params: &SgdParams,
	rng: &mut StdRng,
) {
	if edges.is_empty() {
		return;
	}

	let dim = layout.ncols();
	let n_negative_pool = fixed.map(|f| f.nrows()).unwrap_or(layout.nrows());
	let (a, b) = (params.a, params.b);

	let max_weight = edges.iter().map(|e| e.weight).fold(0.0f32, f32::max);
	let epochs_per_sample: Vec<f32> = edges.iter().map(|e| max_weight / e.weight).collect();
	let neg_rate = params.negative_sample_rate.max(1) as f32;
	let epochs_per_negative: Vec<f32> = epochs_per_sample.iter().map(|e| e / neg_rate).collect();
	let mut next_sample = epochs_per_sample.clone();
	let mut next_negative = epochs_per_negative.clone();

	let mut current = vec![0.0f32; dim];
	let mut other = vec![0.0f32; dim];

	for epoch in 0..params.n_epochs {
		let alpha = params.learning_rate * (1.0 - epoch as f32 / params.n_epochs as f32);
		let epoch_f = epoch as f32;

		for (e, edge) in edges.iter().enumerate() {
			if next_sample[e] > epoch_f {
				continue;
			}

			let j = edge.head;
			let k = edge.tail;

			for d in 0..dim {
				current[d] = layout[[j, d]];
				other[d] = match fixed {
					Some(reference) => reference[[k, d]],
					None => layout[[k, d]],
				};
			}

			let dist_sq: f32 = current.iter().zip(other.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
			if dist_sq > 0.0 {
				let coeff = (-2.0 * a * b * dist_sq.powf(b - 1.0)) / (a * dist_sq.powf(b) + 1.0);
				for d in 0..dim {
					let grad = clip(coeff * (current[d] - other[d]));
					current[d] += grad * alpha;
					if fixed.is_none() {
						layout[[k, d]] -= grad * alpha;
					}
				}
			}

			next_sample[e] += epochs_per_sample[e];

			let n_negative = ((epoch_f - next_negative[e]) / epochs_per_negative[e]) as usize;
			for _ in 0..n_negative {
				let s = rng.random_range(0..n_negative_pool);
				if fixed.is_none() && s == j {
					continue;
				}

				let mut dist_sq = 0.0f32;
				for d in 0..dim {
					let o = match fixed {
						Some(reference) => reference[[s, d]],
						None => layout[[s, d]],
					};
					other[d] = o;
					dist_sq += (current[d] - o) * (current[d] - o);
				}

				let coeff = if dist_sq > 0.0 {
					(2.0 * b) / ((REPULSION_EPSILON + dist_sq) * (a * dist_sq.powf(b) + 1.0))
				} else {
					0.0
				};
				for d in 0..dim {
					let grad = if coeff > 0.0 {
						clip(coeff * (current[d] - other[d]))
					} else {
						GRAD_CLIP
					};
					current[d] += grad * alpha;
				}
			}
			next_negative[e] += n_negative as f32 * epochs_per_negative[e];

			for d in 0..dim {
				layout[[j, d]] = current[d];
			}
		}
	}
}
