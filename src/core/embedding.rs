//! Vector primitives shared by the reducer, the clusterer and the updater

use crate::config::Metric;

/// Dot product of two equally sized vectors
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
	a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn norm(v: &[f32]) -> f32 {
	dot(v, v).sqrt()
}

/// Scale to unit length; zero vectors are returned unchanged
pub fn normalize(v: &[f32]) -> Vec<f32> {
	let n = norm(v);
	if n > 0.0 {
		v.iter().map(|x| x / n).collect()
	} else {
		v.to_vec()
	}
}

/// Cosine similarity in [-1.0, 1.0]
///
/// Returns 0.0 when either vector has zero length, so a degenerate vector is
/// never "similar" to anything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
	let na = norm(a);
	let nb = norm(b);
	if na == 0.0 || nb == 0.0 {
		return 0.0;
	}
	(dot(a, b) / (na * nb)).clamp(-1.0, 1.0)
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
	a.iter()
		.zip(b.iter())
		.map(|(x, y)| (x - y) * (x - y))
		.sum::<f32>()
		.sqrt()
}

/// Distance under the configured neighbor-graph metric
pub fn distance(metric: Metric, a: &[f32], b: &[f32]) -> f32 {
	match metric {
		Metric::Cosine => (1.0 - cosine_similarity(a, b)).max(0.0),
		Metric::Euclidean => euclidean_distance(a, b),
	}
}
