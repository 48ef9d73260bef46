//! HDBSCAN density clustering over reduced points

use std::collections::HashMap;

use hdbscan::{Hdbscan, HdbscanHyperParams};

use crate::config::HdbscanConfig;
use crate::error::{Result, StrataError};
use crate::ui;

/// Label of a point that belongs to no cluster
pub const NOISE: i32 = -1;

/// Assign one label per point, `-1` for noise.
///
/// The root of the hierarchy only becomes a cluster when no split produced
/// clusters of its own. Labels are dense, numbered in order of first
/// appearance by point index, and mean nothing outside this call.
pub fn cluster(points: &[Vec<f32>], config: &HdbscanConfig) -> Result<Vec<i32>> {
	let n = points.len();
	let min_cluster_size = config.min_cluster_size.max(2);

	if n < min_cluster_size {
		ui::debug(&format!(
			"{} points is below minClusterSize {}, everything is noise",
			n, config.min_cluster_size
		));
		return Ok(vec![NOISE; n]);
	}

	// The crate panics on NaN while sorting distances
	if let Some(i) = points.iter().position(|p| p.iter().any(|v| !v.is_finite())) {
		return Err(StrataError::computation(format!(
			"Reduced point {} has a non-finite coordinate",
			i
		)));
	}

	let min_samples = config.min_samples.clamp(1, n - 1);
	ui::debug(&format!(
		"HDBSCAN on {} points (minClusterSize {}, minSamples {})",
		n, min_cluster_size, min_samples
	));

	let labels = run(points, min_cluster_size, min_samples, false)?;
	if labels.iter().any(|&l| l != NOISE) {
		return Ok(renumber(&labels));
	}

	ui::debug("No split survived, trying the whole set as one cluster");
	let labels = run(points, min_cluster_size, min_samples, true)?;
	Ok(renumber(&labels))
}

fn run(
	points: &[Vec<f32>],
	min_cluster_size: usize,
	min_samples: usize,
	allow_single_cluster: bool,
) -> Result<Vec<i32>> {
	// The crate counts a point as its own first neighbor
	let hyper_params = HdbscanHyperParams::builder()
		.min_cluster_size(min_cluster_size)
		.min_samples(min_samples + 1)
		.allow_single_cluster(allow_single_cluster)
		.build();

	let clusterer = Hdbscan::new(points, hyper_params);
	let labels = clusterer
		.cluster()
		.map_err(|e| StrataError::computation(format!("HDBSCAN clustering failed: {:?}", e)))?;

	if labels.len() != points.len() {
		return Err(StrataError::computation(format!(
			"HDBSCAN returned {} labels for {} points",
			labels.len(),
			points.len()
		)));
	}

	Ok(labels)
}

/// Dense labels in order of first appearance; noise stays noise
fn renumber(labels: &[i32]) -> Vec<i32> {
	let mut mapping: HashMap<i32, i32> = HashMap::new();
	labels
		.iter()
		.map(|&label| {
			if label < 0 {
				NOISE
			} else {
				let next = mapping.len() as i32;
				*mapping.entry(label).or_insert(next)
			}
		})
		.collect()
}
