//! Centroids and representative notes

use crate::core::embedding::{cosine_similarity, euclidean_distance};
use crate::error::{Result, StrataError};

/// Elementwise mean of equally sized vectors
pub fn compute_centroid(vectors: &[&[f32]]) -> Result<Vec<f32>> {
	let Some(first) = vectors.first() else {
		return Err(StrataError::computation("Cannot compute the centroid of no vectors"));
	};

	let dim = first.len();
	let mut centroid = vec![0.0f32; dim];

	for v in vectors {
		if v.len() != dim {
			return Err(StrataError::computation(format!(
				"Centroid input has dimension {}, expected {}",
				v.len(),
				dim
			)));
		}
		for (acc, &val) in centroid.iter_mut().zip(v.iter()) {
			*acc += val;
		}
	}

	let n = vectors.len() as f32;
	for val in &mut centroid {
		*val /= n;
	}

	Ok(centroid)
}

/// Indices of up to `k` members closest to the centroid, closest first.
///
/// Ties keep the members' original order.
pub fn select_representatives(members: &[&[f32]], centroid: &[f32], k: usize) -> Vec<usize> {
	let mut ranked: Vec<(usize, f32)> = members
		.iter()
		.enumerate()
		.map(|(i, m)| (i, euclidean_distance(m, centroid)))
		.collect();

	ranked.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
	ranked.truncate(k);

	ranked.into_iter().map(|(i, _)| i).collect()
}

/// Cluster id with the most similar centroid, and that similarity.
///
/// Ties go to the earlier centroid. `None` when there are no centroids.
pub fn find_nearest_centroid(point: &[f32], centroids: &[(usize, &[f32])]) -> Option<(usize, f32)> {
	let mut best: Option<(usize, f32)> = None;

	for &(id, centroid) in centroids {
		let similarity = cosine_similarity(point, centroid);
		let better = match best {
			Some((_, s)) => similarity > s,
			None => true,
		};
		if better {
			best = Some((id, similarity));
		}
	}

	best
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_centroid_is_mean() {
		let a = [1.0f32, 2.0];
		let b = [3.0f32, 6.0];
		let centroid = compute_centroid(&[&a[..], &b[..]]).unwrap();
		assert_eq!(centroid, vec![2.0, 4.0]);
	}

	#[test]
	fn test_centroid_of_nothing_fails() {
		assert!(matches!(
			compute_centroid(&[]),
			Err(StrataError::Computation { .. })
		));
	}

	#[test]
	fn test_representatives_closest_first() {
		let data = [[5.0f32, 0.0], [1.0, 0.0], [0.0, 0.0], [2.0, 0.0]];
		let members: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();
		let reps = select_representatives(&members, &[0.0, 0.0], 3);
		assert_eq!(reps, vec![2, 1, 3]);
	}

	#[test]
	fn test_representative_ties_keep_order() {
		let data = [[1.0f32, 0.0], [0.0, 1.0], [-1.0, 0.0]];
		let members: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();
		let reps = select_representatives(&members, &[0.0, 0.0], 5);
		assert_eq!(reps, vec![0, 1, 2]);
	}

	#[test]
	fn test_nearest_centroid() {
		let a = [1.0f32, 0.0];
		let b = [0.0f32, 1.0];
		let centroids: Vec<(usize, &[f32])> = vec![(4, &a[..]), (9, &b[..])];

		let (id, sim) = find_nearest_centroid(&[0.1, 0.9], &centroids).unwrap();
		assert_eq!(id, 9);
		assert!(sim > 0.9);

		assert!(find_nearest_centroid(&[1.0, 0.0], &[]).is_none());
	}
}
