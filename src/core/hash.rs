//! Content fingerprints for change detection

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

/// Hex-encoded xxh3 fingerprint of a note's content
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
	/// Hash raw note content
	pub fn compute(content: &[u8]) -> Self {
		Self(format!("{:016x}", xxh3_64(content)))
	}

	/// Wrap a fingerprint supplied by the embedding provider
	pub fn from_string(hash: impl Into<String>) -> Self {
		Self(hash.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Display for ContentHash {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<&str> for ContentHash {
	fn from(s: &str) -> Self {
		Self(s.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_same_content_same_hash() {
		let a = ContentHash::compute(b"# Fourier series\nnotes");
		let b = ContentHash::compute(b"# Fourier series\nnotes");
		let c = ContentHash::compute(b"# Fourier series\nnotes!");

		assert_eq!(a, b);
		assert_ne!(a, c);
		assert_eq!(a.as_str().len(), 16);
	}

	#[test]
	fn test_provider_hashes_are_kept_verbatim() {
		assert_eq!(ContentHash::from("abc").as_str(), "abc");
		assert_eq!(ContentHash::from_string("abc"), ContentHash::from("abc"));
	}
}
