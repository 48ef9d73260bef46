//! Error taxonomy for clustering runs

use thiserror::Error;

/// Errors raised by the clustering engine.
///
/// `Configuration` and `Data` are fatal and surface before any state is
/// written. `State` on the incremental path makes the pipeline fall back to
/// a full run. `Computation` inside a single cluster's enrichment is
/// recovered where it happens.
#[derive(Debug, Error)]
pub enum StrataError {
	/// A configuration value is out of range.
	#[error("Configuration error: {message}")]
	Configuration { message: String },

	/// Input embeddings are malformed (dimension mismatch, NaN, duplicates).
	#[error("Data error: {message}")]
	Data { message: String },

	/// The previous clustering state is corrupt or unusable.
	#[error("State error: {message}")]
	State { message: String },

	/// Numerical degeneracy during reduction or enrichment.
	#[error("Computation error: {message}")]
	Computation { message: String },

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Serialization error: {message}")]
	Serialization { message: String },
}

impl StrataError {
	pub fn configuration(message: impl Into<String>) -> Self {
		Self::Configuration {
			message: message.into(),
		}
	}

	pub fn data(message: impl Into<String>) -> Self {
		Self::Data {
			message: message.into(),
		}
	}

	pub fn state(message: impl Into<String>) -> Self {
		Self::State {
			message: message.into(),
		}
	}

	pub fn computation(message: impl Into<String>) -> Self {
		Self::Computation {
			message: message.into(),
		}
	}

	pub fn serialization(message: impl Into<String>) -> Self {
		Self::Serialization {
			message: message.into(),
		}
	}

	/// True for errors that abort a run before anything is persisted
	pub fn is_fatal(&self) -> bool {
		matches!(self, Self::Configuration { .. } | Self::Data { .. })
	}
}

impl From<rmp_serde::encode::Error> for StrataError {
	fn from(e: rmp_serde::encode::Error) -> Self {
		Self::serialization(e.to_string())
	}
}

impl From<rmp_serde::decode::Error> for StrataError {
	fn from(e: rmp_serde::decode::Error) -> Self {
		Self::state(format!("Failed to decode clustering state: {}", e))
	}
}

pub type Result<T> = std::result::Result<T, StrataError>;
