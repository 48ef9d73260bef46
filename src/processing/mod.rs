//! Clustering stages and the pipeline that runs them

pub mod centroid;
pub mod enrich;
pub mod hdbscan;
pub mod incremental;
pub mod pipeline;
pub mod umap;

pub use centroid::{compute_centroid, find_nearest_centroid, select_representatives};
pub use enrich::Enricher;
pub use incremental::{
	apply_incremental_update, assign_notes_to_clusters, detect_changes, reference_candidates,
	update_clustering_state, Assignment, ChangeSet, UpdateReport,
};
pub use pipeline::{ClusteringPipeline, RunOutput, Stage};
pub use umap::{FittedUmap, Placement, ReducedPoint, ReducerState};
