//! State persistence and corpus input

pub mod corpus;
pub mod state;

pub use corpus::{load_corpus, Corpus};
pub use state::{FileStateStore, MemoryStateStore, StateStore};
