//! # Command Implementations
//!
//! Each submodule handles one CLI command (cluster, show, clean).

pub mod clean;
pub mod cluster;
pub mod show;
