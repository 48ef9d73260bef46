//! # User Interface
//!
//! Colored progress output on stderr, so stdout stays free for `--export -`.

pub mod log;

pub use log::{debug, error, header, info, path_link, print_logo, success, warn, Log};
