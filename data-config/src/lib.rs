//! Dataset configuration wrapper.
//!
//! A dataset is described by a YAML mapping with a `class_names` list and the
//! `train_dir`, `valid_dir` and `test_dir` entries. Relative directories are
//! resolved against a root directory, which defaults to the workspace root.

mod common;
mod config;
mod error;

pub use config::*;
pub use error::*;
