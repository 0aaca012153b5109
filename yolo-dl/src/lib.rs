//! A YOLO detector assembled from the tch-modules building blocks.

mod common;
pub mod config;
pub mod model;

pub use config::*;
pub use model::*;
pub use tch_modules::{DetectError, DetectMode, DetectOutput};
