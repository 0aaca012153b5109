//! Convolution blocks and the anchor-based detection head of a YOLO network.

mod common;
pub mod bottleneck;
pub mod c3_layer;
pub mod conv_layer;
pub mod detect;
pub mod sppf;

pub use bottleneck::*;
pub use c3_layer::*;
pub use conv_layer::*;
pub use detect::*;
pub use sppf::*;
pub use tch_act::Activation;
