pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use itertools::Itertools as _;
pub use log::{debug, error, info};
pub use noisy_float::prelude::*;
pub use std::borrow::Borrow;
pub use tch::{
    nn::{self, ModuleT},
    Device, IndexOp, Kind, TchError, Tensor,
};
pub use tch_act::{Activation, TensorActivationExt as _};
