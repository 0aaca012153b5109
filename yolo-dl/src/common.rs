pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use itertools::Itertools as _;
pub use log::{info, warn};
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Borrow,
    fs,
    path::{Path, PathBuf},
};
pub use tch::{
    nn::{self, ModuleT as _},
    Device, Kind, Tensor,
};
