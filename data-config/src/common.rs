pub use log::info;
pub use serde_yaml::{Mapping, Value};
pub use std::{
    env, fs,
    path::{Component, Path, PathBuf},
};
