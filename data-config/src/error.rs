use std::{io, path::PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("failed to read dataset config '{}'", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse dataset config")]
    Parse(#[from] serde_yaml::Error),
    #[error("'class_names' does not exist in the dataset config")]
    MissingClassNames,
    #[error("class names and number of classes are different: {actual} names but {expect} classes")]
    ClassCountMismatch { expect: usize, actual: usize },
    #[error("'{key}' does not exist in the dataset config")]
    MissingDir { key: &'static str },
    #[error("unable to determine the current directory")]
    CurrentDir(#[source] io::Error),
}
