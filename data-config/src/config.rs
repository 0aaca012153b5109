use crate::{common::*, error::DataError};

/// Directory entries that every dataset config must define.
pub const DIR_KEYS: [&str; 3] = ["train_dir", "valid_dir", "test_dir"];

/// A parsed dataset config.
#[derive(Debug, Clone, PartialEq)]
pub struct DataConfig {
    hyper: Mapping,
    class_names: Vec<String>,
}

impl DataConfig {
    pub fn load<P>(path: P) -> Result<Self, DataError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| DataError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, DataError> {
        let hyper: Mapping = serde_yaml::from_str(text)?;
        let class_names = hyper
            .get(&Value::from("class_names"))
            .ok_or(DataError::MissingClassNames)?;
        let class_names: Vec<String> = serde_yaml::from_value(class_names.clone())?;
        Ok(Self { hyper, class_names })
    }

    /// The workspace root, used as the default base of relative dataset directories.
    pub fn repo_root() -> PathBuf {
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        manifest_dir
            .parent()
            .unwrap_or(manifest_dir)
            .to_path_buf()
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn mapping(&self) -> &Mapping {
        &self.hyper
    }

    /// Checks the class count and resolves the dataset directories against `root`.
    ///
    /// String directories are replaced by absolute paths. Entries of other
    /// types are kept as they are, but all of them must be present and
    /// non-empty.
    pub fn create_datasets<P>(&self, cls_num: usize, root: P) -> Result<Datasets, DataError>
    where
        P: AsRef<Path>,
    {
        let root = root.as_ref();

        if self.class_names.len() != cls_num {
            return Err(DataError::ClassCountMismatch {
                expect: cls_num,
                actual: self.class_names.len(),
            });
        }

        let mut hyper = self.hyper.clone();

        for key in DIR_KEYS {
            let key_value = Value::from(key);
            let entry = hyper
                .get(&key_value)
                .filter(|value| is_truthy(value))
                .ok_or(DataError::MissingDir { key })?;

            if let Some(dir) = entry.as_str().map(str::to_owned) {
                let resolved = resolve_dir(root, &dir)?;
                info!("{}: {}", key, resolved.display());
                hyper.insert(
                    key_value,
                    Value::String(resolved.to_string_lossy().into_owned()),
                );
            }
        }

        Ok(Datasets {
            class_names: self.class_names.clone(),
            hyper,
        })
    }
}

/// Dataset config with resolved directories.
#[derive(Debug, Clone, PartialEq)]
pub struct Datasets {
    class_names: Vec<String>,
    hyper: Mapping,
}

impl Datasets {
    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    /// The directory under `key` if it is a plain path.
    pub fn dir(&self, key: &str) -> Option<&Path> {
        self.hyper
            .get(&Value::from(key))
            .and_then(Value::as_str)
            .map(Path::new)
    }

    pub fn train_dir(&self) -> Option<&Path> {
        self.dir("train_dir")
    }

    pub fn valid_dir(&self) -> Option<&Path> {
        self.dir("valid_dir")
    }

    pub fn test_dir(&self) -> Option<&Path> {
        self.dir("test_dir")
    }

    pub fn mapping(&self) -> &Mapping {
        &self.hyper
    }

    pub fn into_mapping(self) -> Mapping {
        self.hyper
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(value) => *value,
        Value::Number(number) => number.as_f64().map(|value| value != 0.0).unwrap_or(true),
        Value::String(text) => !text.is_empty(),
        Value::Sequence(seq) => !seq.is_empty(),
        Value::Mapping(map) => !map.is_empty(),
    }
}

fn resolve_dir(root: &Path, dir: &str) -> Result<PathBuf, DataError> {
    let joined = root.join(dir);
    let absolute = if joined.is_absolute() {
        joined
    } else {
        env::current_dir()
            .map_err(DataError::CurrentDir)?
            .join(joined)
    };

    // symlinks can only be followed for existing paths
    Ok(fs::canonicalize(&absolute).unwrap_or_else(|_| normalize(&absolute)))
}

fn normalize(path: &Path) -> PathBuf {
    path.components()
        .fold(PathBuf::new(), |mut normalized, component| {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    normalized.pop();
                }
                other => normalized.push(other.as_os_str()),
            }
            normalized
        })
}
