use anyhow::{Context, Result};
use clap::Parser;
use data_config::{DataConfig, DIR_KEYS};
use log::info;
use prettytable::{cell, row, Table};
use std::path::{Path, PathBuf};
use tch::{nn, Tensor};
use yolo_dl::{DetectMode, ModelConfig, YoloModel};

#[derive(Debug, Clone, Parser)]
/// Inspect dataset configs and YOLO model layouts.
enum Opts {
    /// Check the class count and resolve the dataset directories of a YAML config.
    CheckData {
        /// dataset YAML file
        config_file: PathBuf,
        /// expected number of classes
        #[clap(long)]
        num_classes: usize,
        /// directory that relative dataset paths are resolved against
        #[clap(long)]
        root: Option<PathBuf>,
    },
    /// Build a model, infer its strides and run one inference pass.
    DryRun {
        /// model JSON5 file; the default layout is used if omitted
        #[clap(long)]
        config: Option<PathBuf>,
        #[clap(long, default_value = "1")]
        batch_size: i64,
    },
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    match Opts::parse() {
        Opts::CheckData {
            config_file,
            num_classes,
            root,
        } => {
            let root = root.unwrap_or_else(DataConfig::repo_root);
            check_data(config_file, num_classes, root)?;
        }
        Opts::DryRun { config, batch_size } => {
            dry_run(config, batch_size)?;
        }
    }

    Ok(())
}

fn check_data(config_file: impl AsRef<Path>, num_classes: usize, root: PathBuf) -> Result<()> {
    let config_file = config_file.as_ref();
    let config = DataConfig::load(config_file)
        .with_context(|| format!("unable to load '{}'", config_file.display()))?;

    assert_eq!(
        config.class_names().len(),
        num_classes,
        "the number of class names does not match the number of classes"
    );
    let datasets = config.create_datasets(num_classes, &root)?;

    // print dataset information
    {
        let mut table = Table::new();
        table.add_row(row!["key", "directory"]);

        DIR_KEYS.iter().for_each(|&key| {
            let dir = datasets
                .dir(key)
                .map(|dir| format!("{}", dir.display()))
                .unwrap_or_else(|| "(not a path)".to_string());
            table.add_row(row![key, dir]);
        });

        table.printstd();
    }

    {
        let mut table = Table::new();
        table.add_row(row!["index", "class name"]);

        datasets
            .class_names()
            .iter()
            .enumerate()
            .for_each(|(index, name)| {
                table.add_row(row![index, name]);
            });

        table.printstd();
    }

    Ok(())
}

fn dry_run(config_file: Option<PathBuf>, batch_size: i64) -> Result<()> {
    let config = match config_file {
        Some(path) => ModelConfig::open(&path)
            .with_context(|| format!("unable to load '{}'", path.display()))?,
        None => ModelConfig::default(),
    };
    anyhow::ensure!(batch_size > 0, "batch size must be positive");

    let vs = nn::VarStore::new(config.device);
    let mut model = YoloModel::new(&vs.root(), &config)?;
    let strides = model.infer_strides()?;

    let size = config.image_size as i64;
    let input = Tensor::zeros(
        &[batch_size, config.input_channels as i64, size, size],
        (tch::Kind::Float, config.device),
    );
    let output = tch::no_grad(|| model.forward_t(&input, DetectMode::inference()))?;
    info!("dry run finished on {:?}", config.device);

    // print per-scale information
    {
        let mut table = Table::new();
        table.add_row(row!["layer", "stride", "raw shape"]);

        let raw = output.raw().unwrap_or(&[]);
        strides
            .iter()
            .zip(raw)
            .enumerate()
            .for_each(|(layer, (stride, xs))| {
                table.add_row(row![layer, stride, format!("{:?}", xs.size())]);
            });

        table.printstd();
    }

    if let Some(detections) = output.detections() {
        println!("detections: {:?}", detections.size());
    }

    Ok(())
}
