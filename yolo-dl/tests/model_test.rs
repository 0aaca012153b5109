use anyhow::Result;
use approx::assert_abs_diff_eq;
use lazy_static::lazy_static;
use std::path::PathBuf;
use tch::{kind::FLOAT_CPU, nn, Device, Tensor};
use yolo_dl::{DetectMode, DetectOutput, ModelConfig, YoloModel};

lazy_static! {
    static ref CONFIG_DIR: PathBuf = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("cfg");
}

#[test]
fn infer_three_scale_strides() -> Result<()> {
    let config = ModelConfig::open(CONFIG_DIR.join("tiny.json5"))?;
    let vs = nn::VarStore::new(Device::Cpu);
    let mut model = YoloModel::new(&vs.root(), &config)?;

    let strides = model.infer_strides()?;
    assert_eq!(strides, vec![8.0, 16.0, 32.0]);
    assert_eq!(model.detect().stride(), Some(strides.as_slice()));

    let input = Tensor::randn(&[2, 3, 64, 64], FLOAT_CPU);
    let output = model.forward_t(&input, DetectMode::inference())?;
    let detections = output.detections().unwrap();
    assert_eq!(detections.size(), [2, 3 * (8 * 8 + 4 * 4 + 2 * 2), 8]);
    assert_eq!(output.raw().unwrap().len(), 3);
    Ok(())
}

#[test]
fn two_scale_model_uses_coarsest_features() -> Result<()> {
    let config = ModelConfig::open(CONFIG_DIR.join("two-scale.json5"))?;
    let vs = nn::VarStore::new(Device::Cpu);
    let mut model = YoloModel::new(&vs.root(), &config)?;
    assert!(!model.detect().inplace());

    let strides = model.infer_strides()?;
    assert_eq!(strides, vec![16.0, 32.0]);

    let input = Tensor::randn(&[1, 1, 96, 96], FLOAT_CPU);
    match model.forward_t(&input, DetectMode::export())? {
        DetectOutput::Export(detections) => {
            assert_eq!(detections.size(), [1, 2 * (6 * 6 + 3 * 3), 6]);
        }
        _ => panic!("export mode must return a single tensor"),
    }
    Ok(())
}

#[test]
fn training_mode_returns_raw_maps() -> Result<()> {
    let config = ModelConfig::open(CONFIG_DIR.join("tiny.json5"))?;
    let vs = nn::VarStore::new(Device::Cpu);
    let mut model = YoloModel::new(&vs.root(), &config)?;

    // strides are not needed to train
    let input = Tensor::randn(&[2, 3, 64, 64], FLOAT_CPU);
    let output = model.forward_t(&input, DetectMode::train())?;
    let shapes: Vec<_> = output.raw().unwrap().iter().map(|xs| xs.size()).collect();
    assert_eq!(
        shapes,
        vec![
            vec![2, 3, 8, 8, 8],
            vec![2, 3, 4, 4, 8],
            vec![2, 3, 2, 2, 8],
        ]
    );
    Ok(())
}

#[test]
fn zero_weights_decode_to_cell_centers() -> Result<()> {
    let config = ModelConfig::open(CONFIG_DIR.join("tiny.json5"))?;
    let vs = nn::VarStore::new(Device::Cpu);
    let mut model = YoloModel::new(&vs.root(), &config)?;
    tch::no_grad(|| {
        vs.variables().values_mut().for_each(|var| {
            let _ = var.zero_();
        });
    });
    model.infer_strides()?;

    let input = Tensor::randn(&[1, 3, 64, 64], FLOAT_CPU);
    let output = model.forward_t(&input, DetectMode::inference())?;
    let detections = output.detections().unwrap();

    // first layer is 8x8 with stride 8; anchor 0 at row 2, column 5
    let index = 2 * 8 + 5;
    let value = |slot: i64| detections.double_value(&[0, index, slot]);
    assert_abs_diff_eq!(value(0), (5.0 + 0.5) * 8.0, epsilon = 1e-4);
    assert_abs_diff_eq!(value(1), (2.0 + 0.5) * 8.0, epsilon = 1e-4);
    assert_abs_diff_eq!(value(2), config.anchors[0][0] * 8.0, epsilon = 1e-3);
    assert_abs_diff_eq!(value(3), config.anchors[0][1] * 8.0, epsilon = 1e-3);
    assert_abs_diff_eq!(value(4), 0.5, epsilon = 1e-6);
    Ok(())
}

#[test]
fn missing_config_file_fails() {
    assert!(ModelConfig::open(CONFIG_DIR.join("missing.json5")).is_err());
}
