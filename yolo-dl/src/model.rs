use crate::{common::*, config::ModelConfig};
use tch_modules::{
    C3Layer, C3LayerInit, ConvLayer, ConvLayerInit, Detect, DetectInit, DetectMode, DetectOutput,
    Sppf, SppfInit,
};

const BASE_CHANNELS: [usize; 5] = [64, 128, 256, 512, 1024];
const BASE_DEPTHS: [usize; 4] = [3, 6, 9, 3];

/// The YOLO detector: a CSP backbone ending in SPPF and a multi-scale detection head.
#[derive(Debug)]
pub struct YoloModel {
    input_channels: usize,
    image_size: usize,
    device: Device,
    stem: ConvLayer,
    stages: Vec<Stage>,
    sppf: Sppf,
    detect: Detect,
}

/// A stride 2 down-sampling conv followed by a C3 block.
#[derive(Debug)]
struct Stage {
    down: ConvLayer,
    csp: C3Layer,
}

impl YoloModel {
    pub fn new<'p, P>(path: P, config: &ModelConfig) -> Result<Self>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let ModelConfig {
            input_channels,
            num_classes,
            image_size,
            width_multiple,
            depth_multiple,
            ref anchors,
            inplace,
            device,
        } = *config;
        let max_stride = 1 << (BASE_DEPTHS.len() + 1);

        ensure!(input_channels > 0, "input_channels must be positive");
        ensure!(
            width_multiple.raw() > 0.0 && depth_multiple.raw() > 0.0,
            "width_multiple and depth_multiple must be positive"
        );
        ensure!(
            image_size > 0 && image_size % max_stride == 0,
            "image_size {} must be a positive multiple of {}",
            image_size,
            max_stride
        );
        ensure!(
            (1..=BASE_DEPTHS.len()).contains(&anchors.len()),
            "the number of detection layers must be in range 1..={}, but get {}",
            BASE_DEPTHS.len(),
            anchors.len()
        );

        let scale_channel = |channel: usize| -> usize {
            ((channel as f64 * width_multiple.raw() / 8.0).ceil() * 8.0) as usize
        };
        let scale_depth =
            |depth: usize| -> usize { ((depth as f64 * depth_multiple.raw()).round() as usize).max(1) };
        let channels: Vec<_> = BASE_CHANNELS.iter().cloned().map(scale_channel).collect();

        let stem = ConvLayerInit {
            p: Some(2),
            ..ConvLayerInit::new(input_channels, channels[0], 6, 2)
        }
        .build(path / "stem")?;

        let stages: Vec<_> = BASE_DEPTHS
            .iter()
            .enumerate()
            .map(|(index, &depth)| -> Result<_> {
                let in_c = channels[index];
                let out_c = channels[index + 1];
                let path = path / format!("stage_{}", index);
                let down = ConvLayerInit::new(in_c, out_c, 3, 2).build(&path / "down")?;
                let csp = C3LayerInit::new(out_c, out_c, scale_depth(depth)).build(&path / "csp")?;
                Ok(Stage { down, csp })
            })
            .try_collect()?;

        let last_c = channels[channels.len() - 1];
        let sppf = SppfInit::new(last_c, last_c).build(path / "sppf")?;

        let num_layers = anchors.len();
        let detect = DetectInit {
            inplace,
            ..DetectInit::new(
                channels[(channels.len() - num_layers)..].to_vec(),
                num_classes,
                anchors.clone(),
            )
        }
        .build(path / "detect")?;

        info!(
            "built model with channels {:?} and {} detection layers",
            channels, num_layers
        );

        Ok(Self {
            input_channels,
            image_size,
            device,
            stem,
            stages,
            sppf,
            detect,
        })
    }

    pub fn detect(&self) -> &Detect {
        &self.detect
    }

    pub fn detect_mut(&mut self) -> &mut Detect {
        &mut self.detect
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    pub fn forward_t(&mut self, xs: &Tensor, mode: DetectMode) -> Result<DetectOutput> {
        let features = self.features(xs, mode.training)?;
        let output = self.detect.forward(&features, mode)?;
        Ok(output)
    }

    /// Runs the model once on an empty image and assigns the stride of each
    /// detection layer from the ratio of the image size to the feature height.
    pub fn infer_strides(&mut self) -> Result<Vec<f64>> {
        let size = self.image_size as i64;
        let input = Tensor::zeros(
            &[1, self.input_channels as i64, size, size],
            (Kind::Float, self.device),
        );

        let output = tch::no_grad(|| -> Result<_> {
            let features = self.features(&input, false)?;
            Ok(self.detect.forward(&features, DetectMode::train())?)
        })?;
        let raw = output
            .raw()
            .ok_or_else(|| format_err!("the detection head did not return raw outputs"))?;

        let strides: Vec<f64> = raw
            .iter()
            .map(|xs| -> Result<_> {
                let (_b, _a, h, _w, _o) = xs.size5()?;
                Ok(size as f64 / h as f64)
            })
            .try_collect()?;

        info!("inferred detection strides {:?}", strides);
        self.detect.set_stride(strides.clone())?;
        Ok(strides)
    }

    fn features(&self, xs: &Tensor, train: bool) -> Result<Vec<Tensor>> {
        let (_b, c, h, w) = xs.size4()?;
        ensure!(
            c as usize == self.input_channels,
            "expect {} input channels, but get {}",
            self.input_channels,
            c
        );
        if h != w || h as usize != self.image_size {
            warn!(
                "input size {}x{} differs from the configured {}x{}",
                h, w, self.image_size, self.image_size
            );
        }

        let last = self.stages.len() - 1;
        let mut xs = self.stem.forward_t(xs, train);
        let mut features = Vec::with_capacity(self.stages.len());

        for (index, Stage { down, csp }) in self.stages.iter().enumerate() {
            xs = csp.forward_t(&down.forward_t(&xs, train), train);
            if index == last {
                xs = self.sppf.forward_t(&xs, train);
            }
            features.push(xs.shallow_clone());
        }

        let num_layers = self.detect.num_detect_layers();
        Ok(features.split_off(features.len() - num_layers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            num_classes: 3,
            image_size: 64,
            width_multiple: r64(0.125),
            ..Default::default()
        }
    }

    #[test]
    fn model_rejects_unaligned_image_size() {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = ModelConfig {
            image_size: 100,
            ..tiny_config()
        };
        assert!(YoloModel::new(&vs.root(), &config).is_err());
    }

    #[test]
    fn model_rejects_too_many_detection_layers() {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = ModelConfig {
            anchors: vec![vec![10.0, 13.0]; 5],
            ..tiny_config()
        };
        assert!(YoloModel::new(&vs.root(), &config).is_err());
    }

    #[test]
    fn model_inference_requires_strides() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let mut model = YoloModel::new(&vs.root(), &tiny_config())?;
        let input = Tensor::zeros(&[1, 3, 64, 64], tch::kind::FLOAT_CPU);
        assert!(model.forward_t(&input, DetectMode::inference()).is_err());
        Ok(())
    }
}
