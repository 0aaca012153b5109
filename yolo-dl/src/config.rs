use crate::common::*;

/// Model configuration, usually stored in a JSON5 file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub input_channels: usize,
    pub num_classes: usize,
    /// Side length of the square image used to infer the detection strides.
    pub image_size: usize,
    /// Channel scaling factor applied to the base channel sizes.
    pub width_multiple: R64,
    /// Scaling factor of the number of bottlenecks in each CSP stage.
    pub depth_multiple: R64,
    /// Anchor `(w, h)` pairs in pixels for each detection layer, from the finest to the coarsest.
    pub anchors: Vec<Vec<f64>>,
    #[serde(default = "default_inplace")]
    pub inplace: bool,
    #[serde(with = "tch_serde::serde_device", default = "default_device")]
    pub device: Device,
}

impl ModelConfig {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let text = fs::read_to_string(path)?;
        let config = json5::from_str(&text)?;
        Ok(config)
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            input_channels: 3,
            num_classes: 80,
            image_size: 640,
            width_multiple: r64(0.25),
            depth_multiple: r64(0.33),
            anchors: vec![
                vec![10.0, 13.0, 16.0, 30.0, 33.0, 23.0],
                vec![30.0, 61.0, 62.0, 45.0, 59.0, 119.0],
                vec![116.0, 90.0, 156.0, 198.0, 373.0, 326.0],
            ],
            inplace: default_inplace(),
            device: default_device(),
        }
    }
}

fn default_inplace() -> bool {
    true
}

fn default_device() -> Device {
    Device::Cpu
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_config_defaults_from_json5() -> Result<()> {
        let text = r#"{
            // a two-scale head
            input_channels: 1,
            num_classes: 2,
            image_size: 128,
            width_multiple: 0.125,
            depth_multiple: 0.33,
            anchors: [
                [10, 13, 16, 30],
                [30, 61, 62, 45],
            ],
        }"#;
        let config: ModelConfig = json5::from_str(text)?;
        assert_eq!(config.anchors.len(), 2);
        assert_eq!(config.width_multiple, r64(0.125));
        assert!(config.inplace);
        assert_eq!(config.device, Device::Cpu);
        Ok(())
    }
}
