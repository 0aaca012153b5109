//! The multi-scale, anchor-based detection head.
//!
//! Each detection layer owns a 1x1 projection producing
//! `num_anchors * (5 + num_classes)` channels. In inference mode the
//! projected logits are decoded into absolute boxes using a per-layer grid
//! of cell coordinates and a grid of anchor sizes scaled by the stride.
//! The output slots of every box are `x, y, w, h, objectness, class_1..class_n`.

use crate::common::*;

pub use error::*;
pub use mode::*;

mod error {
    use super::*;

    /// Failures of the detection head, tagged by the stage that failed.
    #[derive(Debug, thiserror::Error)]
    pub enum DetectError {
        #[error("Detect: construction failed: {reason}")]
        Construction { reason: String },
        #[error("Detect: expect {expect} feature maps, but get {actual}")]
        LayerCount { expect: usize, actual: usize },
        #[error("Detect: shape mismatch at detection layer {layer}: {reason}")]
        ShapeMismatch { layer: usize, reason: String },
        #[error("Detect: stride is not assigned before inference")]
        StrideUnset,
        #[error("Detect: invalid stride: {reason}")]
        InvalidStride { reason: String },
        #[error("Detect: failed to build grid for detection layer {layer}")]
        Grid {
            layer: usize,
            #[source]
            source: TchError,
        },
        #[error("Detect: failed to decode detection layer {layer}")]
        Decode {
            layer: usize,
            #[source]
            source: TchError,
        },
        #[error("Detect: failed to merge decoded detections")]
        Merge {
            #[source]
            source: TchError,
        },
    }

    /// Logs a failed stage together with its cause before handing the error back.
    pub(super) fn log_failure<T>(
        stage: &str,
        result: Result<T, DetectError>,
    ) -> Result<T, DetectError> {
        if let Err(err) = &result {
            error!("{} failed: {:?}", stage, err);
        }
        result
    }
}

mod mode {
    /// Per-call switches of [Detect::forward](super::Detect::forward).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DetectMode {
        /// Return the raw per-layer logits without decoding.
        pub training: bool,
        /// Return only the merged detections.
        pub export: bool,
        /// Rebuild the grids on every call.
        pub dynamic: bool,
    }

    impl DetectMode {
        pub fn train() -> Self {
            Self {
                training: true,
                ..Default::default()
            }
        }

        pub fn inference() -> Self {
            Self::default()
        }

        pub fn export() -> Self {
            Self {
                export: true,
                ..Default::default()
            }
        }

        pub fn with_dynamic(self, dynamic: bool) -> Self {
            Self { dynamic, ..self }
        }
    }
}

/// The output of [Detect::forward].
#[derive(Debug)]
pub enum DetectOutput {
    /// Raw logits of each layer in `[batch, anchors, height, width, outputs]` layout.
    Train(Vec<Tensor>),
    /// Decoded detections of all layers in `[batch, boxes, outputs]` layout.
    Export(Tensor),
    /// Both the decoded detections and the raw logits.
    Inference {
        detections: Tensor,
        raw: Vec<Tensor>,
    },
}

impl DetectOutput {
    pub fn detections(&self) -> Option<&Tensor> {
        match self {
            Self::Train(_) => None,
            Self::Export(detections) => Some(detections),
            Self::Inference { detections, .. } => Some(detections),
        }
    }

    pub fn raw(&self) -> Option<&[Tensor]> {
        match self {
            Self::Train(raw) => Some(raw),
            Self::Export(_) => None,
            Self::Inference { raw, .. } => Some(raw),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectInit {
    /// Input channels of each detection layer.
    pub in_channels: Vec<usize>,
    pub num_classes: usize,
    /// Flattened `(w, h)` anchor pairs in pixels, one list per detection layer.
    pub anchors: Vec<Vec<f64>>,
    /// Write decoded boxes into the activated logits instead of concatenating new tensors.
    pub inplace: bool,
}

impl DetectInit {
    pub fn new(in_channels: Vec<usize>, num_classes: usize, anchors: Vec<Vec<f64>>) -> Self {
        Self {
            in_channels,
            num_classes,
            anchors,
            inplace: true,
        }
    }

    pub fn build<'p, P>(self, path: P) -> Result<Detect, DetectError>
    where
        P: Borrow<nn::Path<'p>>,
    {
        log_failure("Detect-init", self.build_inner(path.borrow()))
    }

    fn build_inner(self, path: &nn::Path) -> Result<Detect, DetectError> {
        let Self {
            in_channels,
            num_classes,
            anchors,
            inplace,
        } = self;

        let construction = |reason: String| DetectError::Construction { reason };

        let first = anchors
            .first()
            .ok_or_else(|| construction("at least one detection layer is required".into()))?;
        if first.is_empty() || first.len() % 2 != 0 {
            return Err(construction(format!(
                "anchors of layer 0 must be non-empty (w, h) pairs, but get {} values",
                first.len()
            )));
        }
        if let Some((layer, list)) = anchors
            .iter()
            .enumerate()
            .find(|(_, list)| list.len() != first.len())
        {
            return Err(construction(format!(
                "layer {} has {} anchor values while layer 0 has {}",
                layer,
                list.len(),
                first.len()
            )));
        }
        if anchors
            .iter()
            .flatten()
            .any(|&value| !(value.is_finite() && value > 0.0))
        {
            return Err(construction(
                "anchor sizes must be finite and positive".into(),
            ));
        }
        if in_channels.len() != anchors.len() {
            return Err(construction(format!(
                "{} input channel counts for {} detection layers",
                in_channels.len(),
                anchors.len()
            )));
        }
        if let Some(layer) = in_channels.iter().position(|&in_c| in_c == 0) {
            return Err(construction(format!(
                "layer {} has zero input channels",
                layer
            )));
        }

        let num_detect_layers = anchors.len();
        let num_anchors = first.len() / 2;
        let num_outputs = num_classes + 5;

        let anchor_values: Vec<f32> = anchors.iter().flatten().map(|&v| v as f32).collect();
        let anchors = tch::no_grad(|| {
            Tensor::of_slice(&anchor_values)
                .f_view([num_detect_layers as i64, num_anchors as i64, 2])
                .map(|anchors| anchors.to_device(path.device()))
        })
        .map_err(|err| construction(format!("failed to create anchor tensor: {}", err)))?;

        let convs: Vec<_> = in_channels
            .iter()
            .enumerate()
            .map(|(layer, &in_c)| {
                nn::conv2d(
                    path / format!("m_{}", layer),
                    in_c as i64,
                    (num_outputs * num_anchors) as i64,
                    1,
                    Default::default(),
                )
            })
            .collect();

        info!(
            "Detect: {} layers, {} anchors per cell, {} outputs per anchor",
            num_detect_layers, num_anchors, num_outputs
        );

        Ok(Detect {
            num_classes,
            num_outputs,
            num_anchors,
            inplace,
            in_channels,
            anchors,
            convs,
            stride: None,
            cache: (0..num_detect_layers).map(|_| None).collect(),
        })
    }
}

/// Cached coordinate and anchor grids of one detection layer.
#[derive(Debug)]
pub struct GridCache {
    /// Feature map height and width the grids were built for.
    pub size: (i64, i64),
    /// Cell coordinates `(x - 0.5, y - 0.5)` in `[1, anchors, height, width, 2]`.
    pub grid: Tensor,
    /// Anchor `(w, h)` in pixels in `[1, anchors, height, width, 2]`.
    pub anchor_grid: Tensor,
}

#[derive(Debug)]
pub struct Detect {
    num_classes: usize,
    num_outputs: usize,
    num_anchors: usize,
    inplace: bool,
    in_channels: Vec<usize>,
    /// Anchor sizes in `[layers, anchors, 2]`.
    anchors: Tensor,
    convs: Vec<nn::Conv2D>,
    stride: Option<Vec<f64>>,
    cache: Vec<Option<GridCache>>,
}

impl Detect {
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    pub fn num_anchors(&self) -> usize {
        self.num_anchors
    }

    pub fn num_detect_layers(&self) -> usize {
        self.convs.len()
    }

    pub fn inplace(&self) -> bool {
        self.inplace
    }

    pub fn anchors(&self) -> &Tensor {
        &self.anchors
    }

    pub fn stride(&self) -> Option<&[f64]> {
        self.stride.as_deref()
    }

    pub fn grid_cache(&self, layer: usize) -> Option<&GridCache> {
        self.cache.get(layer)?.as_ref()
    }

    /// Assigns the downsampling factor of each detection layer and drops the cached grids.
    pub fn set_stride(&mut self, stride: Vec<f64>) -> Result<(), DetectError> {
        let num_layers = self.num_detect_layers();
        let result = if stride.len() != num_layers {
            Err(DetectError::InvalidStride {
                reason: format!(
                    "expect {} values, but get {}",
                    num_layers,
                    stride.len()
                ),
            })
        } else if stride.iter().any(|&s| !(s.is_finite() && s > 0.0)) {
            Err(DetectError::InvalidStride {
                reason: format!("values must be finite and positive, but get {:?}", stride),
            })
        } else {
            Ok(())
        };
        log_failure("Detect-stride", result)?;

        self.stride = Some(stride);
        self.cache.iter_mut().for_each(|cache| *cache = None);
        Ok(())
    }

    pub fn forward(&mut self, xs: &[Tensor], mode: DetectMode) -> Result<DetectOutput, DetectError> {
        let result = self.forward_inner(xs, mode);
        log_failure("Detect-forward", result)
    }

    fn forward_inner(
        &mut self,
        xs: &[Tensor],
        mode: DetectMode,
    ) -> Result<DetectOutput, DetectError> {
        let num_layers = self.num_detect_layers();
        if xs.len() != num_layers {
            return Err(DetectError::LayerCount {
                expect: num_layers,
                actual: xs.len(),
            });
        }

        let raw: Vec<Tensor> = xs
            .iter()
            .enumerate()
            .map(|(layer, xs)| self.project(layer, xs))
            .try_collect()?;

        if mode.training {
            return Ok(DetectOutput::Train(raw));
        }

        let mut decoded = Vec::with_capacity(num_layers);
        for (layer, ys) in raw.iter().enumerate() {
            decoded.push(self.decode(layer, ys, mode.dynamic)?);
        }
        let detections =
            Tensor::f_cat(&decoded, 1).map_err(|source| DetectError::Merge { source })?;

        if mode.export {
            Ok(DetectOutput::Export(detections))
        } else {
            Ok(DetectOutput::Inference { detections, raw })
        }
    }

    /// Applies the 1x1 projection and moves the outputs to the last dimension.
    fn project(&self, layer: usize, xs: &Tensor) -> Result<Tensor, DetectError> {
        let num_anchors = self.num_anchors as i64;
        let num_outputs = self.num_outputs as i64;

        let (batch_size, channels, height, width) =
            xs.size4().map_err(|err| DetectError::ShapeMismatch {
                layer,
                reason: format!("expect a 4D feature map: {}", err),
            })?;
        let expect_c = self.in_channels[layer] as i64;
        if channels != expect_c {
            return Err(DetectError::ShapeMismatch {
                layer,
                reason: format!("expect {} channels, but get {}", expect_c, channels),
            });
        }

        let conv = &self.convs[layer];
        let (expect_kind, expect_device) = (conv.ws.kind(), conv.ws.device());
        if xs.kind() != expect_kind || xs.device() != expect_device {
            return Err(DetectError::ShapeMismatch {
                layer,
                reason: format!(
                    "expect a {:?} tensor on {:?}, but get {:?} on {:?}",
                    expect_kind,
                    expect_device,
                    xs.kind(),
                    xs.device()
                ),
            });
        }

        let ys = xs
            .apply(conv)
            .f_view([batch_size, num_anchors, num_outputs, height, width])
            .and_then(|ys| ys.f_permute(&[0, 1, 3, 4, 2]))
            .map_err(|source| DetectError::Decode { layer, source })?;
        Ok(ys.contiguous())
    }

    /// Converts raw logits of one layer into `[batch, anchors * height * width, outputs]` boxes.
    fn decode(&mut self, layer: usize, ys: &Tensor, dynamic: bool) -> Result<Tensor, DetectError> {
        let num_anchors = self.num_anchors as i64;
        let num_outputs = self.num_outputs as i64;
        let num_classes = self.num_classes as i64;
        let inplace = self.inplace;

        let (batch_size, _, height, width, _) = ys
            .size5()
            .map_err(|source| DetectError::Decode { layer, source })?;
        let stride = self.layer_stride(layer)?;
        let (grid, anchor_grid) = self.cached_grid(layer, width, height, dynamic)?;

        let decode = || -> Result<Tensor, TchError> {
            let ys = ys.f_sigmoid()?;

            let boxes = if inplace {
                let xy = (ys.i((.., .., .., .., 0..2)) * 2.0).f_add(&grid)? * stride;
                let wh = ys.i((.., .., .., .., 2..4)) * 2.0;
                let wh = (&wh * &wh).f_mul(&anchor_grid)?;
                ys.i((.., .., .., .., 0..2)).f_copy_(&xy)?;
                ys.i((.., .., .., .., 2..4)).f_copy_(&wh)?;
                ys
            } else {
                let parts = ys.f_split_with_sizes(&[2, 2, num_classes + 1], 4)?;
                let (xy, wh, conf) = match parts.as_slice() {
                    [xy, wh, conf] => (xy, wh, conf),
                    _ => unreachable!("split into exactly three parts"),
                };
                let xy = (xy * 2.0).f_add(&grid)? * stride;
                let wh = wh * 2.0;
                let wh = (&wh * &wh).f_mul(&anchor_grid)?;
                Tensor::f_cat(&[&xy, &wh, conf], 4)?
            };

            boxes.f_view([batch_size, num_anchors * height * width, num_outputs])
        };

        decode().map_err(|source| DetectError::Decode { layer, source })
    }

    fn layer_stride(&self, layer: usize) -> Result<f64, DetectError> {
        let stride = self.stride.as_ref().ok_or(DetectError::StrideUnset)?;
        stride
            .get(layer)
            .copied()
            .ok_or_else(|| DetectError::InvalidStride {
                reason: format!("no stride for detection layer {}", layer),
            })
    }

    /// Returns the grids of a layer, rebuilding them on a size change or in dynamic mode.
    fn cached_grid(
        &mut self,
        layer: usize,
        width: i64,
        height: i64,
        dynamic: bool,
    ) -> Result<(Tensor, Tensor), DetectError> {
        if let Some(cache) = &self.cache[layer] {
            if !dynamic && cache.size == (height, width) {
                return Ok((cache.grid.shallow_clone(), cache.anchor_grid.shallow_clone()));
            }
        }

        debug!(
            "Detect: build grid for layer {} with feature size {}x{}",
            layer, height, width
        );
        let cache = self.make_grid(width, height, layer)?;
        let grids = (cache.grid.shallow_clone(), cache.anchor_grid.shallow_clone());
        self.cache[layer] = Some(cache);
        Ok(grids)
    }

    /// Builds the cell coordinate grid and the anchor grid of a detection layer.
    pub fn make_grid(&self, width: i64, height: i64, layer: usize) -> Result<GridCache, DetectError> {
        let result = self.make_grid_inner(width, height, layer);
        log_failure("Detect-make_grid", result)
    }

    fn make_grid_inner(
        &self,
        width: i64,
        height: i64,
        layer: usize,
    ) -> Result<GridCache, DetectError> {
        let num_layers = self.num_detect_layers();
        if layer >= num_layers {
            return Err(DetectError::ShapeMismatch {
                layer,
                reason: format!("only {} detection layers exist", num_layers),
            });
        }
        let stride = self.layer_stride(layer)?;
        let num_anchors = self.num_anchors as i64;
        let shape = [1, num_anchors, height, width, 2];
        let options = (self.anchors.kind(), self.anchors.device());

        let build = || -> Result<(Tensor, Tensor), TchError> {
            let ys = Tensor::f_arange(height, options)?;
            let xs = Tensor::f_arange(width, options)?;

            // mesh[0] holds the row index and mesh[1] the column index
            let mesh = Tensor::f_meshgrid_indexing(&[ys, xs], "ij")?;
            let grid = Tensor::f_stack(&[&mesh[1], &mesh[0]], 2)?.f_expand(&shape, false)? - 0.5;

            let anchor_grid = (self.anchors.i(layer as i64) * stride)
                .f_view([1, num_anchors, 1, 1, 2])?
                .f_expand(&shape, false)?;

            Ok((grid, anchor_grid))
        };

        let (grid, anchor_grid) =
            tch::no_grad(build).map_err(|source| DetectError::Grid { layer, source })?;

        Ok(GridCache {
            size: (height, width),
            grid,
            anchor_grid,
        })
    }
}
