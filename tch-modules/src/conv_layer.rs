use crate::common::*;

/// Builder of [ConvLayer], a conv → batch norm → activation block.
#[derive(Debug, Clone)]
pub struct ConvLayerInit {
    pub in_c: usize,
    pub out_c: usize,
    pub k: usize,
    pub s: usize,
    /// Zero padding. `None` picks the padding that keeps the spatial size at stride 1.
    pub p: Option<usize>,
    pub g: usize,
    pub d: usize,
    pub activation: Activation,
}

impl ConvLayerInit {
    pub fn new(in_c: usize, out_c: usize, k: usize, s: usize) -> Self {
        Self {
            in_c,
            out_c,
            k,
            s,
            p: None,
            g: 1,
            d: 1,
            activation: Activation::Silu,
        }
    }

    pub fn padding(&self) -> usize {
        let Self { k, d, p, .. } = *self;
        p.unwrap_or_else(|| d * k.saturating_sub(1) / 2)
    }

    /// Output height and width for an input of `h`x`w`.
    pub fn output_hw(&self, h: i64, w: i64) -> (i64, i64) {
        let k = self.k as i64;
        let s = self.s as i64;
        let d = self.d as i64;
        let p = self.padding() as i64;
        let out = |len: i64| (len + 2 * p - d * (k - 1) - 1) / s + 1;
        (out(h), out(w))
    }

    pub fn build<'p, P>(self, path: P) -> Result<ConvLayer>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let padding = self.padding();

        let Self {
            in_c,
            out_c,
            k,
            s,
            g,
            d,
            activation,
            ..
        } = self;

        ensure!(
            in_c > 0 && out_c > 0,
            "ConvLayer channels must be positive, but get {} -> {}",
            in_c,
            out_c
        );
        ensure!(
            k > 0 && s > 0 && d > 0,
            "ConvLayer kernel, stride and dilation must be positive, but get k={} s={} d={}",
            k,
            s,
            d
        );
        ensure!(
            g > 0 && in_c % g == 0 && out_c % g == 0,
            "ConvLayer groups {} must divide both {} input and {} output channels",
            g,
            in_c,
            out_c
        );

        let conv = nn::conv2d(
            path / "conv",
            in_c as i64,
            out_c as i64,
            k as i64,
            nn::ConvConfig {
                stride: s as i64,
                padding: padding as i64,
                dilation: d as i64,
                groups: g as i64,
                bias: false,
                ..Default::default()
            },
        );
        let bn = nn::batch_norm2d(path / "bn", out_c as i64, Default::default());

        Ok(ConvLayer {
            conv,
            bn,
            activation,
            out_c,
        })
    }
}

#[derive(Debug)]
pub struct ConvLayer {
    conv: nn::Conv2D,
    bn: nn::BatchNorm,
    activation: Activation,
    out_c: usize,
}

impl nn::ModuleT for ConvLayer {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let Self {
            ref conv,
            ref bn,
            activation,
            ..
        } = *self;

        xs.apply(conv).apply_t(bn, train).activation(activation)
    }
}

impl ConvLayer {
    pub fn out_channels(&self) -> usize {
        self.out_c
    }
}
