use crate::{
    common::*,
    conv_layer::{ConvLayer, ConvLayerInit},
};

/// Builder of [Bottleneck]: a 1x1 reduction followed by a 3x3 conv.
#[derive(Debug, Clone)]
pub struct BottleneckInit {
    pub in_c: usize,
    pub out_c: usize,
    pub g: usize,
    /// Ratio of hidden channels to output channels.
    pub e: R64,
}

impl BottleneckInit {
    pub fn new(in_c: usize, out_c: usize) -> Self {
        Self {
            in_c,
            out_c,
            g: 1,
            e: r64(0.5),
        }
    }

    pub fn hidden_channels(&self) -> usize {
        (self.out_c as f64 * self.e.raw()).floor() as usize
    }

    pub fn build<'p, P>(self, path: P) -> Result<Bottleneck>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let hidden_c = self.hidden_channels();
        let Self { in_c, out_c, g, e } = self;

        ensure!(
            hidden_c > 0,
            "Bottleneck ratio {} leaves no hidden channels for {} output channels",
            e,
            out_c
        );

        let conv1 = ConvLayerInit::new(in_c, hidden_c, 1, 1)
            .build(path / "conv1")
            .context("Bottleneck: failed to build conv1")?;
        let conv2 = ConvLayerInit {
            g,
            ..ConvLayerInit::new(hidden_c, out_c, 3, 1)
        }
        .build(path / "conv2")
        .context("Bottleneck: failed to build conv2")?;

        Ok(Bottleneck { conv1, conv2 })
    }
}

#[derive(Debug)]
pub struct Bottleneck {
    conv1: ConvLayer,
    conv2: ConvLayer,
}

impl nn::ModuleT for Bottleneck {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let Self { conv1, conv2 } = self;
        conv2.forward_t(&conv1.forward_t(xs, train), train)
    }
}
