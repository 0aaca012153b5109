use crate::{
    bottleneck::{Bottleneck, BottleneckInit},
    common::*,
    conv_layer::{ConvLayer, ConvLayerInit},
};

/// Builder of [C3Layer], the CSP block with three convolutions.
#[derive(Debug, Clone)]
pub struct C3LayerInit {
    pub in_c: usize,
    pub out_c: usize,
    /// Number of stacked bottlenecks.
    pub n: usize,
    /// Ratio of hidden channels to input channels.
    pub e: R64,
}

impl C3LayerInit {
    pub fn new(in_c: usize, out_c: usize, n: usize) -> Self {
        Self {
            in_c,
            out_c,
            n,
            e: r64(0.5),
        }
    }

    pub fn hidden_channels(&self) -> usize {
        (self.in_c as f64 * self.e.raw()).floor() as usize
    }

    pub fn build<'p, P>(self, path: P) -> Result<C3Layer>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let mid_c = self.hidden_channels();
        let Self { in_c, out_c, n, e } = self;

        ensure!(
            mid_c > 0,
            "C3Layer ratio {} leaves no hidden channels for {} input channels",
            e,
            in_c
        );

        let conv1 = ConvLayerInit::new(in_c, mid_c, 1, 1).build(path / "conv1")?;
        let conv2 = ConvLayerInit::new(in_c, mid_c, 1, 1).build(path / "conv2")?;
        let conv3 = ConvLayerInit::new(mid_c * 2, out_c, 1, 1).build(path / "conv3")?;

        let bottlenecks: Vec<_> = (0..n)
            .map(|index| {
                BottleneckInit {
                    e: r64(1.0),
                    ..BottleneckInit::new(mid_c, mid_c)
                }
                .build(path / format!("bottleneck_{}", index))
            })
            .try_collect()
            .context("C3Layer: failed to build bottlenecks")?;

        Ok(C3Layer {
            conv1,
            conv2,
            conv3,
            bottlenecks,
        })
    }
}

#[derive(Debug)]
pub struct C3Layer {
    conv1: ConvLayer,
    conv2: ConvLayer,
    conv3: ConvLayer,
    bottlenecks: Vec<Bottleneck>,
}

impl nn::ModuleT for C3Layer {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let Self {
            conv1,
            conv2,
            conv3,
            bottlenecks,
        } = self;

        let repeat = bottlenecks
            .iter()
            .fold(conv1.forward_t(xs, train), |xs, bottleneck| {
                bottleneck.forward_t(&xs, train)
            });
        let skip = conv2.forward_t(xs, train);
        let merge = Tensor::cat(&[repeat, skip], 1);
        conv3.forward_t(&merge, train)
    }
}

impl C3Layer {
    pub fn num_bottlenecks(&self) -> usize {
        self.bottlenecks.len()
    }
}
