use crate::{
    common::*,
    conv_layer::{ConvLayer, ConvLayerInit},
};

/// Builder of [Sppf], the fast spatial pyramid pooling block.
#[derive(Debug, Clone)]
pub struct SppfInit {
    pub in_c: usize,
    pub out_c: usize,
    /// Channel divisor of the hidden layer. It also divides the kernel size
    /// to obtain the pooling padding.
    pub e: usize,
    /// Max pooling kernel size.
    pub k: usize,
}

impl SppfInit {
    pub fn new(in_c: usize, out_c: usize) -> Self {
        Self {
            in_c,
            out_c,
            e: 2,
            k: 5,
        }
    }

    pub fn build<'p, P>(self, path: P) -> Result<Sppf>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let Self { in_c, out_c, e, k } = self;

        ensure!(e > 0, "SPPF hidden ratio must be positive");
        let mid_c = in_c / e;
        let p = k / e;

        ensure!(
            mid_c > 0,
            "SPPF ratio {} leaves no hidden channels for {} input channels",
            e,
            in_c
        );
        // stride 1 pooling keeps the size only if 2p = k - 1
        ensure!(
            k > 0 && p * 2 + 1 == k,
            "SPPF kernel {} with padding {} changes the spatial size",
            k,
            p
        );

        let conv1 = ConvLayerInit::new(in_c, mid_c, 1, 1).build(path / "conv1")?;
        let conv2 = ConvLayerInit::new(mid_c * 4, out_c, 1, 1).build(path / "conv2")?;

        Ok(Sppf {
            conv1,
            conv2,
            k: k as i64,
            p: p as i64,
        })
    }
}

#[derive(Debug)]
pub struct Sppf {
    conv1: ConvLayer,
    conv2: ConvLayer,
    k: i64,
    p: i64,
}

impl Sppf {
    fn max_pool(&self, xs: &Tensor) -> Tensor {
        let Self { k, p, .. } = *self;
        xs.max_pool2d(&[k, k], &[1, 1], &[p, p], &[1, 1], false)
    }
}

impl nn::ModuleT for Sppf {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let xs = self.conv1.forward_t(xs, train);
        let max1 = self.max_pool(&xs);
        let max2 = self.max_pool(&max1);
        let max3 = self.max_pool(&max2);
        let merge = Tensor::cat(&[xs, max1, max2, max3], 1);
        self.conv2.forward_t(&merge, train)
    }
}
