use crate::Activation;
use tch::{nn, Tensor};

impl nn::Module for Activation {
    fn forward(&self, xs: &Tensor) -> Tensor {
        use Activation::*;

        match *self {
            Silu => silu(xs),
            Linear => xs.shallow_clone(),
        }
    }
}

pub fn silu(xs: &Tensor) -> Tensor {
    xs.silu()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TensorActivationExt as _;
    use tch::kind::FLOAT_CPU;

    #[test]
    fn silu_matches_sigmoid_product() {
        let xs = Tensor::randn(&[2, 3, 4, 4], FLOAT_CPU);
        let expect = &xs * xs.sigmoid();
        let actual = xs.activation(Activation::Silu);
        assert!(actual.allclose(&expect, 1e-5, 1e-6, false));
    }

    #[test]
    fn linear_is_identity() {
        let xs = Tensor::randn(&[2, 8], FLOAT_CPU);
        let ys = xs.activation(Activation::Linear);
        assert!(ys.equal(&xs));
    }

    #[test]
    fn silu_or_linear_switch() {
        assert_eq!(Activation::silu_or_linear(true), Activation::Silu);
        assert_eq!(Activation::silu_or_linear(false), Activation::Linear);
    }
}
