#[cfg(feature = "tch")]
pub use impls::*;
#[cfg(feature = "tch")]
mod impls;

#[cfg(feature = "tch")]
pub use r#trait::*;
#[cfg(feature = "tch")]
mod r#trait;

/// Activation applied after the batch normalization of a conv block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Activation {
    /// x * sigmoid(x)
    Silu,
    /// Identity.
    Linear,
}

impl Default for Activation {
    fn default() -> Self {
        Self::Silu
    }
}

impl Activation {
    /// Picks SiLU when `enabled` is true and the identity otherwise.
    pub fn silu_or_linear(enabled: bool) -> Self {
        if enabled {
            Self::Silu
        } else {
            Self::Linear
        }
    }
}
