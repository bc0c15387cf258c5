//! Activation functions ("squashes") for creature nodes.
//!
//! The catalog is a closed set: names are resolved to an [`Activation`]
//! variant once, when a genome is imported, and never looked up by string
//! on the hot path. Every variant provides both its value and its
//! derivative, which the gated backpropagation pass needs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Activation functions supported by creature nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Activation {
    /// Identity function: f(x) = x
    #[default]
    Identity,
    /// Logistic sigmoid: f(x) = 1 / (1 + e^(-x))
    Logistic,
    /// Hyperbolic tangent: f(x) = tanh(x)
    Tanh,
    /// Rectified Linear Unit: f(x) = max(0, x)
    Relu,
    /// Leaky ReLU: `f(x) = x` if `x > 0` else `0.01x`
    LeakyRelu,
    /// Sine function: f(x) = sin(x)
    Sine,
    /// Cosine function: f(x) = cos(x)
    Cosine,
    /// Gaussian: f(x) = e^(-x^2)
    Gaussian,
    /// Absolute value: f(x) = |x|
    Absolute,
    /// Step function: f(x) = 1 if x > 0 else 0
    Step,
    /// Softsign: f(x) = x / (1 + |x|)
    Softsign,
    /// Softplus: f(x) = ln(1 + e^x)
    Softplus,
    /// Bent identity: f(x) = (sqrt(x^2 + 1) - 1) / 2 + x
    BentIdentity,
    /// Exponential linear unit: f(x) = x if x > 0 else e^x - 1
    Elu,
    /// Scaled exponential linear unit.
    Selu,
    /// Clipped identity: f(x) = clamp(x, -1, 1)
    Clipped,
    /// Inverse: f(x) = 1 - x
    Inverse,
    /// Conditional composition, see [`Activation::compose_if`].
    ///
    /// The node's inputs are split by connection kind and the node selects
    /// the positive or the negative sum depending on the condition sum.
    If,
}

const SELU_ALPHA: f32 = 1.673_263_2;
const SELU_SCALE: f32 = 1.050_701;

impl Activation {
    /// All available activation functions.
    pub const ALL: [Self; 18] = [
        Self::Identity,
        Self::Logistic,
        Self::Tanh,
        Self::Relu,
        Self::LeakyRelu,
        Self::Sine,
        Self::Cosine,
        Self::Gaussian,
        Self::Absolute,
        Self::Step,
        Self::Softsign,
        Self::Softplus,
        Self::BentIdentity,
        Self::Elu,
        Self::Selu,
        Self::Clipped,
        Self::Inverse,
        Self::If,
    ];

    /// Activations that random mutation may assign.
    ///
    /// `If` is excluded: it only makes sense on nodes wired with typed
    /// (positive/negative/condition) connections.
    pub const MUTABLE: [Self; 17] = [
        Self::Identity,
        Self::Logistic,
        Self::Tanh,
        Self::Relu,
        Self::LeakyRelu,
        Self::Sine,
        Self::Cosine,
        Self::Gaussian,
        Self::Absolute,
        Self::Step,
        Self::Softsign,
        Self::Softplus,
        Self::BentIdentity,
        Self::Elu,
        Self::Selu,
        Self::Clipped,
        Self::Inverse,
    ];

    /// Apply this activation function to a node state.
    ///
    /// NaN propagates. Infinite inputs produce finite outputs where the
    /// function has a finite limit.
    #[inline]
    #[must_use]
    pub fn apply(self, x: f32) -> f32 {
        if x.is_nan() {
            return f32::NAN;
        }

        match self {
            Self::Identity | Self::If => x,
            Self::Logistic => {
                if x == f32::INFINITY {
                    return 1.0;
                }
                if x == f32::NEG_INFINITY {
                    return 0.0;
                }
                let clamped = x.clamp(-88.0, 88.0);
                1.0 / (1.0 + (-clamped).exp())
            }
            Self::Tanh => x.tanh(),
            Self::Relu => x.max(0.0),
            Self::LeakyRelu => {
                if x > 0.0 {
                    x
                } else {
                    0.01 * x
                }
            }
            Self::Sine => {
                if x.is_infinite() {
                    return 0.0;
                }
                x.sin()
            }
            Self::Cosine => {
                if x.is_infinite() {
                    return 0.0;
                }
                x.cos()
            }
            Self::Gaussian => {
                if x.abs() > 26.0 {
                    0.0
                } else {
                    (-x * x).exp()
                }
            }
            Self::Absolute => x.abs(),
            Self::Step => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Softsign => {
                if x.is_infinite() {
                    return x.signum();
                }
                x / (1.0 + x.abs())
            }
            Self::Softplus => {
                // ln(1 + e^x) overflows early; past 20 it equals x in f32.
                if x > 20.0 {
                    x
                } else {
                    x.exp().ln_1p()
                }
            }
            Self::BentIdentity => {
                if x.is_infinite() {
                    return x;
                }
                ((x * x + 1.0).sqrt() - 1.0) / 2.0 + x
            }
            Self::Elu => {
                if x > 0.0 {
                    x
                } else {
                    x.exp() - 1.0
                }
            }
            Self::Selu => {
                if x > 0.0 {
                    SELU_SCALE * x
                } else {
                    SELU_SCALE * SELU_ALPHA * (x.exp() - 1.0)
                }
            }
            Self::Clipped => x.clamp(-1.0, 1.0),
            Self::Inverse => 1.0 - x,
        }
    }

    /// Derivative of this activation with respect to the node state.
    #[inline]
    #[must_use]
    pub fn derivative(self, x: f32) -> f32 {
        if x.is_nan() {
            return f32::NAN;
        }

        match self {
            Self::Identity | Self::If => 1.0,
            Self::Logistic => {
                let fx = self.apply(x);
                fx * (1.0 - fx)
            }
            Self::Tanh => {
                let fx = x.tanh();
                1.0 - fx * fx
            }
            Self::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::LeakyRelu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.01
                }
            }
            Self::Sine => {
                if x.is_infinite() {
                    return 0.0;
                }
                x.cos()
            }
            Self::Cosine => {
                if x.is_infinite() {
                    return 0.0;
                }
                -x.sin()
            }
            Self::Gaussian => {
                if x.abs() > 26.0 {
                    0.0
                } else {
                    -2.0 * x * (-x * x).exp()
                }
            }
            Self::Absolute => {
                if x < 0.0 {
                    -1.0
                } else {
                    1.0
                }
            }
            Self::Step => 0.0,
            Self::Softsign => {
                let d = 1.0 + x.abs();
                1.0 / (d * d)
            }
            Self::Softplus => Self::Logistic.apply(x),
            Self::BentIdentity => {
                if x.is_infinite() {
                    return if x > 0.0 { 1.5 } else { 0.5 };
                }
                x / (2.0 * (x * x + 1.0).sqrt()) + 1.0
            }
            Self::Elu => {
                if x > 0.0 {
                    1.0
                } else {
                    x.exp()
                }
            }
            Self::Selu => {
                if x > 0.0 {
                    SELU_SCALE
                } else {
                    SELU_SCALE * SELU_ALPHA * x.exp()
                }
            }
            Self::Clipped => {
                if x > -1.0 && x < 1.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Inverse => -1.0,
        }
    }

    /// Conditional composition used by `If` nodes.
    #[inline]
    #[must_use]
    pub fn compose_if(condition: f32, positive: f32, negative: f32) -> f32 {
        if condition > 0.0 {
            positive
        } else {
            negative
        }
    }

    /// Canonical catalog name, as used in genome exports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Identity => "IDENTITY",
            Self::Logistic => "LOGISTIC",
            Self::Tanh => "TANH",
            Self::Relu => "RELU",
            Self::LeakyRelu => "LEAKY_RELU",
            Self::Sine => "SINE",
            Self::Cosine => "COSINE",
            Self::Gaussian => "GAUSSIAN",
            Self::Absolute => "ABSOLUTE",
            Self::Step => "STEP",
            Self::Softsign => "SOFTSIGN",
            Self::Softplus => "SOFTPLUS",
            Self::BentIdentity => "BENT_IDENTITY",
            Self::Elu => "ELU",
            Self::Selu => "SELU",
            Self::Clipped => "CLIPPED",
            Self::Inverse => "INVERSE",
            Self::If => "IF",
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when an activation name is not in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown activation function: {0}")]
pub struct UnknownActivation(pub String);

impl FromStr for Activation {
    type Err = UnknownActivation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.name() == upper)
            .ok_or_else(|| UnknownActivation(s.to_string()))
    }
}
