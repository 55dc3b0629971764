//! Post-accumulation scale/shift and saturation rule.
//!
//! The accelerator accumulates `A·B` exactly, then applies an affine
//! transform described by a [`PostScale`] and saturates into the output
//! element type. Two details of that transform are policy rather than fact
//! and live in [`QuantizationRule`]: where the bias enters, and how the right
//! shift rounds.

use serde::{Deserialize, Serialize};

use crate::types::ElementType;

/// Scale multiplier and right-shift applied after accumulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostScale {
    pub scale: i32,
    pub shift: u32,
}

impl PostScale {
    /// Scale 1, shift 0: the raw sum saturated to the output type.
    pub const IDENTITY: PostScale = PostScale { scale: 1, shift: 0 };

    pub const fn new(scale: i32, shift: u32) -> Self {
        Self { scale, shift }
    }
}

impl Default for PostScale {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<(i32, u32)> for PostScale {
    fn from((scale, shift): (i32, u32)) -> Self {
        Self { scale, shift }
    }
}

/// Rounding applied by the right shift.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    /// Arithmetic shift; rounds toward negative infinity.
    #[default]
    Floor,
    /// Adds half an LSB before shifting; ties round toward positive infinity.
    HalfUp,
}

impl std::fmt::Display for RoundingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Floor => write!(f, "floor"),
            Self::HalfUp => write!(f, "half_up"),
        }
    }
}

impl std::str::FromStr for RoundingMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "floor" => Ok(Self::Floor),
            "half_up" | "half-up" => Ok(Self::HalfUp),
            other => Err(format!("unknown rounding mode: {other}")),
        }
    }
}

/// Point at which the bias joins the accumulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasStage {
    /// `((A·B + bias) * scale) >> shift`
    #[default]
    BeforeScale,
    /// `(A·B * scale + bias) >> shift`
    AfterScale,
}

impl std::fmt::Display for BiasStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BeforeScale => write!(f, "before_scale"),
            Self::AfterScale => write!(f, "after_scale"),
        }
    }
}

impl std::str::FromStr for BiasStage {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "before_scale" | "before-scale" => Ok(Self::BeforeScale),
            "after_scale" | "after-scale" => Ok(Self::AfterScale),
            other => Err(format!("unknown bias stage: {other}")),
        }
    }
}

/// The complete post-accumulation policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuantizationRule {
    pub rounding: RoundingMode,
    pub bias_stage: BiasStage,
}

impl QuantizationRule {
    pub const fn new(rounding: RoundingMode, bias_stage: BiasStage) -> Self {
        Self { rounding, bias_stage }
    }

    /// Transform an exact accumulator value, without saturating.
    pub fn transform(&self, acc: i128, bias: i128, post: PostScale) -> i128 {
        let scale = i128::from(post.scale);
        let pre_shift = match self.bias_stage {
            BiasStage::BeforeScale => (acc + bias) * scale,
            BiasStage::AfterScale => acc * scale + bias,
        };
        shift_right(pre_shift, post.shift, self.rounding)
    }

    /// Transform and saturate into `i16`.
    pub fn apply(&self, acc: i128, bias: i128, post: PostScale) -> i16 {
        saturate_i16(self.transform(acc, bias, post))
    }
}

/// Right shift on a wide signed value; shifts past the width collapse to the
/// sign (or to zero/one under `HalfUp`).
pub fn shift_right(value: i128, shift: u32, rounding: RoundingMode) -> i128 {
    if shift == 0 {
        return value;
    }
    let shift = shift.min(127);
    match rounding {
        RoundingMode::Floor => value >> shift,
        RoundingMode::HalfUp => {
            let half = 1i128 << (shift - 1);
            value.saturating_add(half) >> shift
        }
    }
}

/// Clamp into the representable `i16` range.
pub fn saturate_i16(value: i128) -> i16 {
    let (lo, hi) = ElementType::I16.bounds();
    value.clamp(i128::from(lo), i128::from(hi)) as i16
}
