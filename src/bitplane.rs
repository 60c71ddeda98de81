//! Bit-plane helpers and the precision types shared by the packers and the MAC core.
use crate::error::{ConvError, Result};
use serde::{Deserialize, Serialize};

/// Number of bits carried by a quantized activation or weight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Precision {
    One = 1,
    Two = 2,
}

impl Precision {
    #[inline]
    pub fn bits(self) -> u32 { self as u32 }

    /// Largest legal value plus one is `mask() + 1`.
    #[inline]
    pub fn mask(self) -> u8 { ((1u32 << self.bits()) - 1) as u8 }

    pub fn parse(operand: &'static str, bits: u8) -> Result<Self> {
        match bits {
            1 => Ok(Precision::One),
            2 => Ok(Precision::Two),
            _ => Err(ConvError::UnsupportedPrecision { operand, bits }),
        }
    }
}

impl TryFrom<u8> for Precision {
    type Error = ConvError;
    fn try_from(bits: u8) -> Result<Self> { Precision::parse("value", bits) }
}

/// Activation (A) and weight (W) precision of one convolution call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrecisionPair {
    pub activation: Precision,
    pub weight: Precision,
}

impl PrecisionPair {
    pub fn new(activation: Precision, weight: Precision) -> Self { Self { activation, weight } }

    /// Builds a pair from raw bit counts, rejecting anything outside {1, 2}.
    pub fn from_bits(prec_a: u8, prec_w: u8) -> Result<Self> {
        Ok(Self {
            activation: Precision::parse("activation", prec_a)?,
            weight: Precision::parse("weight", prec_w)?,
        })
    }

    pub fn all() -> [PrecisionPair; 4] {
        use Precision::*;
        [
            PrecisionPair::new(One, One),
            PrecisionPair::new(One, Two),
            PrecisionPair::new(Two, One),
            PrecisionPair::new(Two, Two),
        ]
    }
}

impl std::fmt::Display for PrecisionPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "A{}W{}", self.activation.bits(), self.weight.bits())
    }
}

/// Bit `plane` of `v`, as 0 or 1.
#[inline(always)]
pub fn bit_plane(v: u8, plane: u32) -> u8 { (v >> plane) & 1 }

/// `a * w mod 256` computed only from 1-bit products:
/// sum over p < A, q < W of bit_p(a) * bit_q(w) * 2^(p+q).
pub fn bit_serial_product(a: u8, w: u8, prec: PrecisionPair) -> u8 {
    let mut acc = 0u8;
    for p in 0..prec.activation.bits() {
        for q in 0..prec.weight.bits() {
            let one_bit = bit_plane(a, p) & bit_plane(w, q);
            acc = acc.wrapping_add(one_bit << (p + q));
        }
    }
    acc
}
