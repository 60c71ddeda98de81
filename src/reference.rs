//! Verification tooling: deterministic data, the direct sliding-window
//! convolution the engine must match bit for bit, and throughput reporting.
use crate::bitplane::{Precision, PrecisionPair};
use crate::engine::ConvShape;
use crate::mac::OutputElem;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

const FILL_STEP: u32 = 37550;
const FILL_MODULUS: u32 = 65535;

/// Fills `tensor` with `v = (v + 37550) mod 65535`, keeping the low `prec` bits,
/// starting from `v = 0`.
pub fn fill_pseudo_random(tensor: &mut [u8], prec: Precision) {
    let mask = prec.mask() as u32;
    let mut v = 0u32;
    for t in tensor.iter_mut() {
        v = (v + FILL_STEP) % FILL_MODULUS;
        *t = (v & mask) as u8;
    }
}

/// Uniform values in `[0, 2^prec)` from a seeded `SmallRng`.
pub fn random_tensor(len: usize, prec: Precision, seed: u64) -> Vec<u8> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen_range(0..=prec.mask())).collect()
}

/// Direct multiply-accumulate convolution over the same layouts as the engine.
pub fn naive_convolve<O: OutputElem>(output: &mut [O], activation: &[u8], filter: &[u8], shape: &ConvShape) {
    let (h, w, f) = (shape.h_in, shape.w_in, shape.kernel);
    let (h_out, w_out) = (shape.h_out(), shape.w_out());
    for co in 0..shape.c_out {
        for r in 0..h_out {
            for c in 0..w_out {
                let mut sum = 0u32;
                for ch in 0..shape.c_in {
                    let kernel = &filter[(co * shape.c_in + ch) * f * f..][..f * f];
                    let plane = &activation[ch * h * w..][..h * w];
                    for fh in 0..f {
                        for fw in 0..f {
                            let a = plane[(r + fh) * w + c + fw] as u32;
                            sum = sum.wrapping_add(a * kernel[fh * f + fw] as u32);
                        }
                    }
                }
                output[(co * h_out + r) * w_out + c] = O::from_acc(sum);
            }
        }
    }
}

/// First differing element, located as `[channel][row][col]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mismatch<T> {
    pub channel: usize,
    pub row: usize,
    pub col: usize,
    pub got: T,
    pub expected: T,
}

impl<T: std::fmt::Display> std::fmt::Display for Mismatch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "o[{}][{}][{}] = {}, instead of {}", self.channel, self.row, self.col, self.got, self.expected)
    }
}

pub fn first_mismatch<T: PartialEq + Copy>(got: &[T], expected: &[T], shape: &ConvShape) -> Option<Mismatch<T>> {
    let (h_out, w_out) = (shape.h_out(), shape.w_out());
    got.iter().zip(expected).position(|(a, b)| a != b).map(|i| Mismatch {
        channel: i / (h_out * w_out),
        row: (i / w_out) % h_out,
        col: i % w_out,
        got: got[i],
        expected: expected[i],
    })
}

/// 1-bit operations performed by one call: three per (tap, bit-plane pair,
/// output element) for AND, popcount and accumulate.
pub fn bit_ops(shape: &ConvShape, prec: PrecisionPair) -> f64 {
    3.0 * (shape.kernel * shape.kernel * shape.c_out * shape.h_out() * shape.w_out()) as f64
        * (prec.activation.bits() * prec.weight.bits()) as f64
}

pub fn ops_per_second(shape: &ConvShape, prec: PrecisionPair, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { bit_ops(shape, prec) / secs } else { f64::INFINITY }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_follows_additive_sequence() {
        let mut t = [0u8; 4];
        fill_pseudo_random(&mut t, Precision::Two);
        // 37550, 9565 (75100 - 65535), 47115, 19130
        assert_eq!(t, [37550 & 3, 9565 & 3, 47115 & 3, 19130 & 3].map(|v: u32| v as u8));
    }

    #[test]
    fn random_tensor_respects_precision() {
        let t = random_tensor(256, Precision::One, 7);
        assert!(t.iter().all(|&v| v <= 1));
        assert_eq!(t, random_tensor(256, Precision::One, 7));
    }

    #[test]
    fn mismatch_is_located() {
        let shape = ConvShape::new(4, 5, 8, 2);
        let a = vec![0u8; shape.output_len()];
        let mut b = a.clone();
        // channel 1, row 1, col 1 of a 2x3 output plane
        b[6 + 3 + 1] = 9;
        let m = first_mismatch(&a, &b, &shape).unwrap();
        assert_eq!((m.channel, m.row, m.col, m.expected), (1, 1, 1, 9));
        assert_eq!(m.to_string(), "o[1][1][1] = 0, instead of 9");
        assert!(first_mismatch(&a, &a, &shape).is_none());
    }

    #[test]
    fn bit_ops_scale_with_precision() {
        let shape = ConvShape::new(6, 6, 8, 1);
        let a1w1 = bit_ops(&shape, PrecisionPair::from_bits(1, 1).unwrap());
        let a2w2 = bit_ops(&shape, PrecisionPair::from_bits(2, 2).unwrap());
        assert_eq!(a1w1, 3.0 * 9.0 * 16.0);
        assert_eq!(a2w2, 4.0 * a1w1);
    }
}
