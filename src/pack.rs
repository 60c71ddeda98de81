//! Bit-plane packers.
//!
//! A packed word holds one bit-plane of a whole channel group at a single
//! position: bit `k`, counted from the MSB, is the plane bit of channel
//! `group_base + k`. Activation rows are packed per spatial lane; filters are
//! packed per 3x3 tap.
use crate::bitplane::{bit_plane, Precision};

/// Side length of the only supported kernel.
pub const KERNEL: usize = 3;
/// Taps in one kernel, row-major.
pub const TAPS: usize = KERNEL * KERNEL;
/// Bit-planes carried by the widest supported precision.
pub const MAX_PLANES: usize = 2;

/// Word that stores one bit-plane of a channel group. The group width equals
/// the word width, so `u8` packs the classic 8-channel group.
pub trait PackWord: Copy + Default + Send + Sync + std::fmt::Debug + 'static {
    const CHANNELS: usize;

    /// `self + bit * 2^(CHANNELS - 1 - k)`: fold channel `k` in MSB-first.
    fn fold(self, bit: u8, k: usize) -> Self;
    fn and(self, other: Self) -> Self;
    fn popcount(self) -> u32;
}

macro_rules! impl_pack_word {
    ($($t:ty),*) => {$(
        impl PackWord for $t {
            const CHANNELS: usize = <$t>::BITS as usize;

            #[inline(always)]
            fn fold(self, bit: u8, k: usize) -> Self {
                let weight: $t = 1 << (Self::CHANNELS - 1 - k);
                self.wrapping_add((bit as $t).wrapping_mul(weight))
            }

            #[inline(always)]
            fn and(self, other: Self) -> Self { self & other }

            #[inline(always)]
            fn popcount(self) -> u32 { self.count_ones() }
        }
    )*};
}

impl_pack_word!(u8, u16, u32, u64);

/// Packs one input row of a channel group into `planes`.
///
/// `activation` starts at channel `group_base`, row `r`, column `x0`;
/// consecutive channels are `plane_stride` elements apart. `channels` may be
/// less than the group width for a masked partial group: absent channels
/// leave their bit at zero. Only the first `lanes` entries of each plane
/// are written.
pub fn pack_activation_row<W: PackWord>(
    activation: &[u8],
    plane_stride: usize,
    channels: usize,
    lanes: usize,
    prec: Precision,
    planes: &mut [Vec<W>; MAX_PLANES],
) {
    debug_assert!(channels >= 1 && channels <= W::CHANNELS);
    let [low, high] = planes;
    let low = &mut low[..lanes];
    let high = &mut high[..lanes];

    // Channel 0 seeds the accumulators.
    let seed = &activation[..lanes];
    match prec {
        Precision::One => {
            for (dst, &v) in low.iter_mut().zip(seed) {
                *dst = W::default().fold(bit_plane(v, 0), 0);
            }
        }
        Precision::Two => {
            for ((lo, hi), &v) in low.iter_mut().zip(high.iter_mut()).zip(seed) {
                *lo = W::default().fold(v & 1, 0);
                *hi = W::default().fold(bit_plane(v, 1), 0);
            }
        }
    }

    for k in 1..channels {
        let base = k * plane_stride;
        let src = &activation[base..base + lanes];
        match prec {
            Precision::One => {
                for (dst, &v) in low.iter_mut().zip(src) {
                    *dst = dst.fold(bit_plane(v, 0), k);
                }
            }
            Precision::Two => {
                for ((lo, hi), &v) in low.iter_mut().zip(high.iter_mut()).zip(src) {
                    *lo = lo.fold(v & 1, k);
                    *hi = hi.fold(bit_plane(v, 1), k);
                }
            }
        }
    }
}

/// Packed taps of one (output channel, channel group) filter fragment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PackedFilter<W: PackWord> {
    taps: [[W; TAPS]; MAX_PLANES],
}

impl<W: PackWord> PackedFilter<W> {
    /// `fragment` is `[channels][3][3]`, the slice of the filter tensor for
    /// one output channel starting at the group's first input channel.
    pub fn pack(fragment: &[u8], channels: usize, prec: Precision) -> Self {
        debug_assert!(channels >= 1 && channels <= W::CHANNELS);
        let mut taps = [[W::default(); TAPS]; MAX_PLANES];
        for k in 0..channels {
            let kernel = &fragment[k * TAPS..(k + 1) * TAPS];
            for (t, &w) in kernel.iter().enumerate() {
                for q in 0..prec.bits() as usize {
                    taps[q][t] = taps[q][t].fold(bit_plane(w, q as u32), k);
                }
            }
        }
        Self { taps }
    }

    #[inline(always)]
    pub fn tap(&self, plane: usize, tap: usize) -> W { self.taps[plane][tap] }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planes<W: PackWord>(lanes: usize) -> [Vec<W>; MAX_PLANES] {
        [vec![W::default(); lanes], vec![W::default(); lanes]]
    }

    #[test]
    fn activation_bits_are_msb_first() {
        // 8 channels x 2 lanes, stride 2; only channel 0 lane 0 and channel 7 lane 1 set.
        let mut act = vec![0u8; 16];
        act[0] = 1;
        act[7 * 2 + 1] = 1;
        let mut p = planes::<u8>(2);
        pack_activation_row(&act, 2, 8, 2, Precision::One, &mut p);
        assert_eq!(p[0], vec![0b1000_0000, 0b0000_0001]);
    }

    #[test]
    fn two_bit_activation_splits_planes() {
        // lane 0: channel k holds 3 for k=1, 2 for k=2, 1 for k=3.
        let mut act = vec![0u8; 8];
        act[1] = 3;
        act[2] = 2;
        act[3] = 1;
        let mut p = planes::<u8>(1);
        pack_activation_row(&act, 1, 8, 1, Precision::Two, &mut p);
        assert_eq!(p[0][0], 0b0101_0000);
        assert_eq!(p[1][0], 0b0110_0000);
    }

    #[test]
    fn partial_group_leaves_missing_channels_zero() {
        let act = vec![1u8; 3];
        let mut p = planes::<u8>(1);
        pack_activation_row(&act, 1, 3, 1, Precision::One, &mut p);
        assert_eq!(p[0][0], 0b1110_0000);
    }

    #[test]
    fn wide_words_hold_wider_groups() {
        let act = vec![1u8; 16];
        let mut p = planes::<u16>(1);
        pack_activation_row(&act, 1, 16, 1, Precision::One, &mut p);
        assert_eq!(p[0][0], u16::MAX);
        assert_eq!(p[0][0].popcount(), 16);
    }

    #[test]
    fn filter_taps_pack_per_plane() {
        // channel 0 has weight 3 at tap 4, channel 1 has weight 2 at tap 4.
        let mut frag = vec![0u8; 8 * TAPS];
        frag[4] = 3;
        frag[TAPS + 4] = 2;
        let f = PackedFilter::<u8>::pack(&frag, 8, Precision::Two);
        assert_eq!(f.tap(0, 4), 0b1000_0000);
        assert_eq!(f.tap(1, 4), 0b1100_0000);
        assert_eq!(f.tap(0, 0), 0);
    }

    #[test]
    fn one_bit_filter_ignores_high_plane() {
        let frag = vec![1u8; 8 * TAPS];
        let f = PackedFilter::<u8>::pack(&frag, 8, Precision::One);
        for t in 0..TAPS {
            assert_eq!(f.tap(0, t), 0xFF);
            assert_eq!(f.tap(1, t), 0);
        }
    }
}
