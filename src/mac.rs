//! Bit-serial multiply-accumulate core.
//!
//! Every product is formed as AND + popcount over packed channel bitmaps and
//! scaled by `2^(p + q)` for activation plane `p` and weight plane `q`. Lane
//! accumulators are 32-bit and wrap; the store truncates, so an 8-bit output
//! is exactly the sum modulo 256.
//!
//! Input rows stream through the core once. Each row feeds the (up to three)
//! output rows whose receptive field covers it; the two rows still waiting
//! for more input live in a [`RowCache`].
use crate::bitplane::Precision;
use crate::pack::{pack_activation_row, PackWord, PackedFilter, KERNEL, MAX_PLANES};
use log::trace;

/// Rows whose receptive field is still open at any point of the stream.
pub const PENDING_ROWS: usize = KERNEL - 1;

/// How a 32-bit lane accumulator lands in the output tensor.
pub trait OutputElem: Copy + Default + Send + Sync + std::fmt::Debug + 'static {
    fn from_acc(acc: u32) -> Self;
}

impl OutputElem for u8 {
    /// Modulo 256, never saturating.
    #[inline(always)]
    fn from_acc(acc: u32) -> Self { acc as u8 }
}

impl OutputElem for i32 {
    #[inline(always)]
    fn from_acc(acc: u32) -> Self { acc as i32 }
}

/// Stream position of an input row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// First `KERNEL - 1` rows: only partial sums, nothing retires.
    Prime,
    /// Completes the oldest pending row, updates the middle one, begins a new one.
    Steady,
    /// Last `KERNEL - 1` rows: completes pending rows, begins nothing.
    Drain,
}

impl Phase {
    pub fn of(input_row: usize, h_out: usize) -> Phase {
        if input_row < PENDING_ROWS {
            Phase::Prime
        } else if input_row >= h_out {
            Phase::Drain
        } else {
            Phase::Steady
        }
    }
}

/// Ring buffer of partially summed output rows, indexed by `row % PENDING_ROWS`,
/// plus the fresh accumulator a new row starts in.
pub struct RowCache {
    slots: [Vec<u32>; PENDING_ROWS],
    fresh: Vec<u32>,
}

impl RowCache {
    pub fn new(lanes: usize) -> Self {
        Self { slots: std::array::from_fn(|_| vec![0; lanes]), fresh: vec![0; lanes] }
    }

    #[inline]
    fn slot(&mut self, out_row: usize, lanes: usize) -> &mut [u32] {
        &mut self.slots[out_row % PENDING_ROWS][..lanes]
    }

    /// Moves the freshly begun row into the slot vacated by the retired one.
    #[inline]
    fn install(&mut self, out_row: usize) {
        std::mem::swap(&mut self.slots[out_row % PENDING_ROWS], &mut self.fresh);
    }

    fn lanes(&self) -> usize { self.fresh.len() }
}

/// Working registers of the MAC core: packed planes of the current input row
/// and the sliding row cache.
pub struct MacScratch<W: PackWord> {
    packed: [Vec<W>; MAX_PLANES],
    cache: RowCache,
}

impl<W: PackWord> MacScratch<W> {
    /// `tile_size` is the input lane budget; a tile produces at most
    /// `tile_size - KERNEL + 1` output lanes.
    pub fn new(tile_size: usize) -> Self {
        let out_lanes = tile_size + 1 - KERNEL;
        Self {
            packed: [vec![W::default(); tile_size], vec![W::default(); tile_size]],
            cache: RowCache::new(out_lanes),
        }
    }

    pub fn lane_budget(&self) -> usize { self.packed[0].len() }
}

/// One width tile of one output channel.
pub struct TileJob<'a, W: PackWord> {
    /// Whole `[C_in][H_in][W_in]` activation tensor.
    pub activation: &'a [u8],
    /// Packed filter per channel group of the current output channel.
    pub filters: &'a [PackedFilter<W>],
    pub h_in: usize,
    pub w_in: usize,
    pub c_in: usize,
    /// First output column of the tile.
    pub x0: usize,
    /// Output lanes in the tile.
    pub lanes: usize,
}

/// Signature shared by the four precision specializations of [`run_tile`].
pub type TileFn<W> = fn(&TileJob<'_, W>, &mut MacScratch<W>, &mut dyn FnMut(usize, &[u32]));

/// Selects the (A, W) specialization of the core.
pub fn select_variant<W: PackWord>(activation: Precision, weight: Precision) -> TileFn<W> {
    match (activation, weight) {
        (Precision::One, Precision::One) => run_tile::<W, 1, 1>,
        (Precision::One, Precision::Two) => run_tile::<W, 1, 2>,
        (Precision::Two, Precision::One) => run_tile::<W, 2, 1>,
        (Precision::Two, Precision::Two) => run_tile::<W, 2, 2>,
    }
}

/// Accumulates kernel row `kr` of `filter` against a packed input row.
///
/// Tap column `kc` reads the packed row shifted by `kc` lanes.
#[inline(always)]
fn mac_kernel_row<W: PackWord, const A: usize, const WB: usize>(
    acc: &mut [u32],
    row: &[Vec<W>; MAX_PLANES],
    filter: &PackedFilter<W>,
    kr: usize,
) {
    let lanes = acc.len();
    for kc in 0..KERNEL {
        let tap = kr * KERNEL + kc;
        for p in 0..A {
            let shifted = &row[p][kc..kc + lanes];
            for q in 0..WB {
                let f = filter.tap(q, tap);
                let scale = (p + q) as u32;
                for (a, &x) in acc.iter_mut().zip(shifted) {
                    *a = a.wrapping_add(x.and(f).popcount() << scale);
                }
            }
        }
    }
}

/// Streams all input rows of one tile through the core.
///
/// `retire(out_row, acc)` is called once per output row, in increasing row
/// order, as soon as its receptive field is complete.
pub fn run_tile<W: PackWord, const A: usize, const WB: usize>(
    job: &TileJob<'_, W>,
    scratch: &mut MacScratch<W>,
    retire: &mut dyn FnMut(usize, &[u32]),
) {
    let h_out = job.h_in + 1 - KERNEL;
    let lanes = job.lanes;
    let in_lanes = lanes + KERNEL - 1;
    let plane = job.h_in * job.w_in;
    let prec = if A == 1 { Precision::One } else { Precision::Two };
    debug_assert!(in_lanes <= scratch.lane_budget());
    debug_assert!(lanes <= scratch.cache.lanes());
    debug_assert_eq!(job.filters.len(), job.c_in.div_ceil(W::CHANNELS));

    let MacScratch { packed, cache } = scratch;

    for i in 0..job.h_in {
        let phase = Phase::of(i, h_out);
        let begins = i < h_out;
        let completes = i >= PENDING_ROWS;
        trace!("tile x0={} row {} {:?}", job.x0, i, phase);

        if begins {
            cache.fresh[..lanes].fill(0);
        }

        for (g, filter) in job.filters.iter().enumerate() {
            let c0 = g * W::CHANNELS;
            let channels = W::CHANNELS.min(job.c_in - c0);
            let start = c0 * plane + i * job.w_in + job.x0;
            pack_activation_row(&job.activation[start..], plane, channels, in_lanes, prec, packed);

            if begins {
                mac_kernel_row::<W, A, WB>(&mut cache.fresh[..lanes], packed, filter, 0);
            }
            if i >= 1 && i - 1 < h_out {
                mac_kernel_row::<W, A, WB>(cache.slot(i - 1, lanes), packed, filter, 1);
            }
            if completes {
                mac_kernel_row::<W, A, WB>(cache.slot(i - 2, lanes), packed, filter, 2);
            }
        }

        if completes {
            retire(i - 2, cache.slot(i - 2, lanes));
        }
        if begins {
            cache.install(i);
        }
    }
}
