//! Tiling and row-blocking around the MAC core.
//!
//! Output columns are cut into tiles of `tile_size - 2` lanes (the last tile
//! takes the remainder). Rows retired by the core land in a bank of
//! `row_block` accumulator rows; a full bank (or the final row) is truncated
//! into the output. Filters are packed once per output channel and channel
//! group, before the first tile, and reused unchanged by every tile.
use crate::bitplane::PrecisionPair;
use crate::config::ConvConfig;
use crate::engine::ConvShape;
use crate::mac::{MacScratch, OutputElem, TileFn, TileJob};
use crate::pack::{PackWord, PackedFilter, TAPS};
use log::trace;

/// Working storage for one execution path. Reusing it across calls avoids
/// any allocation inside the kernels.
pub struct Scratch<W: PackWord> {
    mac: MacScratch<W>,
    bank: Vec<u32>,
    filters: Vec<PackedFilter<W>>,
    tile_size: usize,
    row_block: usize,
}

impl<W: PackWord> Scratch<W> {
    pub fn new(config: &ConvConfig) -> Self {
        Self {
            mac: MacScratch::new(config.tile_size),
            bank: vec![0; config.row_block * config.tile_out()],
            filters: Vec::new(),
            tile_size: config.tile_size,
            row_block: config.row_block,
        }
    }

    /// Rebuilds the buffers if they were sized for a different tiling.
    pub fn fit(&mut self, config: &ConvConfig) {
        if self.tile_size != config.tile_size || self.row_block != config.row_block {
            *self = Scratch::new(config);
        }
    }
}

/// Number of width tiles covering `w_out` output columns.
pub fn tile_count(w_out: usize, tile_out: usize) -> usize { w_out.div_ceil(tile_out) }

/// Computes one output channel.
///
/// `out` is the channel's `[H_out][W_out]` plane and `filter` its
/// `[C_in][3][3]` slice; `tile` is the precision specialization picked by
/// the dispatcher.
#[allow(clippy::too_many_arguments)]
pub fn drive_channel<W: PackWord, O: OutputElem>(
    tile: TileFn<W>,
    out: &mut [O],
    activation: &[u8],
    filter: &[u8],
    shape: &ConvShape,
    prec: PrecisionPair,
    config: &ConvConfig,
    scratch: &mut Scratch<W>,
) {
    let (h_out, w_out) = (shape.h_out(), shape.w_out());
    let tile_out = config.tile_out();
    let row_block = config.row_block;
    debug_assert_eq!(out.len(), h_out * w_out);
    debug_assert_eq!(scratch.row_block, row_block);

    let Scratch { mac, bank, filters, .. } = scratch;

    filters.clear();
    for c0 in (0..shape.c_in).step_by(W::CHANNELS) {
        let channels = W::CHANNELS.min(shape.c_in - c0);
        filters.push(PackedFilter::pack(&filter[c0 * TAPS..], channels, prec.weight));
    }

    for x0 in (0..w_out).step_by(tile_out) {
        let lanes = tile_out.min(w_out - x0);
        trace!("width tile x0={} lanes={}", x0, lanes);
        let job = TileJob {
            activation,
            filters: filters.as_slice(),
            h_in: shape.h_in,
            w_in: shape.w_in,
            c_in: shape.c_in,
            x0,
            lanes,
        };

        let mut retire = |row: usize, acc: &[u32]| {
            let slot = row % row_block;
            bank[slot * lanes..(slot + 1) * lanes].copy_from_slice(acc);
            if slot + 1 == row_block || row + 1 == h_out {
                let first = row - slot;
                for r in first..=row {
                    let held = &bank[(r - first) * lanes..(r - first + 1) * lanes];
                    let dst = &mut out[r * w_out + x0..r * w_out + x0 + lanes];
                    for (d, &a) in dst.iter_mut().zip(held) {
                        *d = O::from_acc(a);
                    }
                }
                trace!("stored rows {}..={} of tile x0={}", first, row, x0);
            }
        };
        tile(&job, mac, &mut retire);
    }
}
