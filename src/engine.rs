//! Precision dispatcher: the public entry points of the crate.
use crate::bitplane::PrecisionPair;
use crate::config::ConvConfig;
use crate::driver::{drive_channel, tile_count, Scratch};
use crate::error::{ConvError, Result};
use crate::mac::{select_variant, OutputElem};
use crate::pack::{PackWord, KERNEL};
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// Dimensions of one convolution call.
///
/// Activation is `[c_in][h_in][w_in]`, filter `[c_out][c_in][kernel][kernel]`,
/// output `[c_out][h_in - kernel + 1][w_in - kernel + 1]`, all row-major.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvShape {
    pub h_in: usize,
    pub w_in: usize,
    pub c_in: usize,
    pub kernel: usize,
    pub c_out: usize,
}

impl ConvShape {
    /// Shape with the 3x3 kernel.
    pub fn new(h_in: usize, w_in: usize, c_in: usize, c_out: usize) -> Self {
        Self { h_in, w_in, c_in, kernel: KERNEL, c_out }
    }

    pub fn h_out(&self) -> usize { (self.h_in + 1).saturating_sub(self.kernel) }
    pub fn w_out(&self) -> usize { (self.w_in + 1).saturating_sub(self.kernel) }
    pub fn activation_len(&self) -> usize { self.c_in * self.h_in * self.w_in }
    pub fn filter_len(&self) -> usize { self.c_out * self.c_in * self.kernel * self.kernel }
    pub fn output_len(&self) -> usize { self.c_out * self.h_out() * self.w_out() }
}

/// Bit-serial convolution engine. `W` sets the channel-group width: `u8`
/// packs 8 channels per word, `u64` packs 64.
#[derive(Clone, Debug)]
pub struct BitSerialConv<W: PackWord = u8> {
    config: ConvConfig,
    _word: PhantomData<W>,
}

impl<W: PackWord> BitSerialConv<W> {
    pub fn new(config: ConvConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, _word: PhantomData })
    }

    pub fn with_defaults() -> Self { Self { config: ConvConfig::default(), _word: PhantomData } }

    pub fn config(&self) -> &ConvConfig { &self.config }

    pub fn group_width(&self) -> usize { W::CHANNELS }

    /// Working storage sized for this engine's tiling.
    pub fn scratch(&self) -> Scratch<W> { Scratch::new(&self.config) }

    /// Checks every precondition of [`run`](Self::run) without computing anything.
    pub fn validate(
        &self,
        output_len: usize,
        activation: &[u8],
        filter: &[u8],
        shape: &ConvShape,
        prec: PrecisionPair,
    ) -> Result<()> {
        if shape.kernel != KERNEL {
            return Err(ConvError::UnsupportedKernel(shape.kernel));
        }
        if shape.h_in < KERNEL || shape.w_in < KERNEL {
            return Err(ConvError::InputTooSmall { h_in: shape.h_in, w_in: shape.w_in, kernel: KERNEL });
        }
        if shape.c_in % W::CHANNELS != 0 && !self.config.partial_groups {
            return Err(ConvError::ChannelGroup { c_in: shape.c_in, group: W::CHANNELS });
        }
        check_len("activation", shape.activation_len(), activation.len())?;
        check_len("filter", shape.filter_len(), filter.len())?;
        check_len("output", shape.output_len(), output_len)?;
        if self.config.check_ranges {
            check_range("activation", activation, prec.activation.mask())?;
            check_range("filter", filter, prec.weight.mask())?;
        }
        Ok(())
    }

    /// Convolves `activation` with every output channel of `filter`, fully
    /// overwriting `output`.
    pub fn run<O: OutputElem>(
        &self,
        output: &mut [O],
        activation: &[u8],
        filter: &[u8],
        shape: &ConvShape,
        prec: PrecisionPair,
    ) -> Result<()> {
        self.validate(output.len(), activation, filter, shape, prec)?;
        self.log_call(shape, prec);
        if shape.c_out == 0 {
            return Ok(());
        }

        let tile = select_variant::<W>(prec.activation, prec.weight);
        let plane = shape.h_out() * shape.w_out();
        let per_filter = shape.c_in * KERNEL * KERNEL;
        let config = &self.config;

        if config.parallel {
            output.par_chunks_mut(plane).enumerate().for_each_init(
                || Scratch::new(config),
                |scratch, (co, out)| {
                    let f = &filter[co * per_filter..(co + 1) * per_filter];
                    drive_channel(tile, out, activation, f, shape, prec, config, scratch);
                },
            );
        } else {
            let mut scratch = Scratch::new(config);
            for (co, out) in output.chunks_mut(plane).enumerate() {
                let f = &filter[co * per_filter..(co + 1) * per_filter];
                drive_channel(tile, out, activation, f, shape, prec, config, &mut scratch);
            }
        }
        Ok(())
    }

    /// Sequential [`run`](Self::run) on caller-owned working storage.
    pub fn run_with_scratch<O: OutputElem>(
        &self,
        scratch: &mut Scratch<W>,
        output: &mut [O],
        activation: &[u8],
        filter: &[u8],
        shape: &ConvShape,
        prec: PrecisionPair,
    ) -> Result<()> {
        self.validate(output.len(), activation, filter, shape, prec)?;
        self.log_call(shape, prec);
        if shape.c_out == 0 {
            return Ok(());
        }
        scratch.fit(&self.config);
        let tile = select_variant::<W>(prec.activation, prec.weight);
        let plane = shape.h_out() * shape.w_out();
        let per_filter = shape.c_in * KERNEL * KERNEL;
        for (co, out) in output.chunks_mut(plane).enumerate() {
            let f = &filter[co * per_filter..(co + 1) * per_filter];
            drive_channel(tile, out, activation, f, shape, prec, &self.config, scratch);
        }
        Ok(())
    }

    fn log_call(&self, shape: &ConvShape, prec: PrecisionPair) {
        debug!(
            "bsconv {} in={}x{}x{} out={}x{}x{} group={} tiles={} row_block={} parallel={}",
            prec,
            shape.c_in,
            shape.h_in,
            shape.w_in,
            shape.c_out,
            shape.h_out(),
            shape.w_out(),
            W::CHANNELS,
            tile_count(shape.w_out(), self.config.tile_out()),
            self.config.row_block,
            self.config.parallel
        );
    }
}

impl<W: PackWord> Default for BitSerialConv<W> {
    fn default() -> Self { Self::with_defaults() }
}

fn check_len(tensor: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(ConvError::BufferLength { tensor, expected, actual });
    }
    Ok(())
}

fn check_range(tensor: &'static str, data: &[u8], mask: u8) -> Result<()> {
    match data.iter().position(|&v| v & !mask != 0) {
        Some(index) => Err(ConvError::ValueOutOfRange {
            tensor,
            index,
            value: data[index],
            bits: mask.count_ones(),
        }),
        None => Ok(()),
    }
}

/// 8-bit convolution with the default configuration: every output is the
/// exact sum of products modulo 256.
pub fn convolve(
    output: &mut [u8],
    activation: &[u8],
    filter: &[u8],
    shape: ConvShape,
    prec_a: u8,
    prec_w: u8,
) -> Result<()> {
    let prec = PrecisionPair::from_bits(prec_a, prec_w)?;
    BitSerialConv::<u8>::with_defaults().run(output, activation, filter, &shape, prec)
}

/// Same as [`convolve`] with 32-bit outputs that keep the full sum.
pub fn convolve_wide(
    output: &mut [i32],
    activation: &[u8],
    filter: &[u8],
    shape: ConvShape,
    prec_a: u8,
    prec_w: u8,
) -> Result<()> {
    let prec = PrecisionPair::from_bits(prec_a, prec_w)?;
    BitSerialConv::<u8>::with_defaults().run(output, activation, filter, &shape, prec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_lengths() {
        let s = ConvShape::new(6, 5, 8, 2);
        assert_eq!((s.h_out(), s.w_out()), (4, 3));
        assert_eq!(s.activation_len(), 240);
        assert_eq!(s.filter_len(), 144);
        assert_eq!(s.output_len(), 24);
    }

    #[test]
    fn check_range_reports_first_offender() {
        let err = check_range("activation", &[0, 1, 2, 1], 1).unwrap_err();
        assert_eq!(err, ConvError::ValueOutOfRange { tensor: "activation", index: 2, value: 2, bits: 1 });
        assert!(check_range("filter", &[3, 0, 2], 3).is_ok());
    }

    #[test]
    fn zero_output_channels_is_a_no_op() {
        let shape = ConvShape::new(4, 4, 8, 0);
        let act = vec![0u8; shape.activation_len()];
        let mut out: Vec<u8> = Vec::new();
        assert!(convolve(&mut out, &act, &[], shape, 1, 1).is_ok());
    }
}
