use thiserror::Error;

/// Precondition violations detected at the dispatcher boundary.
///
/// The kernels themselves have no failure states; every check below runs once
/// per call before any output is written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvError {
    #[error("unsupported kernel size {0}x{0} (only 3x3 is implemented)")]
    UnsupportedKernel(usize),

    #[error("unsupported {operand} precision of {bits} bits (expected 1 or 2)")]
    UnsupportedPrecision { operand: &'static str, bits: u8 },

    #[error("{c_in} input channels is not a multiple of the {group}-channel group width")]
    ChannelGroup { c_in: usize, group: usize },

    #[error("input {h_in}x{w_in} is smaller than the {kernel}x{kernel} kernel")]
    InputTooSmall { h_in: usize, w_in: usize, kernel: usize },

    #[error("{tensor} buffer holds {actual} elements, expected {expected}")]
    BufferLength { tensor: &'static str, expected: usize, actual: usize },

    #[error("{tensor}[{index}] = {value} does not fit in {bits} bits")]
    ValueOutOfRange { tensor: &'static str, index: usize, value: u8, bits: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ConvError>;
