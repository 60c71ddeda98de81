// Bit-serial quantized convolution: AND + popcount MAC over packed bit-planes
pub mod bitplane;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod mac;
pub mod pack;
pub mod reference;

pub use bitplane::{Precision, PrecisionPair};
pub use config::ConvConfig;
pub use driver::Scratch;
pub use engine::{convolve, convolve_wide, BitSerialConv, ConvShape};
pub use error::{ConvError, Result};
