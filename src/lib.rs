pub mod attention;
pub mod block;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod transformer;

pub use attention::MultiHeadAttention;
pub use block::{FeedForward, TransformerBlock};
pub use config::TransformerConfig;
pub use decoder::{Decoder, DecoderBlock};
pub use encoder::Encoder;
pub use transformer::Transformer;

use anyhow::Result;
use candle_core::Device;

/// Pick a compute device: CUDA when available, CPU otherwise. Setting
/// `CANDLE_FORCE_CPU` skips device probing entirely.
pub fn setup_device() -> Result<Device> {
    if std::env::var("CANDLE_FORCE_CPU").is_ok() {
        return Ok(Device::Cpu);
    }

    match Device::cuda_if_available(0) {
        Ok(device) if device.is_cuda() => Ok(device),
        Ok(_) | Err(_) => Ok(Device::Cpu),
    }
}
