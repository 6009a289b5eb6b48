use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use crate::config::TransformerConfig;
use crate::decoder::Decoder;
use crate::encoder::Encoder;

/// Full encoder-decoder transformer. Derives the source padding mask and
/// the target causal mask from the token tensors, then runs the encoder
/// stack followed by the decoder stack.
#[derive(Debug)]
pub struct Transformer {
    config: TransformerConfig,
    encoder: Encoder,
    decoder: Decoder,
}

impl Transformer {
    pub fn new(config: TransformerConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let encoder = Encoder::new(&config, vb.pp("encoder"))?;
        let decoder = Decoder::new(&config, vb.pp("decoder"))?;
        Ok(Self {
            config,
            encoder,
            decoder,
        })
    }

    pub fn config(&self) -> &TransformerConfig {
        &self.config
    }

    /// Source padding mask, shape `(N, 1, 1, src_len)`, u8, `1` where the
    /// token differs from `src_pad_idx`.
    pub fn make_src_mask(&self, src: &Tensor) -> Result<Tensor> {
        let (n, src_len) = src.dims2()?;
        let mask = src.ne(self.config.src_pad_idx as u32)?;
        mask.reshape((n, 1, 1, src_len))
    }

    /// Target causal mask, shape `(N, 1, trg_len, trg_len)`, u8,
    /// lower-triangular. Target padding is intentionally not folded in,
    /// matching the reference design.
    pub fn make_trg_mask(&self, trg: &Tensor) -> Result<Tensor> {
        let (n, trg_len) = trg.dims2()?;
        let mut data = vec![0u8; trg_len * trg_len];
        for q in 0..trg_len {
            for k in 0..=q {
                data[q * trg_len + k] = 1;
            }
        }
        let tril = Tensor::from_vec(data, (1, 1, trg_len, trg_len), trg.device())?;
        tril.broadcast_as((n, 1, trg_len, trg_len))
    }

    /// Map source and target token ids to unnormalized target-vocabulary
    /// logits, shape `(N, trg_len, trg_vocab_size)`.
    pub fn forward(&self, src: &Tensor, trg: &Tensor, train: bool) -> Result<Tensor> {
        let src_mask = self.make_src_mask(src)?;
        let trg_mask = self.make_trg_mask(trg)?;

        let enc_src = self.encoder.forward(src, &src_mask, train)?;
        self.decoder
            .forward(trg, &enc_src, &src_mask, &trg_mask, train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    fn build(config: TransformerConfig) -> Result<Transformer> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        Transformer::new(config, vb)
    }

    fn small_config() -> TransformerConfig {
        let mut config = TransformerConfig::new(10, 10, 0, 0);
        config.embed_size = 32;
        config.num_layers = 2;
        config.heads = 4;
        config.max_length = 16;
        config
    }

    #[test]
    fn test_src_mask_marks_pad_positions() {
        let device = Device::Cpu;
        let model = build(small_config()).unwrap();

        let src = Tensor::from_vec(vec![1u32, 5, 0, 2, 0], (1, 5), &device).unwrap();
        let mask = model.make_src_mask(&src).unwrap();

        assert_eq!(mask.dims(), &[1, 1, 1, 5]);
        assert_eq!(mask.dtype(), DType::U8);
        let flat = mask.flatten_all().unwrap().to_vec1::<u8>().unwrap();
        assert_eq!(flat, vec![1, 1, 0, 1, 0]);
    }

    #[test]
    fn test_trg_mask_is_lower_triangular() {
        let device = Device::Cpu;
        let model = build(small_config()).unwrap();

        let trg = Tensor::from_vec(vec![1u32, 7, 4, 0], (1, 4), &device).unwrap();
        let mask = model.make_trg_mask(&trg).unwrap();

        assert_eq!(mask.dims(), &[1, 1, 4, 4]);
        let rows = mask
            .reshape((4, 4))
            .unwrap()
            .to_vec2::<u8>()
            .unwrap();
        for (q, row) in rows.iter().enumerate() {
            for (k, &v) in row.iter().enumerate() {
                assert_eq!(v, u8::from(k <= q), "row {} col {}", q, k);
            }
        }
    }

    #[test]
    fn test_construction_fails_on_indivisible_heads() {
        let mut config = small_config();
        config.embed_size = 100;
        config.heads = 7;
        assert!(build(config).is_err());
    }
}
