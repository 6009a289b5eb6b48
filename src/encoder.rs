use candle_core::{bail, Result, Tensor};
use candle_nn::{Dropout, Embedding, Module, VarBuilder};

use crate::block::TransformerBlock;
use crate::config::TransformerConfig;

/// Encoder stack: word + position embeddings followed by `num_layers`
/// self-attention transformer blocks under the source padding mask.
#[derive(Debug)]
pub struct Encoder {
    word_embedding: Embedding,
    position_embedding: Embedding,
    layers: Vec<TransformerBlock>,
    dropout: Dropout,
    max_length: usize,
}

impl Encoder {
    pub fn new(config: &TransformerConfig, vb: VarBuilder) -> Result<Self> {
        let word_embedding = candle_nn::embedding(
            config.src_vocab_size,
            config.embed_size,
            vb.pp("word_embedding"),
        )?;
        let position_embedding = candle_nn::embedding(
            config.max_length,
            config.embed_size,
            vb.pp("position_embedding"),
        )?;

        let mut layers = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            layers.push(TransformerBlock::new(
                config.embed_size,
                config.heads,
                config.dropout,
                config.forward_expansion,
                vb.pp(format!("layer_{i}")),
            )?);
        }

        let dropout = Dropout::new(config.dropout);

        Ok(Self {
            word_embedding,
            position_embedding,
            layers,
            dropout,
            max_length: config.max_length,
        })
    }

    /// Map source token ids `(batch, src_len)` to contextual representations
    /// `(batch, src_len, embed_size)`.
    pub fn forward(&self, x: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let (_n, seq_len) = x.dims2()?;
        if seq_len > self.max_length {
            bail!(
                "sequence length {} exceeds max_length {}",
                seq_len,
                self.max_length
            );
        }

        let positions = Tensor::arange(0u32, seq_len as u32, x.device())?;
        let pos_emb = self.position_embedding.forward(&positions)?; // (L, E)
        let tok_emb = self.word_embedding.forward(x)?; // (N, L, E)

        let mut out = self
            .dropout
            .forward(&tok_emb.broadcast_add(&pos_emb)?, train)?;

        for layer in &self.layers {
            out = layer.forward(&out, &out, &out, Some(mask), train)?;
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    fn small_config() -> TransformerConfig {
        let mut config = TransformerConfig::new(12, 12, 0, 0);
        config.embed_size = 32;
        config.num_layers = 2;
        config.heads = 4;
        config.max_length = 16;
        config
    }

    #[test]
    fn test_encoder_output_shape() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder = Encoder::new(&small_config(), vb).unwrap();

        let tokens: Vec<u32> = (0..2 * 7).map(|_| fastrand::u32(1..12)).collect();
        let x = Tensor::from_vec(tokens, (2, 7), &device).unwrap();
        let mask = Tensor::ones((2, 1, 1, 7), DType::U8, &device).unwrap();

        let out = encoder.forward(&x, &mask, false).unwrap();
        assert_eq!(out.dims3().unwrap(), (2, 7, 32));
    }

    #[test]
    fn test_encoder_rejects_overlong_sequences() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder = Encoder::new(&small_config(), vb).unwrap();

        let x = Tensor::zeros((1, 17), DType::U32, &device).unwrap();
        let mask = Tensor::ones((1, 1, 1, 17), DType::U8, &device).unwrap();
        assert!(encoder.forward(&x, &mask, false).is_err());
    }
}
