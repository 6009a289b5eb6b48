use candle_core::{bail, Result, Tensor};
use candle_nn::{Dropout, Embedding, LayerNorm, Linear, Module, VarBuilder};

use crate::attention::MultiHeadAttention;
use crate::block::TransformerBlock;
use crate::config::TransformerConfig;

/// Causal self-attention over the target sequence followed by
/// cross-attention into the encoder output via a [`TransformerBlock`].
#[derive(Debug)]
pub struct DecoderBlock {
    attention: MultiHeadAttention,
    norm: LayerNorm,
    transformer_block: TransformerBlock,
    dropout: Dropout,
}

impl DecoderBlock {
    pub fn new(
        embed_size: usize,
        heads: usize,
        forward_expansion: usize,
        dropout: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        let attention = MultiHeadAttention::new(embed_size, heads, vb.pp("attention"))?;
        let norm = candle_nn::layer_norm(embed_size, 1e-5, vb.pp("norm"))?;
        let transformer_block = TransformerBlock::new(
            embed_size,
            heads,
            dropout,
            forward_expansion,
            vb.pp("transformer_block"),
        )?;
        let dropout = Dropout::new(dropout);

        Ok(Self {
            attention,
            norm,
            transformer_block,
            dropout,
        })
    }

    /// `x` is the target activation `(N, trg_len, E)`; `value`/`key` come
    /// from the encoder output `(N, src_len, E)`.
    pub fn forward(
        &self,
        x: &Tensor,
        value: &Tensor,
        key: &Tensor,
        src_mask: &Tensor,
        trg_mask: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let attention = self.attention.forward(x, x, x, Some(trg_mask))?;
        let query = self
            .dropout
            .forward(&self.norm.forward(&attention.add(x)?)?, train)?;
        self.transformer_block
            .forward(value, key, &query, Some(src_mask), train)
    }
}

/// Decoder stack: embeddings, `num_layers` decoder blocks, then a linear
/// projection onto the target vocabulary. Logits are left unnormalized.
#[derive(Debug)]
pub struct Decoder {
    word_embedding: Embedding,
    position_embedding: Embedding,
    layers: Vec<DecoderBlock>,
    fc_out: Linear,
    dropout: Dropout,
    max_length: usize,
}

impl Decoder {
    pub fn new(config: &TransformerConfig, vb: VarBuilder) -> Result<Self> {
        let word_embedding = candle_nn::embedding(
            config.trg_vocab_size,
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
            layers.push(DecoderBlock::new(
                config.embed_size,
                config.heads,
                config.forward_expansion,
                config.dropout,
                vb.pp(format!("layer_{i}")),
            )?);
        }

        let fc_out = candle_nn::linear(config.embed_size, config.trg_vocab_size, vb.pp("fc_out"))?;
        let dropout = Dropout::new(config.dropout);

        Ok(Self {
            word_embedding,
            position_embedding,
            layers,
            fc_out,
            dropout,
            max_length: config.max_length,
        })
    }

    /// Map target token ids `(batch, trg_len)` plus encoder output to logits
    /// `(batch, trg_len, trg_vocab_size)`.
    pub fn forward(
        &self,
        x: &Tensor,
        enc_out: &Tensor,
        src_mask: &Tensor,
        trg_mask: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let (_n, seq_len) = x.dims2()?;
        if seq_len > self.max_length {
            bail!(
                "sequence length {} exceeds max_length {}",
                seq_len,
                self.max_length
            );
        }

        let positions = Tensor::arange(0u32, seq_len as u32, x.device())?;
        let pos_emb = self.position_embedding.forward(&positions)?;
        let tok_emb = self.word_embedding.forward(x)?;

        let mut out = self
            .dropout
            .forward(&tok_emb.broadcast_add(&pos_emb)?, train)?;

        for layer in &self.layers {
            out = layer.forward(&out, enc_out, enc_out, src_mask, trg_mask, train)?;
        }

        self.fc_out.forward(&out)
    }
}
