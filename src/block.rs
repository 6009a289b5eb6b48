use candle_core::{Result, Tensor};
use candle_nn::{Dropout, LayerNorm, Linear, Module, VarBuilder};

use crate::attention::MultiHeadAttention;

/// Position-wise feed-forward network: embed_size -> expansion * embed_size
/// -> embed_size with a ReLU in between. Positions never mix.
#[derive(Debug)]
pub struct FeedForward {
    fc1: Linear,
    fc2: Linear,
}

impl FeedForward {
    pub fn new(embed_size: usize, forward_expansion: usize, vb: VarBuilder) -> Result<Self> {
        let inner = forward_expansion * embed_size;
        let fc1 = candle_nn::linear(embed_size, inner, vb.pp("fc1"))?;
        let fc2 = candle_nn::linear(inner, embed_size, vb.pp("fc2"))?;
        Ok(Self { fc1, fc2 })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.fc1.forward(x)?;
        let x = x.relu()?;
        self.fc2.forward(&x)
    }
}

/// Attention followed by a feed-forward network, each wrapped in a
/// residual add, layer normalization and dropout (post-norm layout).
#[derive(Debug)]
pub struct TransformerBlock {
    attention: MultiHeadAttention,
    norm1: LayerNorm,
    norm2: LayerNorm,
    feed_forward: FeedForward,
    dropout: Dropout,
}

impl TransformerBlock {
    pub fn new(
        embed_size: usize,
        heads: usize,
        dropout: f32,
        forward_expansion: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let attention = MultiHeadAttention::new(embed_size, heads, vb.pp("attention"))?;
        let norm1 = candle_nn::layer_norm(embed_size, 1e-5, vb.pp("norm1"))?;
        let norm2 = candle_nn::layer_norm(embed_size, 1e-5, vb.pp("norm2"))?;
        let feed_forward = FeedForward::new(embed_size, forward_expansion, vb.pp("feed_forward"))?;
        let dropout = Dropout::new(dropout);

        Ok(Self {
            attention,
            norm1,
            norm2,
            feed_forward,
            dropout,
        })
    }

    /// The residual adds require `value`/`key`/`query` to share the block's
    /// embedding size; the output has the shape of `query`.
    pub fn forward(
        &self,
        value: &Tensor,
        key: &Tensor,
        query: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let attention = self.attention.forward(value, key, query, mask)?;

        let x = self.norm1.forward(&attention.add(query)?)?;
        let x = self.dropout.forward(&x, train)?;

        let forward = self.feed_forward.forward(&x)?;
        let out = self.norm2.forward(&forward.add(&x)?)?;
        self.dropout.forward(&out, train)
    }
}
