use candle_core::{Error, Result};

/// Constructor-time scalars for the encoder-decoder transformer.
///
/// All fields are fixed once the model is built; `validate` is called by
/// [`Transformer::new`](crate::Transformer::new) before any parameter is
/// allocated.
#[derive(Debug, Clone)]
pub struct TransformerConfig {
    pub src_vocab_size: usize,
    pub trg_vocab_size: usize,
    pub src_pad_idx: usize,
    pub trg_pad_idx: usize,
    pub embed_size: usize,
    pub num_layers: usize,
    pub forward_expansion: usize,
    pub heads: usize,
    pub dropout: f32,
    pub max_length: usize,
}

impl TransformerConfig {
    /// Build a configuration with the reference defaults; fields are public
    /// so callers can override them before constructing the model.
    pub fn new(
        src_vocab_size: usize,
        trg_vocab_size: usize,
        src_pad_idx: usize,
        trg_pad_idx: usize,
    ) -> Self {
        Self {
            src_vocab_size,
            trg_vocab_size,
            src_pad_idx,
            trg_pad_idx,
            embed_size: 256,
            num_layers: 6,
            forward_expansion: 4,
            heads: 8,
            dropout: 0.0,
            max_length: 100,
        }
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.src_vocab_size == 0 {
            return Err(Error::Msg("src_vocab_size must be greater than zero".into()));
        }
        if self.trg_vocab_size == 0 {
            return Err(Error::Msg("trg_vocab_size must be greater than zero".into()));
        }
        if self.embed_size == 0 {
            return Err(Error::Msg("embed_size must be greater than zero".into()));
        }
        if self.num_layers == 0 {
            return Err(Error::Msg("num_layers must be greater than zero".into()));
        }
        if self.heads == 0 {
            return Err(Error::Msg("heads must be greater than zero".into()));
        }
        if self.embed_size % self.heads != 0 {
            return Err(Error::Msg(format!(
                "embed_size ({}) must be divisible by heads ({})",
                self.embed_size, self.heads
            )));
        }
        if self.forward_expansion == 0 {
            return Err(Error::Msg("forward_expansion must be greater than zero".into()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::Msg("dropout must be in [0, 1)".into()));
        }
        if self.max_length == 0 {
            return Err(Error::Msg("max_length must be greater than zero".into()));
        }
        if self.src_pad_idx >= self.src_vocab_size {
            return Err(Error::Msg("src_pad_idx must be inside the source vocabulary".into()));
        }
        if self.trg_pad_idx >= self.trg_vocab_size {
            return Err(Error::Msg("trg_pad_idx must be inside the target vocabulary".into()));
        }
        Ok(())
    }

    /// Per-head feature dimension.
    pub fn head_dim(&self) -> usize {
        self.embed_size / self.heads
    }
}
