use candle_core::{bail, Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

/// Sentinel written into blocked score positions before scaling. Large enough
/// that the softmax assigns those keys an exact zero weight in f32.
const MASK_FILL: f32 = -1e20;

/// Multi-head scaled dot-product attention.
///
/// Splits the embedding into `heads` subspaces of size `head_dim`, projects
/// value/key/query independently per head, computes masked attention scores
/// and merges the heads back into a single `embed_size` dimension.
#[derive(Debug)]
pub struct MultiHeadAttention {
    /// Per-head value projection, head_dim -> head_dim, no bias
    values: Linear,
    /// Per-head key projection, head_dim -> head_dim, no bias
    keys: Linear,
    /// Per-head query projection, head_dim -> head_dim, no bias
    queries: Linear,
    /// Output projection over the concatenated heads, embed_size -> embed_size
    fc_out: Linear,
    embed_size: usize,
    heads: usize,
    head_dim: usize,
    /// 1 / sqrt(embed_size); the reference design scales by the full
    /// embedding size rather than the per-head dimension.
    scale: f64,
}

impl MultiHeadAttention {
    pub fn new(embed_size: usize, heads: usize, vb: VarBuilder) -> Result<Self> {
        if heads == 0 || embed_size % heads != 0 {
            bail!(
                "embed_size ({}) must be divisible by heads ({})",
                embed_size,
                heads
            );
        }
        let head_dim = embed_size / heads;

        let values = candle_nn::linear_no_bias(head_dim, head_dim, vb.pp("values"))?;
        let keys = candle_nn::linear_no_bias(head_dim, head_dim, vb.pp("keys"))?;
        let queries = candle_nn::linear_no_bias(head_dim, head_dim, vb.pp("queries"))?;
        let fc_out = candle_nn::linear(embed_size, embed_size, vb.pp("fc_out"))?;

        let scale = 1.0 / (embed_size as f64).sqrt();

        Ok(Self {
            values,
            keys,
            queries,
            fc_out,
            embed_size,
            heads,
            head_dim,
            scale,
        })
    }

    /// Attend `query` over `keys`/`values`.
    ///
    /// Inputs are `(batch, len, embed_size)`; `key_len` may differ from
    /// `query_len` (cross-attention) but `value_len` must equal `key_len`.
    /// `mask` is an optional u8 tensor broadcastable to
    /// `(batch, heads, query_len, key_len)` with `1` = attend, `0` = block.
    /// Output is `(batch, query_len, embed_size)`.
    pub fn forward(
        &self,
        values: &Tensor,
        keys: &Tensor,
        query: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let (n, query_len, _) = query.dims3()?;
        let (_, key_len, _) = keys.dims3()?;
        let (_, value_len, _) = values.dims3()?;
        if value_len != key_len {
            bail!(
                "attention value_len ({}) must equal key_len ({})",
                value_len,
                key_len
            );
        }

        // Split embeddings into heads: (N, len, E) -> (N, len, H, D)
        let values = values.reshape((n, value_len, self.heads, self.head_dim))?;
        let keys = keys.reshape((n, key_len, self.heads, self.head_dim))?;
        let queries = query.reshape((n, query_len, self.heads, self.head_dim))?;

        // Per-head projections over the last dimension only; heads never mix.
        let values = self.values.forward(&values)?;
        let keys = self.keys.forward(&keys)?;
        let queries = self.queries.forward(&queries)?;

        // Raw scores: (N, H, Q, D) x (N, H, D, K) -> (N, H, Q, K)
        let q = queries.permute((0, 2, 1, 3))?.contiguous()?;
        let k_t = keys.permute((0, 2, 3, 1))?.contiguous()?;
        let energy = q.matmul(&k_t)?;

        // Blocked positions are overwritten before scaling, as in the
        // reference design.
        let energy = match mask {
            Some(mask) => masked_fill(&energy, mask, MASK_FILL)?,
            None => energy,
        };

        let attention = candle_nn::ops::softmax_last_dim(&energy.affine(self.scale, 0.0)?)?;

        // Weighted sum: (N, H, Q, K) x (N, H, K, D) -> (N, H, Q, D)
        let v = values.permute((0, 2, 1, 3))?.contiguous()?;
        let out = attention.matmul(&v)?;

        // Merge heads back, preserving head order: (N, H, Q, D) -> (N, Q, E)
        let out = out
            .permute((0, 2, 1, 3))?
            .contiguous()?
            .reshape((n, query_len, self.embed_size))?;

        self.fc_out.forward(&out)
    }
}

/// Overwrite `scores` with `fill` wherever `mask` is zero. The mask is
/// broadcast up to the score shape, so padding masks `(N, 1, 1, K)` and
/// causal masks `(N, 1, Q, K)` both apply across every head.
pub(crate) fn masked_fill(scores: &Tensor, mask: &Tensor, fill: f32) -> Result<Tensor> {
    let mask = mask.broadcast_as(scores.dims())?;
    let fill = Tensor::full(fill, scores.dims(), scores.device())?;
    mask.where_cond(scores, &fill)
}
