//! Masked multi-head attention over TERM residues and over residue neighbors.
use crate::config::TerminatorConfig;
use crate::utilities::{forward_flat, masked_softmax};
use candle_core::{Result, Tensor};
use candle_nn::{linear_no_bias, Linear, Module, VarBuilder};

/// Self-attention among the residues of each TERM.
///
/// Batch and TERM axes act as extra batch dimensions.
#[derive(Clone, Debug)]
pub struct TermAttention {
    num_heads: usize,
    num_hidden: usize,
    w_q: Linear,
    w_k: Linear,
    w_v: Linear,
    w_o: Linear,
}

impl TermAttention {
    pub fn load(vb: VarBuilder, config: &TerminatorConfig) -> Result<Self> {
        let num_hidden = config.term_hidden_dim;
        Ok(Self {
            num_heads: config.term_heads,
            num_hidden,
            w_q: linear_no_bias(num_hidden, num_hidden, vb.pp("W_Q"))?,
            w_k: linear_no_bias(num_hidden, num_hidden, vb.pp("W_K"))?,
            w_v: linear_no_bias(num_hidden, num_hidden, vb.pp("W_V"))?,
            w_o: linear_no_bias(num_hidden, num_hidden, vb.pp("W_O"))?,
        })
    }

    /// `[B, T, N, H]` => `[B * T * heads, N, d]`
    fn split_heads(&self, x: &Tensor) -> Result<Tensor> {
        let (b, t, n, _) = x.dims4()?;
        let d = self.num_hidden / self.num_heads;
        x.reshape((b, t, n, self.num_heads, d))?
            .transpose(2, 3)?
            .reshape((b * t * self.num_heads, n, d))
    }

    /// Attention weights `[B * T * heads, N, N]` for `src` `[B, T, N, H]` and
    /// residue mask `[B, T, N]`.
    pub fn attention_weights(&self, src: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let (b, t, n, _) = src.dims4()?;
        let d = self.num_hidden / self.num_heads;
        let q = self.split_heads(&forward_flat(&self.w_q, src)?)?;
        let k = self.split_heads(&forward_flat(&self.w_k, src)?)?;
        let logits = (q.matmul(&k.t()?.contiguous()?)? / (d as f64).sqrt())?;

        // outer product of the residue mask, shared by every head
        let mask_2d = mask
            .unsqueeze(3)?
            .broadcast_mul(&mask.unsqueeze(2)?)?
            .unsqueeze(2)?
            .broadcast_as((b, t, self.num_heads, n, n))?
            .reshape((b * t * self.num_heads, n, n))?;
        masked_softmax(&logits, &mask_2d)
    }

    pub fn forward(&self, src: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let (b, t, n, _) = src.dims4()?;
        let d = self.num_hidden / self.num_heads;
        let attend = self.attention_weights(src, mask)?;
        let v = self.split_heads(&forward_flat(&self.w_v, src)?)?;
        let update = attend
            .matmul(&v)?
            .reshape((b, t, self.num_heads, n, d))?
            .transpose(2, 3)?
            .reshape((b, t, n, self.num_hidden))?;
        forward_flat(&self.w_o, &update)
    }
}

/// Graph attention of each residue over its `K` neighbors.
#[derive(Clone, Debug)]
pub struct NeighborAttention {
    num_heads: usize,
    num_hidden: usize,
    w_q: Linear,
    w_k: Linear,
    w_v: Linear,
    w_o: Linear,
}

impl NeighborAttention {
    /// Keys and values are read from concatenated edge and neighbor features of
    /// width `2 * term_hidden_dim`.
    pub fn load(vb: VarBuilder, config: &TerminatorConfig) -> Result<Self> {
        let num_hidden = config.term_hidden_dim;
        let num_in = num_hidden * 2;
        Ok(Self {
            num_heads: config.term_heads,
            num_hidden,
            w_q: linear_no_bias(num_hidden, num_hidden, vb.pp("W_Q"))?,
            w_k: linear_no_bias(num_in, num_hidden, vb.pp("W_K"))?,
            w_v: linear_no_bias(num_in, num_hidden, vb.pp("W_V"))?,
            w_o: linear_no_bias(num_hidden, num_hidden, vb.pp("W_O"))?,
        })
    }

    /// `[B, L, K, H]` => `[B * L * heads, K, d]`
    fn split_heads(&self, x: &Tensor) -> Result<Tensor> {
        let (b, l, k, _) = x.dims4()?;
        let d = self.num_hidden / self.num_heads;
        x.reshape((b, l, k, self.num_heads, d))?
            .transpose(2, 3)?
            .reshape((b * l * self.num_heads, k, d))
    }

    /// Attention weights `[B * L * heads, 1, K]`.
    ///
    /// `h_v`: `[B, L, H]`, `h_ev`: `[B, L, K, 2H]`, `mask_attend`: `[B, L, K]`.
    pub fn attention_weights(
        &self,
        h_v: &Tensor,
        h_ev: &Tensor,
        mask_attend: &Tensor,
    ) -> Result<Tensor> {
        let (b, l, k, _) = h_ev.dims4()?;
        let d = self.num_hidden / self.num_heads;
        let q = self
            .w_q
            .forward(&h_v.reshape((b * l, self.num_hidden))?)?
            .reshape((b * l * self.num_heads, 1, d))?;
        let keys = self.split_heads(&forward_flat(&self.w_k, h_ev)?)?;
        let logits = (q.matmul(&keys.t()?.contiguous()?)? / (d as f64).sqrt())?;
        let mask = mask_attend
            .unsqueeze(2)?
            .broadcast_as((b, l, self.num_heads, k))?
            .reshape((b * l * self.num_heads, 1, k))?;
        masked_softmax(&logits, &mask)
    }

    pub fn forward(&self, h_v: &Tensor, h_ev: &Tensor, mask_attend: &Tensor) -> Result<Tensor> {
        let (b, l, _, _) = h_ev.dims4()?;
        let attend = self.attention_weights(h_v, h_ev, mask_attend)?;
        let v = self.split_heads(&forward_flat(&self.w_v, h_ev)?)?;
        let update = attend.matmul(&v)?.reshape((b, l, self.num_hidden))?;
        forward_flat(&self.w_o, &update)
    }
}
