//! Transformer blocks: attention, residual + LayerNorm, position-wise feed
//! forward, residual + LayerNorm, then the validity mask.
use crate::attention::{NeighborAttention, TermAttention};
use crate::config::TerminatorConfig;
use crate::utilities::{cat_neighbors_nodes, forward_flat, gather_nodes};
use candle_core::{Module, Result, Tensor, D};
use candle_nn::{layer_norm, linear, Dropout, LayerNorm, Linear, VarBuilder};
use terminator_core::graph::TERM_GRAPH_EDGE_FEATURES;

const NORM_EPS: f64 = 1e-6;

#[derive(Clone, Debug)]
pub struct PositionWiseFeedForward {
    w_in: Linear,
    w_out: Linear,
}

impl PositionWiseFeedForward {
    pub fn new(vb: VarBuilder, dim_input: usize, dim_feedforward: usize) -> Result<Self> {
        let w_in = linear(dim_input, dim_feedforward, vb.pp("W_in"))?;
        let w_out = linear(dim_feedforward, dim_input, vb.pp("W_out"))?;
        Ok(Self { w_in, w_out })
    }
}

impl Module for PositionWiseFeedForward {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.w_in.forward(x)?.relu()?;
        self.w_out.forward(&x)
    }
}

#[derive(Clone, Debug)]
pub struct TermTransformerLayer {
    attention: TermAttention,
    dense: PositionWiseFeedForward,
    norm1: LayerNorm,
    norm2: LayerNorm,
    dropout: Dropout,
}

impl TermTransformerLayer {
    pub fn load(vb: VarBuilder, config: &TerminatorConfig, layer: usize) -> Result<Self> {
        let vb = vb.pp(layer);
        let num_hidden = config.term_hidden_dim;
        Ok(Self {
            attention: TermAttention::load(vb.pp("attention"), config)?,
            dense: PositionWiseFeedForward::new(vb.pp("dense"), num_hidden, num_hidden * 4)?,
            norm1: layer_norm(num_hidden, NORM_EPS, vb.pp("norm1"))?,
            norm2: layer_norm(num_hidden, NORM_EPS, vb.pp("norm2"))?,
            dropout: Dropout::new(config.transformer_dropout),
        })
    }

    /// `src`: `[B, T, N, H]`, `mask`: `[B, T, N]`.
    pub fn forward(&self, src: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let dsrc = self.attention.forward(src, mask)?;
        let src = self.norm1.forward(&(src + self.dropout.forward(&dsrc, train)?)?)?;

        let dsrc = forward_flat(&self.dense, &src)?;
        let src = self.norm2.forward(&(&src + self.dropout.forward(&dsrc, train)?)?)?;
        src.broadcast_mul(&mask.unsqueeze(D::Minus1)?)
    }
}

/// Stack of independently parameterised intra-TERM blocks.
#[derive(Clone, Debug)]
pub struct TermTransformer {
    layers: Vec<TermTransformerLayer>,
}

impl TermTransformer {
    pub fn load(vb: VarBuilder, config: &TerminatorConfig) -> Result<Self> {
        let layers = (0..config.term_layers)
            .map(|i| TermTransformerLayer::load(vb.pp("layers"), config, i))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { layers })
    }

    pub fn forward(&self, src: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let mut output = src.clone();
        for layer in &self.layers {
            output = layer.forward(&output, mask, train)?;
        }
        Ok(output)
    }
}

#[derive(Clone, Debug)]
pub struct NeighborTransformerLayer {
    attention: NeighborAttention,
    dense: PositionWiseFeedForward,
    norm1: LayerNorm,
    norm2: LayerNorm,
    dropout: Dropout,
}

impl NeighborTransformerLayer {
    pub fn load(vb: VarBuilder, config: &TerminatorConfig, layer: usize) -> Result<Self> {
        let vb = vb.pp(layer);
        let num_hidden = config.term_hidden_dim;
        Ok(Self {
            attention: NeighborAttention::load(vb.pp("attention"), config)?,
            dense: PositionWiseFeedForward::new(vb.pp("dense"), num_hidden, num_hidden * 4)?,
            norm1: layer_norm(num_hidden, NORM_EPS, vb.pp("norm1"))?,
            norm2: layer_norm(num_hidden, NORM_EPS, vb.pp("norm2"))?,
            dropout: Dropout::new(config.transformer_dropout),
        })
    }

    /// `h_v`: `[B, L, H]`, `h_ev`: `[B, L, K, 2H]`, `mask_v`: `[B, L]`,
    /// `mask_attend`: `[B, L, K]`.
    pub fn forward(
        &self,
        h_v: &Tensor,
        h_ev: &Tensor,
        mask_v: &Tensor,
        mask_attend: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let dh = self.attention.forward(h_v, h_ev, mask_attend)?;
        let h_v = self.norm1.forward(&(h_v + self.dropout.forward(&dh, train)?)?)?;

        let dh = forward_flat(&self.dense, &h_v)?;
        let h_v = self.norm2.forward(&(&h_v + self.dropout.forward(&dh, train)?)?)?;
        h_v.broadcast_mul(&mask_v.unsqueeze(D::Minus1)?)
    }
}

/// Residue-level refinement over the TERM co-membership graph.
#[derive(Clone, Debug)]
pub struct TermGraphEncoder {
    w_e: Linear,
    layers: Vec<NeighborTransformerLayer>,
    w_out: Linear,
}

impl TermGraphEncoder {
    pub fn load(vb: VarBuilder, config: &TerminatorConfig) -> Result<Self> {
        let num_hidden = config.term_hidden_dim;
        let layers = (0..config.term_graph_layers)
            .map(|i| NeighborTransformerLayer::load(vb.pp("layers"), config, i))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            w_e: linear(TERM_GRAPH_EDGE_FEATURES, num_hidden, vb.pp("W_e"))?,
            layers,
            w_out: linear(num_hidden, num_hidden, vb.pp("W_out"))?,
        })
    }

    /// `h_v`: `[B, L, H]`, `edges`: `[B, L, K, E]`, `e_idx`/`e_mask`: `[B, L, K]`,
    /// `mask`: `[B, L]`.
    pub fn forward(
        &self,
        h_v: &Tensor,
        edges: &Tensor,
        e_idx: &Tensor,
        e_mask: &Tensor,
        mask: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let h_e = forward_flat(&self.w_e, edges)?;
        let mask_attend = gather_nodes(&mask.unsqueeze(D::Minus1)?, e_idx)?
            .squeeze(D::Minus1)?
            .broadcast_mul(&mask.unsqueeze(D::Minus1)?)?
            .mul(e_mask)?;
        let mut h_v = h_v.clone();
        for layer in &self.layers {
            let h_ev = cat_neighbors_nodes(&h_v, &h_e, e_idx)?;
            h_v = layer.forward(&h_v, &h_ev, mask, &mask_attend, train)?;
        }
        forward_flat(&self.w_out, &h_v)?.broadcast_mul(&mask.unsqueeze(D::Minus1)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, IndexOp};
    use candle_nn::VarMap;

    fn config() -> TerminatorConfig {
        TerminatorConfig {
            term_hidden_dim: 8,
            term_heads: 2,
            term_layers: 2,
            term_graph_layers: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_layers_are_independent() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let _ = TermTransformer::load(vb.pp("term"), &config())?;
        let names: Vec<String> = varmap
            .data()
            .lock()
            .map(|data| data.keys().cloned().collect())
            .unwrap_or_default();
        assert!(names.iter().any(|n| n == "term.layers.0.attention.W_Q.weight"));
        assert!(names.iter().any(|n| n == "term.layers.1.attention.W_Q.weight"));
        Ok(())
    }

    #[test]
    fn test_term_stack_masks_padding() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let stack = TermTransformer::load(vb, &config())?;
        let src = Tensor::randn(0f32, 1.0, (1, 2, 3, 8), &device)?;
        let mask = Tensor::new(&[[[1f32, 1.0, 0.0], [1.0, 0.0, 0.0]]], &device)?;
        let out = stack.forward(&src, &mask, false)?;
        assert_eq!(out.dims(), &[1, 2, 3, 8]);
        let padded: Vec<f32> = out.i((0, 1, 1))?.to_vec1()?;
        assert!(padded.iter().all(|&v| v == 0.0));
        let real: Vec<f32> = out.i((0, 0, 0))?.to_vec1()?;
        assert!(real.iter().all(|v| v.is_finite()));
        assert!(real.iter().any(|&v| v != 0.0));
        Ok(())
    }

    #[test]
    fn test_graph_encoder_shapes() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder = TermGraphEncoder::load(vb, &config())?;
        let h_v = Tensor::randn(0f32, 1.0, (1, 3, 8), &device)?;
        let edges = Tensor::randn(0f32, 1.0, (1, 3, 2, TERM_GRAPH_EDGE_FEATURES), &device)?;
        let e_idx = Tensor::new(&[[[1u32, 2], [0, 2], [2, 2]]], &device)?;
        let e_mask = Tensor::new(&[[[1f32, 1.0], [1.0, 1.0], [0.0, 0.0]]], &device)?;
        let mask = Tensor::new(&[[1f32, 1.0, 1.0]], &device)?;
        let out = encoder.forward(&h_v, &edges, &e_idx, &e_mask, &mask, false)?;
        assert_eq!(out.dims(), &[1, 3, 8]);
        let out: Vec<f32> = out.flatten_all()?.to_vec1()?;
        assert!(out.iter().all(|v| v.is_finite()));
        Ok(())
    }
}
