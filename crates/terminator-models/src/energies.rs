//! Energy heads: condensed residue embeddings plus structure to a Potts table.
use crate::config::TerminatorConfig;
use crate::utilities::{compute_nearest_neighbors, forward_flat, gather_nodes, rbf};
use candle_core::{IndexOp, Result, Tensor, D};
use candle_nn::{linear, Linear, VarBuilder};

/// Contract between the condenser and the energy table interpreter.
pub trait EnergyHead {
    /// `nodes`: `[B, L, H]`, `coords`: `[B, L, 4, 3]`, `x_mask`: `[B, L]`.
    ///
    /// Returns the table `[B, L, K, n * n]` and neighbor indices `[B, L, K]`.
    /// Slots without a real neighbor must point at a valid residue and carry
    /// zero energies.
    fn forward(&self, nodes: &Tensor, coords: &Tensor, x_mask: &Tensor) -> Result<(Tensor, Tensor)>;
}

/// Reference head: CA k-nearest neighbors and a pair MLP over
/// `(h_i, h_j, RBF(d_ij))`.
#[derive(Clone, Debug)]
pub struct PairEnergies {
    k_neighbors: usize,
    num_rbf: usize,
    w_v: Linear,
    w_1: Linear,
    w_2: Linear,
    w_out: Linear,
}

impl PairEnergies {
    pub fn load(vb: VarBuilder, config: &TerminatorConfig) -> Result<Self> {
        let hidden = config.energies_hidden_dim;
        Ok(Self {
            k_neighbors: config.k_neighbors,
            num_rbf: config.num_rbf,
            w_v: linear(config.term_hidden_dim, hidden, vb.pp("W_v"))?,
            w_1: linear(2 * hidden + config.num_rbf, hidden, vb.pp("W_1"))?,
            w_2: linear(hidden, hidden, vb.pp("W_2"))?,
            w_out: linear(hidden, config.energies_output_dim, vb.pp("W_out"))?,
        })
    }
}

impl EnergyHead for PairEnergies {
    fn forward(
        &self,
        nodes: &Tensor,
        coords: &Tensor,
        x_mask: &Tensor,
    ) -> Result<(Tensor, Tensor)> {
        let ca = coords.i((.., .., 1, ..))?.contiguous()?;
        let (distances, e_idx, valid) =
            compute_nearest_neighbors(&ca, x_mask, self.k_neighbors, 1e-6)?;
        let (b, l, k) = e_idx.dims3()?;

        let h = forward_flat(&self.w_v, nodes)?.relu()?;
        let hidden = h.dim(D::Minus1)?;
        let h_i = h.unsqueeze(2)?.broadcast_as((b, l, k, hidden))?;
        let h_j = gather_nodes(&h, &e_idx)?;
        let edges = Tensor::cat(&[&h_i, &h_j, &rbf(&distances, self.num_rbf)?], D::Minus1)?;

        let e = forward_flat(&self.w_1, &edges)?.relu()?;
        let e = forward_flat(&self.w_2, &e)?.relu()?;
        let etab = forward_flat(&self.w_out, &e)?.broadcast_mul(&valid.unsqueeze(3)?)?;
        Ok((etab, e_idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_invalid_slots_are_zero() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let config = TerminatorConfig {
            term_hidden_dim: 8,
            k_neighbors: 3,
            ..Default::default()
        };
        let head = PairEnergies::load(vb, &config)?;

        let nodes = Tensor::randn(0f32, 1.0, (1, 3, 8), &device)?;
        let coords = Tensor::randn(0f32, 3.0, (1, 3, 4, 3), &device)?;
        let x_mask = Tensor::new(&[[1f32, 1.0, 0.0]], &device)?;
        let (etab, e_idx) = head.forward(&nodes, &coords, &x_mask)?;
        assert_eq!(etab.dims(), &[1, 3, 3, 400]);
        assert_eq!(e_idx.dims(), &[1, 3, 3]);

        let e_idx: Vec<Vec<u32>> = e_idx.i(0)?.to_vec2()?;
        assert_eq!(e_idx[0][0], 1);
        assert_eq!(e_idx[1][0], 0);
        assert_eq!(e_idx[2], vec![2, 2, 2]);
        // only the first slot of residues 0 and 1 is a real neighbor
        let energy_sums: Vec<Vec<f32>> = etab.abs()?.sum(3)?.i(0)?.to_vec2()?;
        assert_eq!(energy_sums[0][1], 0.0);
        assert_eq!(energy_sums[0][2], 0.0);
        assert_eq!(energy_sums[2], vec![0.0; 3]);
        Ok(())
    }
}
