//! TERMinator: TERM condenser feeding an energy head, read out as a
//! pseudo-likelihood loss or a decoded sequence.
use crate::condenser::CondenseMsa;
use crate::config::TerminatorConfig;
use crate::energies::{EnergyHead, PairEnergies};
use crate::potts::{nlpl, opt_sequence};
use candle_core::Tensor;
use candle_nn::VarBuilder;
use terminator_core::{Result, TermBatch};

#[derive(Clone, Debug)]
pub struct Terminator<E: EnergyHead = PairEnergies> {
    condenser: CondenseMsa,
    head: E,
}

impl Terminator<PairEnergies> {
    pub fn load(vb: VarBuilder, config: &TerminatorConfig) -> Result<Self> {
        config.validate()?;
        let condenser = CondenseMsa::load(vb.pp("bot"), config)?;
        let head = PairEnergies::load(vb.pp("top"), config)?;
        tracing::info!(
            hidden = config.term_hidden_dim,
            term_layers = config.term_layers,
            graph_layers = config.term_graph_layers,
            output_dim = config.energies_output_dim,
            "loaded TERMinator"
        );
        Ok(Self { condenser, head })
    }
}

impl<E: EnergyHead> Terminator<E> {
    /// Condenser loaded from `vb`, paired with an externally built head.
    pub fn with_head(vb: VarBuilder, config: &TerminatorConfig, head: E) -> Result<Self> {
        config.validate()?;
        let condenser = CondenseMsa::load(vb.pp("bot"), config)?;
        Ok(Self { condenser, head })
    }

    pub fn condenser(&self) -> &CondenseMsa {
        &self.condenser
    }

    /// Energy table `[B, L, K, n * n]` and neighbor indices `[B, L, K]`.
    pub fn potts(&self, batch: &TermBatch, train: bool) -> Result<(Tensor, Tensor)> {
        let condensed = self.condenser.forward(batch, train)?;
        Ok(self.head.forward(&condensed, &batch.x, &batch.x_mask)?)
    }

    /// Batch-averaged per-residue negative log pseudo-likelihood of the
    /// native sequences.
    pub fn forward(&self, batch: &TermBatch, train: bool) -> Result<Tensor> {
        let (etab, e_idx) = self.potts(batch, train)?;
        nlpl(&etab, &e_idx, &batch.seqs, &batch.x_mask)
    }

    /// One decoding pass with neighbor identities taken from `candidates`
    /// `[B, L]`.
    pub fn opt_sequence(&self, batch: &TermBatch, candidates: &Tensor) -> Result<Vec<String>> {
        let (etab, e_idx) = self.potts(batch, false)?;
        opt_sequence(&etab, &e_idx, candidates, &batch.seq_lens)
    }
}
