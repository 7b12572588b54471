//! TERM condenser.
//!
//! Turns the alignments of every TERM into one embedding per residue:
//!
//! 1. embed alignment identities and per-alignment features and pool over
//!    alignments with a learned masked softmax, giving one vector per focus
//!    position;
//! 2. add a sinusoidal encoding of the focus residue index;
//! 3. split the focus axis into TERMs, add projected auxiliary statistics when
//!    the model uses them, and run the intra-TERM transformer;
//! 4. average every focus copy of a residue back onto the residue axis;
//! 5. refine residues with neighbor attention over the TERM graph.
use crate::config::TerminatorConfig;
use crate::layers::{TermGraphEncoder, TermTransformer};
use crate::utilities::{
    aggregate_focuses, batchify_terms, forward_flat, length_mask, masked_softmax,
    sinusoidal_table, unbatchify_terms,
};
use candle_core::{Module, Tensor, D};
use candle_nn::{embedding, linear, Embedding, Linear, VarBuilder};
use terminator_core::{AuxStats, Result, TermBatch, TerminatorError, NUM_EXTENDED};

#[derive(Clone, Debug)]
struct AuxProjection {
    w_single: Linear,
    w_pair: Linear,
}

impl AuxProjection {
    fn load(vb: VarBuilder, config: &TerminatorConfig) -> candle_core::Result<Self> {
        let num_hidden = config.term_hidden_dim;
        Ok(Self {
            w_single: linear(config.num_aux_stats, num_hidden, vb.pp("W_single"))?,
            w_pair: linear(config.num_pair_stats, num_hidden, vb.pp("W_pair"))?,
        })
    }

    /// Per TERM residue contribution `[B, n_terms, L_t, H]`. Pair statistics
    /// are averaged over the valid partners in the TERM.
    fn forward(
        &self,
        stats: &AuxStats,
        term_mask: &Tensor,
        n_terms: usize,
    ) -> candle_core::Result<Tensor> {
        let single = Tensor::cat(&[&stats.ppoe, &stats.sing_stats], D::Minus1)?;
        let single = forward_flat(&self.w_single, &single)?;

        let partners = term_mask.unsqueeze(2)?.unsqueeze(4)?;
        let counts = term_mask.sum_keepdim(2)?.maximum(1f32)?.unsqueeze(3)?;
        let pair = forward_flat(&self.w_pair, &stats.pair_stats)?
            .broadcast_mul(&partners)?
            .sum(3)?
            .broadcast_div(&counts)?;

        let out = (single + pair)?.broadcast_mul(&term_mask.unsqueeze(3)?)?;
        let present = out.dim(1)?;
        if n_terms > present {
            out.pad_with_zeros(1, 0, n_terms - present)
        } else {
            Ok(out)
        }
    }
}

#[derive(Clone, Debug)]
pub struct CondenseMsa {
    hidden_dim: usize,
    fe_max_len: usize,
    embedding: Embedding,
    w_features: Linear,
    w_pool: Linear,
    positional: Embedding,
    aux: Option<AuxProjection>,
    term_transformer: TermTransformer,
    graph_encoder: TermGraphEncoder,
}

impl CondenseMsa {
    pub fn load(vb: VarBuilder, config: &TerminatorConfig) -> candle_core::Result<Self> {
        let hidden_dim = config.term_hidden_dim;
        let table = sinusoidal_table(config.fe_max_len, hidden_dim, vb.device())?
            .to_dtype(vb.dtype())?;
        let aux = if config.uses_aux_stats() {
            Some(AuxProjection::load(vb.pp("aux"), config)?)
        } else {
            None
        };
        Ok(Self {
            hidden_dim,
            fe_max_len: config.fe_max_len,
            embedding: embedding(NUM_EXTENDED, hidden_dim, vb.pp("embedding"))?,
            w_features: linear(config.num_features, hidden_dim, vb.pp("W_features"))?,
            w_pool: linear(hidden_dim, 1, vb.pp("W_pool"))?,
            positional: Embedding::new(table, hidden_dim),
            aux,
            term_transformer: TermTransformer::load(vb.pp("term_transformer"), config)?,
            graph_encoder: TermGraphEncoder::load(vb.pp("graph_encoder"), config)?,
        })
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// One embedding per focus position, `[B, F, H]`.
    fn embed_alignments(&self, batch: &TermBatch) -> candle_core::Result<Tensor> {
        let emb = (self.embedding.forward(&batch.msas)?
            + forward_flat(&self.w_features, &batch.features)?)?;
        // [B, F, A] scores, normalised over real alignments
        let scores = forward_flat(&self.w_pool, &emb)?
            .squeeze(3)?
            .transpose(1, 2)?
            .contiguous()?;
        let weights = masked_softmax(&scores, &batch.msa_mask.unsqueeze(1)?)?;
        let pooled = emb
            .transpose(1, 2)?
            .broadcast_mul(&weights.unsqueeze(3)?)?
            .sum(2)?;
        let positions = self.positional.forward(&batch.focuses)?;
        (pooled + positions)?.broadcast_mul(&batch.focus_mask.unsqueeze(2)?)
    }

    /// Condensed residue embeddings `[B, L, H]`, zero past each sequence end.
    pub fn forward(&self, batch: &TermBatch, train: bool) -> Result<Tensor> {
        let n_residues = batch.seqs.dim(1)?;
        if n_residues > self.fe_max_len {
            return Err(TerminatorError::ConfigConflict(format!(
                "protein of {n_residues} residues exceeds fe_max_len {}",
                self.fe_max_len
            )));
        }

        let flat = self.embed_alignments(batch)?;
        let terms = batchify_terms(&flat, &batch.term_lens)?;
        let term_mask = batchify_terms(&batch.focus_mask.unsqueeze(2)?, &batch.term_lens)?
            .squeeze(3)?;

        let terms = match (&self.aux, &batch.aux) {
            (Some(projection), Some(stats)) => {
                let n_terms = terms.dim(1)?;
                (&terms + projection.forward(stats, &batch.term_mask, n_terms)?)?
            }
            (Some(_), None) => {
                return Err(TerminatorError::MissingAuxStats(format!(
                    "model expects auxiliary statistics, batch {:?} has none",
                    batch.ids
                )))
            }
            (None, Some(_)) => {
                tracing::debug!("batch carries auxiliary statistics the model does not use");
                terms
            }
            (None, None) => terms,
        };

        let terms = self.term_transformer.forward(&terms, &term_mask, train)?;
        let flat = unbatchify_terms(&terms, &batch.term_lens)?;
        let residues = aggregate_focuses(&flat, &batch.focuses, &batch.focus_mask, n_residues)?;

        let mask = length_mask(&batch.seq_lens, n_residues, residues.device())?;
        let condensed = self.graph_encoder.forward(
            &residues,
            &batch.term_graph_features,
            &batch.term_graph_idx,
            &batch.term_graph_mask,
            &mask,
            train,
        )?;
        tracing::debug!(
            batch = batch.len(),
            residues = n_residues,
            terms = term_mask.dim(1)?,
            "condensed TERM alignments"
        );
        Ok(condensed)
    }
}
