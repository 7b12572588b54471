//! Energy table interpreter.
//!
//! An energy table `[B, L, K, n * n]` holds, for residue `i` and neighbor slot
//! `k`, the interaction energy of every identity pair `(a_i, a_j)` where
//! `j = e_idx[b, i, k]`. Both operations here fix the neighbor identities to a
//! given sequence and look at the `n` energies left for each position.
use candle_core::{Tensor, D};
use candle_nn::ops::log_softmax;
use terminator_core::alphabet::decode_sequence;
use terminator_core::{Alphabet, Result, TerminatorError};

/// Energy of every identity at every position given its neighbors' identities
/// in `seqs`, `[B, L, n]`.
pub fn neighbor_energies(
    etab: &Tensor,
    e_idx: &Tensor,
    seqs: &Tensor,
    alphabet: Alphabet,
) -> Result<Tensor> {
    let (n_batch, n_res, k, pair_dim) = etab.dims4()?;
    alphabet.check_pair_dim(pair_dim)?;
    let n = alphabet.size();
    if e_idx.dims() != [n_batch, n_res, k] {
        return Err(candle_core::Error::Msg(format!(
            "neighbor index {:?} does not match energy table {:?}",
            e_idx.dims(),
            etab.dims()
        ))
        .into());
    }
    let max_identity = seqs.flatten_all()?.max(0)?.to_scalar::<u32>()?;
    if max_identity as usize >= n {
        return Err(TerminatorError::IdentityOutOfRange {
            identity: max_identity,
            size: n,
        });
    }

    let etab = etab.reshape((n_batch, n_res, k, n, n))?;
    // identity of every neighbor, [B, L, K]
    let e_aa = seqs
        .unsqueeze(2)?
        .expand((n_batch, n_res, k))?
        .contiguous()?
        .gather(&e_idx.contiguous()?, 1)?;
    let e_aa = e_aa
        .reshape((n_batch, n_res, k, 1, 1))?
        .expand((n_batch, n_res, k, n, 1))?
        .contiguous()?;
    let edge_energies = etab.contiguous()?.gather(&e_aa, 4)?.squeeze(4)?;
    Ok(edge_energies.sum(2)?)
}

/// Negative log pseudo-likelihood of `seqs`, averaged over valid residues of
/// each protein and then over the batch. Requires a 20 letter table.
///
/// Identities at masked positions are ignored, so padding or unresolved
/// residues may carry `X` or gap.
pub fn nlpl(etab: &Tensor, e_idx: &Tensor, seqs: &Tensor, x_mask: &Tensor) -> Result<Tensor> {
    let seqs = &x_mask.gt(0f64)?.where_cond(seqs, &seqs.zeros_like()?)?;
    let aa_energies = neighbor_energies(etab, e_idx, seqs, Alphabet::Canonical)?;
    let log_probs = log_softmax(&aa_energies.neg()?, D::Minus1)?;
    let seq_log_probs = log_probs
        .gather(&seqs.unsqueeze(2)?.contiguous()?, 2)?
        .squeeze(2)?
        .mul(x_mask)?;
    let n_res = x_mask.sum(D::Minus1)?.maximum(1f32)?;
    let per_protein = seq_log_probs.sum(D::Minus1)?.div(&n_res)?;
    Ok(per_protein.mean(0)?.neg()?)
}

/// One parallel pass of maximum pseudo-likelihood decoding over the 22 letter
/// alphabet: each position takes its lowest energy identity given that every
/// neighbor keeps its identity in `candidates`. Returns `[B, L]` indices.
///
/// The result is not a fixed point. Feed it back as `candidates` to iterate.
pub fn decode(etab: &Tensor, e_idx: &Tensor, candidates: &Tensor) -> Result<Tensor> {
    let aa_energies = neighbor_energies(etab, e_idx, candidates, Alphabet::Extended)?;
    Ok(aa_energies.neg()?.argmax(D::Minus1)?)
}

/// [`decode`] mapped to one-letter strings, truncated to each sequence length.
pub fn opt_sequence(
    etab: &Tensor,
    e_idx: &Tensor,
    candidates: &Tensor,
    seq_lens: &[usize],
) -> Result<Vec<String>> {
    let indices: Vec<Vec<u32>> = decode(etab, e_idx, candidates)?.to_vec2()?;
    Ok(indices
        .iter()
        .zip(seq_lens.iter())
        .map(|(row, &len)| decode_sequence(&row[..len.min(row.len())]))
        .collect())
}
