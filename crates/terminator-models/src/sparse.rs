//! Sparse persisted form of an energy table: `(i, j) -> n * n` energies for
//! every real residue pair present in the neighbor graph.
use candle_core::Tensor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use terminator_core::{Alphabet, Result, TerminatorError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairEnergy {
    pub i: usize,
    pub j: usize,
    /// Row-major `[a_i][a_j]`.
    pub energies: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseEtab {
    pub pdb: String,
    pub num_letters: usize,
    pub seq_len: usize,
    /// Sorted by `(i, j)`.
    pub pairs: Vec<PairEnergy>,
}

impl SparseEtab {
    /// Convert one protein's table `[L, K, n * n]` with indices `[L, K]` and
    /// residue mask `[L]`. Slots pointing at masked or padded residues, and
    /// all-zero slots, are dropped.
    pub fn from_dense(
        pdb: &str,
        etab: &Tensor,
        e_idx: &Tensor,
        x_mask: &Tensor,
        seq_len: usize,
        alphabet: Alphabet,
    ) -> Result<Self> {
        let (_, _, pair_dim) = etab.dims3()?;
        alphabet.check_pair_dim(pair_dim)?;
        let etab: Vec<Vec<Vec<f32>>> = etab.to_vec3()?;
        let e_idx: Vec<Vec<u32>> = e_idx.to_vec2()?;
        let x_mask: Vec<f32> = x_mask.to_vec1()?;
        let valid = |r: usize| r < seq_len && x_mask.get(r).map(|&m| m > 0.0).unwrap_or(false);

        let mut pairs: BTreeMap<(usize, usize), Vec<f32>> = BTreeMap::new();
        for (i, (slots, neighbors)) in etab.iter().zip(e_idx.iter()).enumerate() {
            if !valid(i) {
                continue;
            }
            for (energies, &j) in slots.iter().zip(neighbors.iter()) {
                let j = j as usize;
                if !valid(j) || energies.iter().all(|&e| e == 0.0) {
                    continue;
                }
                if pairs.insert((i, j), energies.clone()).is_some() {
                    tracing::debug!(pdb, i, j, "duplicate neighbor slot, keeping the last");
                }
            }
        }
        Ok(Self {
            pdb: pdb.to_string(),
            num_letters: alphabet.size(),
            seq_len,
            pairs: pairs
                .into_iter()
                .map(|((i, j), energies)| PairEnergy { i, j, energies })
                .collect(),
        })
    }

    /// Split a batched table `[B, L, K, n * n]` into one sparse table per protein.
    pub fn from_batch(
        ids: &[String],
        etab: &Tensor,
        e_idx: &Tensor,
        x_mask: &Tensor,
        seq_lens: &[usize],
        alphabet: Alphabet,
    ) -> Result<Vec<Self>> {
        if ids.len() != etab.dim(0)? || seq_lens.len() != ids.len() {
            return Err(TerminatorError::malformed(
                ids.join(","),
                "ids, sequence lengths and energy table disagree on batch size",
            ));
        }
        ids.iter()
            .zip(seq_lens.iter())
            .enumerate()
            .map(|(b, (pdb, &len))| {
                Self::from_dense(pdb, &etab.get(b)?, &e_idx.get(b)?, &x_mask.get(b)?, len, alphabet)
            })
            .collect()
    }

    pub fn get(&self, i: usize, j: usize) -> Option<&[f32]> {
        self.pairs
            .binary_search_by_key(&(i, j), |p| (p.i, p.j))
            .ok()
            .map(|idx| self.pairs[idx].energies.as_slice())
    }

    /// Energy of identities `a` at `i` and `b` at `j`.
    pub fn energy(&self, i: usize, j: usize, a: usize, b: usize) -> Option<f32> {
        if a >= self.num_letters || b >= self.num_letters {
            return None;
        }
        self.get(i, j).map(|e| e[a * self.num_letters + b])
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
