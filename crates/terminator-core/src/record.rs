//! Per-protein feature records.
//!
//! A record holds everything the batch composer needs for one structure: the
//! sequence, backbone coordinates, the concatenated TERM alignments and the
//! bookkeeping that maps each focus position back to a residue.
use crate::alphabet::NUM_EXTENDED;
use crate::error::{Result, TerminatorError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Backbone atoms per residue: N, CA, C, O.
pub const BACKBONE_ATOMS: usize = 4;

/// `null` on disk marks a missing atom coordinate.
pub type ResidueCoords = [[Option<f32>; 3]; BACKBONE_ATOMS];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProteinRecord {
    pub pdb: String,
    /// Residue identities, one per resolved residue.
    pub sequence: Vec<u32>,
    /// `[residue][N/CA/C/O][xyz]`
    pub coords: Vec<ResidueCoords>,
    /// `[alignment][focus]` identities of the aligned fragments.
    pub msas: Vec<Vec<u32>>,
    /// `[alignment][focus][feature]` per-alignment statistics.
    pub features: Vec<Vec<Vec<f32>>>,
    pub term_lens: Vec<usize>,
    /// Residue index of every focus position, TERM after TERM.
    pub focuses: Vec<usize>,
    #[serde(default)]
    pub chain_lens: Vec<usize>,
    /// `[focus][stat]`
    #[serde(default)]
    pub ppoe: Option<Vec<Vec<f32>>>,
    /// `[focus][stat]`
    #[serde(default)]
    pub sing_stats: Option<Vec<Vec<f32>>>,
    /// One entry per TERM, flattened `[term_len][term_len][stat]`.
    #[serde(default)]
    pub pair_stats: Option<Vec<Vec<f32>>>,
}

/// Whether a dataset carries the optional auxiliary statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetVariant {
    WithAuxStats,
    WithoutAuxStats,
}

impl ProteinRecord {
    pub fn seq_len(&self) -> usize {
        self.sequence.len()
    }

    /// Total number of focus positions, i.e. the sum of TERM lengths.
    pub fn focus_len(&self) -> usize {
        self.focuses.len()
    }

    pub fn num_alignments(&self) -> usize {
        self.msas.len()
    }

    pub fn num_features(&self) -> usize {
        self.features
            .first()
            .and_then(|a| a.first())
            .map(|f| f.len())
            .unwrap_or(0)
    }

    pub fn variant(&self) -> Result<DatasetVariant> {
        match (&self.ppoe, &self.sing_stats, &self.pair_stats) {
            (Some(_), Some(_), Some(_)) => Ok(DatasetVariant::WithAuxStats),
            (None, None, None) => Ok(DatasetVariant::WithoutAuxStats),
            _ => Err(self.malformed(
                "ppoe, sing_stats and pair_stats must be present or absent together",
            )),
        }
    }

    /// Coordinates with missing atoms as NaN.
    pub fn coords_nan(&self) -> Vec<f32> {
        self.coords
            .iter()
            .flat_map(|res| res.iter().flat_map(|atom| atom.iter()))
            .map(|c| c.unwrap_or(f32::NAN))
            .collect()
    }

    fn malformed(&self, reason: impl Into<String>) -> TerminatorError {
        TerminatorError::malformed(&self.pdb, reason)
    }

    /// Structural checks the padding arithmetic relies on.
    pub fn validate(&self) -> Result<()> {
        if self.term_lens.is_empty() {
            return Err(self.malformed("record has no TERMs"));
        }
        if self.term_lens.iter().any(|&l| l == 0) {
            return Err(self.malformed("zero-length TERM"));
        }
        let total: usize = self.term_lens.iter().sum();
        if total != self.focuses.len() {
            return Err(self.malformed(format!(
                "sum of term_lens ({total}) != number of focuses ({})",
                self.focuses.len()
            )));
        }
        if self.sequence.len() != self.coords.len() {
            return Err(self.malformed(format!(
                "sequence length ({}) != coordinate count ({})",
                self.sequence.len(),
                self.coords.len()
            )));
        }
        if let Some(&bad) = self.sequence.iter().find(|&&s| s as usize >= NUM_EXTENDED) {
            return Err(self.malformed(format!("sequence identity {bad} out of range")));
        }
        if let Some(&bad) = self.focuses.iter().find(|&&f| f >= self.sequence.len()) {
            return Err(self.malformed(format!(
                "focus {bad} beyond sequence length {}",
                self.sequence.len()
            )));
        }
        if self.msas.is_empty() {
            return Err(self.malformed("record has no alignments"));
        }
        if self.msas.len() != self.features.len() {
            return Err(self.malformed(format!(
                "{} MSA rows but {} feature rows",
                self.msas.len(),
                self.features.len()
            )));
        }
        for (row, feats) in self.msas.iter().zip(self.features.iter()) {
            if row.len() != total || feats.len() != total {
                return Err(self.malformed("alignment row does not span the focus axis"));
            }
            if row.iter().any(|&aa| aa as usize >= NUM_EXTENDED) {
                return Err(self.malformed("MSA identity out of range"));
            }
        }
        let nf = self.num_features();
        if nf == 0 || self.features.iter().flatten().any(|f| f.len() != nf) {
            return Err(self.malformed("inconsistent feature width"));
        }
        if self.variant()? == DatasetVariant::WithAuxStats {
            self.validate_aux(total)?;
        }
        Ok(())
    }

    fn validate_aux(&self, total: usize) -> Result<()> {
        for (name, stats) in [("ppoe", &self.ppoe), ("sing_stats", &self.sing_stats)] {
            let Some(stats) = stats else { continue };
            if stats.len() != total {
                return Err(self.malformed(format!("{name} does not span the focus axis")));
            }
            let width = stats.first().map(|s| s.len()).unwrap_or(0);
            if stats.iter().any(|s| s.len() != width) {
                return Err(self.malformed(format!("inconsistent {name} width")));
            }
        }
        if let Some(pair) = &self.pair_stats {
            if pair.len() != self.term_lens.len() {
                return Err(self.malformed("pair_stats needs one entry per TERM"));
            }
            let mut width = None;
            for (stats, &len) in pair.iter().zip(self.term_lens.iter()) {
                if stats.len() % (len * len) != 0 {
                    return Err(self.malformed("pair_stats entry is not term_len x term_len"));
                }
                let w = stats.len() / (len * len);
                if *width.get_or_insert(w) != w {
                    return Err(self.malformed("inconsistent pair_stats width"));
                }
            }
        }
        Ok(())
    }

    /// `{dir}/{pdb}/{pdb}.features`
    pub fn features_path(dir: &Path, pdb: &str) -> PathBuf {
        dir.join(pdb).join(format!("{pdb}.features"))
    }

    /// `{dir}/{pdb}/{pdb}.length`
    pub fn length_path(dir: &Path, pdb: &str) -> PathBuf {
        dir.join(pdb).join(format!("{pdb}.length"))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Persist the record and its length sidecar under `dir/{pdb}/`.
    /// Rewriting the same record is idempotent.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        self.validate()?;
        fs::create_dir_all(dir.join(&self.pdb))?;
        let path = Self::features_path(dir, &self.pdb);
        fs::write(&path, serde_json::to_string(self)?)?;
        fs::write(
            Self::length_path(dir, &self.pdb),
            format!("{}\n{}\n", self.focus_len(), self.seq_len()),
        )?;
        Ok(path)
    }
}
