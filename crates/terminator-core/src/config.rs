use crate::error::{Result, TerminatorError};
use serde::Deserialize;

/// How records are ordered before being cut into batches, resolved from the
/// `sort_data` / `semi_shuffle` / `shuffle` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering {
    /// Sort by total TERM residues.
    Sorted,
    /// Sort, then shuffle inside fixed-size windows.
    SemiShuffle,
    /// Full random permutation.
    Shuffle,
    /// Keep load order.
    LoadOrder,
}

/// Batching configuration loaded from JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Fixed batch size. `None` switches to token-budgeted variable batches.
    #[serde(default = "default_batch_size")]
    pub batch_size: Option<usize>,

    /// Budget on `max(focus length) * batch size` for variable batches.
    #[serde(default = "default_max_term_res")]
    pub max_term_res: usize,

    /// Deterministic length-sorted order. Excludes `shuffle` and `semi_shuffle`.
    #[serde(default)]
    pub sort_data: bool,

    #[serde(default = "default_true")]
    pub shuffle: bool,

    #[serde(default)]
    pub semi_shuffle: bool,

    #[serde(default = "default_semi_shuffle_cluster_size")]
    pub semi_shuffle_cluster_size: usize,

    /// Reorder records inside each batch when packaging.
    #[serde(default = "default_true")]
    pub batch_shuffle: bool,

    /// Drop the trailing batch of every pass.
    #[serde(default)]
    pub drop_last: bool,

    /// Proteins with fewer residues are skipped when a store is opened
    /// through [`crate::BatchComposer::open_store`].
    #[serde(default = "default_min_protein_len")]
    pub min_protein_len: usize,

    /// Neighbor slots per residue in the TERM graph.
    #[serde(default = "default_term_graph_neighbors")]
    pub term_graph_neighbors: usize,

    #[serde(default)]
    pub seed: u64,
}

fn default_batch_size() -> Option<usize> {
    Some(16)
}
fn default_max_term_res() -> usize {
    55000
}
fn default_true() -> bool {
    true
}
fn default_semi_shuffle_cluster_size() -> usize {
    100
}
fn default_min_protein_len() -> usize {
    30
}
fn default_term_graph_neighbors() -> usize {
    30
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_term_res: default_max_term_res(),
            sort_data: false,
            shuffle: true,
            semi_shuffle: false,
            semi_shuffle_cluster_size: default_semi_shuffle_cluster_size(),
            batch_shuffle: true,
            drop_last: false,
            min_protein_len: default_min_protein_len(),
            term_graph_neighbors: default_term_graph_neighbors(),
            seed: 0,
        }
    }
}

impl BatchConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject option combinations that cannot be honoured together.
    pub fn validate(&self) -> Result<()> {
        if self.shuffle && self.semi_shuffle {
            return Err(TerminatorError::ConfigConflict(
                "shuffle and semi_shuffle cannot both be set".to_string(),
            ));
        }
        if self.sort_data && (self.shuffle || self.semi_shuffle) {
            return Err(TerminatorError::ConfigConflict(
                "sort_data cannot be combined with shuffle or semi_shuffle".to_string(),
            ));
        }
        if self.batch_size.is_none() && self.max_term_res == 0 {
            return Err(TerminatorError::ConfigConflict(
                "max_term_res > 0 is required for variable size batches".to_string(),
            ));
        }
        if self.batch_size == Some(0) {
            return Err(TerminatorError::ConfigConflict(
                "batch_size must be positive".to_string(),
            ));
        }
        if self.semi_shuffle && self.semi_shuffle_cluster_size == 0 {
            return Err(TerminatorError::ConfigConflict(
                "semi_shuffle_cluster_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the ordering policy from the flags.
    pub fn ordering(&self) -> Ordering {
        if self.sort_data {
            Ordering::Sorted
        } else if self.semi_shuffle {
            Ordering::SemiShuffle
        } else if self.shuffle {
            Ordering::Shuffle
        } else {
            Ordering::LoadOrder
        }
    }

    /// Whether cluster order is reshuffled every pass.
    pub fn shuffles_clusters(&self) -> bool {
        self.shuffle || self.semi_shuffle
    }
}
