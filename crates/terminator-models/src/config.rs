use serde::Deserialize;
use terminator_core::{Alphabet, Result, TerminatorError};

/// Hyper-parameters of the condenser and the reference energy head.
#[derive(Debug, Clone, Deserialize)]
pub struct TerminatorConfig {
    #[serde(default = "default_term_hidden_dim")]
    pub term_hidden_dim: usize,

    #[serde(default = "default_term_heads")]
    pub term_heads: usize,

    /// Intra-TERM transformer blocks.
    #[serde(default = "default_term_layers")]
    pub term_layers: usize,

    /// Neighbor-attention blocks over the TERM graph.
    #[serde(default = "default_term_graph_layers")]
    pub term_graph_layers: usize,

    /// Per-alignment scalar features.
    #[serde(default = "default_num_features")]
    pub num_features: usize,

    /// Width of `ppoe` and `sing_stats` together. Zero disables auxiliary inputs.
    #[serde(default)]
    pub num_aux_stats: usize,

    #[serde(default = "default_num_pair_stats")]
    pub num_pair_stats: usize,

    #[serde(default = "default_dropout")]
    pub transformer_dropout: f32,

    /// Longest protein the positional encoding covers.
    #[serde(default = "default_fe_max_len")]
    pub fe_max_len: usize,

    #[serde(default = "default_k_neighbors")]
    pub k_neighbors: usize,

    #[serde(default = "default_energies_hidden_dim")]
    pub energies_hidden_dim: usize,

    /// `n * n` for an `n` letter alphabet.
    #[serde(default = "default_energies_output_dim")]
    pub energies_output_dim: usize,

    #[serde(default = "default_num_rbf")]
    pub num_rbf: usize,
}

fn default_term_hidden_dim() -> usize {
    32
}
fn default_term_heads() -> usize {
    4
}
fn default_term_layers() -> usize {
    4
}
fn default_term_graph_layers() -> usize {
    4
}
fn default_num_features() -> usize {
    9
}
fn default_num_pair_stats() -> usize {
    28
}
fn default_dropout() -> f32 {
    0.1
}
fn default_fe_max_len() -> usize {
    1000
}
fn default_k_neighbors() -> usize {
    30
}
fn default_energies_hidden_dim() -> usize {
    32
}
fn default_energies_output_dim() -> usize {
    20 * 20
}
fn default_num_rbf() -> usize {
    16
}

impl Default for TerminatorConfig {
    fn default() -> Self {
        Self {
            term_hidden_dim: default_term_hidden_dim(),
            term_heads: default_term_heads(),
            term_layers: default_term_layers(),
            term_graph_layers: default_term_graph_layers(),
            num_features: default_num_features(),
            num_aux_stats: 0,
            num_pair_stats: default_num_pair_stats(),
            transformer_dropout: default_dropout(),
            fe_max_len: default_fe_max_len(),
            k_neighbors: default_k_neighbors(),
            energies_hidden_dim: default_energies_hidden_dim(),
            energies_output_dim: default_energies_output_dim(),
            num_rbf: default_num_rbf(),
        }
    }
}

impl TerminatorConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Config whose energy head emits tables over `alphabet`.
    pub fn for_alphabet(alphabet: Alphabet) -> Self {
        let n = alphabet.size();
        Self {
            energies_output_dim: n * n,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.term_heads == 0 || self.term_hidden_dim % self.term_heads != 0 {
            return Err(TerminatorError::ConfigConflict(format!(
                "term_hidden_dim {} is not divisible by term_heads {}",
                self.term_hidden_dim, self.term_heads
            )));
        }
        if self.term_hidden_dim % 2 != 0 {
            return Err(TerminatorError::ConfigConflict(
                "term_hidden_dim must be even for the positional encoding".to_string(),
            ));
        }
        if self.k_neighbors == 0 {
            return Err(TerminatorError::ConfigConflict(
                "k_neighbors must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether the condenser consumes auxiliary statistics.
    pub fn uses_aux_stats(&self) -> bool {
        self.num_aux_stats > 0
    }
}
