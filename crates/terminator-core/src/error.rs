use thiserror::Error;

pub type Result<T> = std::result::Result<T, TerminatorError>;

#[derive(Debug, Error)]
pub enum TerminatorError {
    /// A persisted record is missing data or its lengths disagree.
    #[error("malformed record {pdb}: {reason}")]
    MalformedRecord { pdb: String, reason: String },

    /// Mutually exclusive options were requested together.
    #[error("conflicting configuration: {0}")]
    ConfigConflict(String),

    #[error("empty batch: {0}")]
    EmptyBatch(String),

    /// An energy table was shaped for a different identity alphabet.
    #[error("energy table expects a {expected}-letter alphabet, found {found} letters per residue")]
    AlphabetMismatch { expected: usize, found: usize },

    /// A sequence holds an identity the table's alphabet has no row for.
    #[error("sequence identity {identity} is outside the {size}-letter alphabet")]
    IdentityOutOfRange { identity: u32, size: usize },

    #[error("auxiliary statistics missing: {0}")]
    MissingAuxStats(String),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TerminatorError {
    pub fn malformed(pdb: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            pdb: pdb.into(),
            reason: reason.into(),
        }
    }
}
