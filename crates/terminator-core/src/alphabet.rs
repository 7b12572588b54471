//! Amino acid identity alphabet.
//!
//! The twenty canonical residues are indexed alphabetically by one-letter code,
//! followed by the two special symbols used in alignments and energy tables:
//! `X` (unknown, 20) and `-` (gap, 21).
use crate::error::{Result, TerminatorError};
use strum::{Display, EnumIter, IntoEnumIterator};

pub const NUM_CANONICAL: usize = 20;
pub const NUM_EXTENDED: usize = 22;

/// Index of the unknown residue.
pub const UNKNOWN_INDEX: u32 = 20;
/// Index of the alignment gap. Padded MSA rows are filled with it.
pub const GAP_INDEX: u32 = 21;

pub const ALPHABET: [char; NUM_EXTENDED] = [
    'A', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'K', 'L', 'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'V', 'W',
    'Y', 'X', '-',
];

macro_rules! define_residues {
    ($($name:ident: $code3:expr, $code1:expr, $idx:expr),* $(,)?) => {
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Display, EnumIter)]
        pub enum Residue {
            $($name),*
        }

        impl Residue {
            pub const fn code3(&self) -> &'static str {
                match self {
                    $(Self::$name => $code3),*
                }
            }
            pub const fn code1(&self) -> char {
                match self {
                    $(Self::$name => $code1),*
                }
            }
            pub const fn index(&self) -> u32 {
                match self {
                    $(Self::$name => $idx),*
                }
            }
            pub fn from_index(value: u32) -> Option<Self> {
                match value {
                    $($idx => Some(Self::$name),)*
                    _ => None,
                }
            }
        }
    }
}

#[rustfmt::skip]
define_residues! {
    ALA: "ALA", 'A', 0,  CYS: "CYS", 'C', 1,  ASP: "ASP", 'D', 2,
    GLU: "GLU", 'E', 3,  PHE: "PHE", 'F', 4,  GLY: "GLY", 'G', 5,
    HIS: "HIS", 'H', 6,  ILE: "ILE", 'I', 7,  LYS: "LYS", 'K', 8,
    LEU: "LEU", 'L', 9,  MET: "MET", 'M', 10, ASN: "ASN", 'N', 11,
    PRO: "PRO", 'P', 12, GLN: "GLN", 'Q', 13, ARG: "ARG", 'R', 14,
    SER: "SER", 'S', 15, THR: "THR", 'T', 16, VAL: "VAL", 'V', 17,
    TRP: "TRP", 'W', 18, TYR: "TYR", 'Y', 19, UNK: "UNK", 'X', 20,
    GAP: "GAP", '-', 21,
}

impl Residue {
    /// Unrecognised letters map to `UNK`.
    pub fn from_code1(code: char) -> Self {
        Residue::iter()
            .find(|r| r.code1() == code.to_ascii_uppercase())
            .unwrap_or(Residue::UNK)
    }

    /// Unrecognised names map to `UNK`.
    pub fn from_code3(code: &str) -> Self {
        Residue::iter()
            .find(|r| r.code3().eq_ignore_ascii_case(code))
            .unwrap_or(Residue::UNK)
    }

    pub fn is_canonical(&self) -> bool {
        (self.index() as usize) < NUM_CANONICAL
    }
}

/// Which identity space an energy table is defined over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alphabet {
    /// 20 canonical residues; used for pseudo-likelihood scoring.
    Canonical,
    /// 20 canonical residues plus unknown and gap; used for decoding.
    Extended,
}

impl Alphabet {
    pub const fn size(&self) -> usize {
        match self {
            Alphabet::Canonical => NUM_CANONICAL,
            Alphabet::Extended => NUM_EXTENDED,
        }
    }

    /// Checks the flattened pair dimension of an energy table (`n * n`).
    pub fn check_pair_dim(&self, pair_dim: usize) -> Result<()> {
        let n = self.size();
        if pair_dim == n * n {
            return Ok(());
        }
        let found = (pair_dim as f64).sqrt().round() as usize;
        Err(TerminatorError::AlphabetMismatch { expected: n, found })
    }
}

/// One-letter code for an index. Out of range indices become `X`.
pub fn index_to_aa(idx: u32) -> char {
    ALPHABET.get(idx as usize).copied().unwrap_or('X')
}

pub fn aa_to_index(aa: char) -> u32 {
    Residue::from_code1(aa).index()
}

pub fn encode_sequence(seq: &str) -> Vec<u32> {
    seq.chars().map(aa_to_index).collect()
}

pub fn decode_sequence(indices: &[u32]) -> String {
    indices.iter().map(|&i| index_to_aa(i)).collect()
}
