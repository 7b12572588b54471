//! Residue graph induced by TERM membership.
//!
//! Two residues are neighbors when they appear together in at least one TERM.
//! Each residue keeps the `k` partners it shares the most TERMs with; ties go to
//! the partner closer in sequence. Unused slots point back at the residue itself
//! and are masked out.
use itertools::Itertools;

/// Sinusoid frequencies used to encode the sequence offset of an edge.
pub const EDGE_OFFSET_FREQUENCIES: usize = 8;
/// Normalised co-occurrence plus sin/cos of the sequence offset.
pub const TERM_GRAPH_EDGE_FEATURES: usize = 1 + 2 * EDGE_OFFSET_FREQUENCIES;

#[derive(Debug, Clone, PartialEq)]
pub struct TermGraph {
    pub k: usize,
    /// `[seq_len, k]`
    pub neighbors: Vec<u32>,
    /// `[seq_len, k]`
    pub mask: Vec<f32>,
    /// `[seq_len, k, TERM_GRAPH_EDGE_FEATURES]`
    pub edge_features: Vec<f32>,
}

/// Sinusoidal encoding of a signed sequence offset.
pub fn offset_encoding(offset: i64) -> [f32; 2 * EDGE_OFFSET_FREQUENCIES] {
    let mut out = [0f32; 2 * EDGE_OFFSET_FREQUENCIES];
    for i in 0..EDGE_OFFSET_FREQUENCIES {
        let scale = 10000f32.ln() / (2 * EDGE_OFFSET_FREQUENCIES) as f32;
        let freq = (-(2.0 * i as f32) * scale).exp();
        let angle = offset as f32 * freq;
        out[2 * i] = angle.sin();
        out[2 * i + 1] = angle.cos();
    }
    out
}

/// Build the TERM graph for one protein.
pub fn term_graph(seq_len: usize, term_lens: &[usize], focuses: &[usize], k: usize) -> TermGraph {
    let mut counts = vec![0u32; seq_len * seq_len];
    let mut start = 0;
    for &len in term_lens {
        let members: Vec<usize> = focuses[start..start + len].iter().copied().unique().collect();
        for (&i, &j) in members.iter().cartesian_product(members.iter()) {
            if i != j {
                counts[i * seq_len + j] += 1;
            }
        }
        start += len;
    }
    let max_count = counts.iter().copied().max().unwrap_or(0).max(1) as f32;

    let mut neighbors = Vec::with_capacity(seq_len * k);
    let mut mask = Vec::with_capacity(seq_len * k);
    let mut edge_features = Vec::with_capacity(seq_len * k * TERM_GRAPH_EDGE_FEATURES);
    for i in 0..seq_len {
        let row = &counts[i * seq_len..(i + 1) * seq_len];
        let partners: Vec<usize> = (0..seq_len)
            .filter(|&j| row[j] > 0)
            .sorted_by_key(|&j| (std::cmp::Reverse(row[j]), j.abs_diff(i), j))
            .take(k)
            .collect();
        for slot in 0..k {
            match partners.get(slot) {
                Some(&j) => {
                    neighbors.push(j as u32);
                    mask.push(1.0);
                    edge_features.push(row[j] as f32 / max_count);
                    edge_features.extend(offset_encoding(j as i64 - i as i64));
                }
                None => {
                    neighbors.push(i as u32);
                    mask.push(0.0);
                    edge_features.extend([0f32; TERM_GRAPH_EDGE_FEATURES]);
                }
            }
        }
    }
    TermGraph {
        k,
        neighbors,
        mask,
        edge_features,
    }
}
