//! Two-level ragged data: a protein is a sequence of TERMs, each a sequence of
//! focus positions carrying a fixed-width row of values.
//!
//! Two padded views are needed downstream:
//!
//! - [`RaggedTerms::pad_to`] lays the TERMs out as a dense
//!   `[n_terms, max_term_len, width]` block, padding each TERM on the residue
//!   axis and the TERM axis with zeros.
//! - [`extend_term_lens`] appends filler TERM lengths so that the lengths sum
//!   to the padded width of the flat focus axis. A flat `[focus, ...]` tensor can
//!   then be split TERM by TERM without any leftover positions.
use crate::error::{Result, TerminatorError};
use candle_core::{Device, Tensor};

#[derive(Debug, Clone, PartialEq)]
pub struct RaggedTerms {
    term_lens: Vec<usize>,
    width: usize,
    /// Row-major `[sum(term_lens), width]`.
    values: Vec<f32>,
}

impl RaggedTerms {
    pub fn new(term_lens: Vec<usize>, width: usize, values: Vec<f32>) -> Result<Self> {
        let rows: usize = term_lens.iter().sum();
        if rows * width != values.len() {
            return Err(TerminatorError::malformed(
                "ragged terms",
                format!(
                    "{} values do not fill {rows} focus rows of width {width}",
                    values.len()
                ),
            ));
        }
        Ok(Self {
            term_lens,
            width,
            values,
        })
    }

    /// Build from one row per focus position.
    pub fn from_rows(term_lens: Vec<usize>, rows: &[Vec<f32>]) -> Result<Self> {
        let width = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.iter().any(|r| r.len() != width) {
            return Err(TerminatorError::malformed("ragged terms", "rows differ in width"));
        }
        Self::new(term_lens, width, rows.concat())
    }

    pub fn term_lens(&self) -> &[usize] {
        &self.term_lens
    }

    pub fn num_terms(&self) -> usize {
        self.term_lens.len()
    }

    pub fn max_term_len(&self) -> usize {
        self.term_lens.iter().copied().max().unwrap_or(0)
    }

    pub fn flat_len(&self) -> usize {
        self.term_lens.iter().sum()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Rows of a single TERM.
    pub fn term(&self, t: usize) -> &[f32] {
        let start: usize = self.term_lens[..t].iter().sum();
        let len = self.term_lens[t];
        &self.values[start * self.width..(start + len) * self.width]
    }

    /// Dense `[n_terms, max_term_len, width]` values and `[n_terms, max_term_len]`
    /// mask (1 for real focus positions).
    pub fn pad_to(&self, n_terms: usize, max_term_len: usize) -> Result<(Vec<f32>, Vec<f32>)> {
        if n_terms < self.num_terms() || max_term_len < self.max_term_len() {
            return Err(TerminatorError::malformed(
                "ragged terms",
                format!(
                    "cannot pad {} TERMs of length <= {} into [{n_terms}, {max_term_len}]",
                    self.num_terms(),
                    self.max_term_len()
                ),
            ));
        }
        let mut out = vec![0f32; n_terms * max_term_len * self.width];
        let mut mask = vec![0f32; n_terms * max_term_len];
        for (t, &len) in self.term_lens.iter().enumerate() {
            let dst = t * max_term_len * self.width;
            out[dst..dst + len * self.width].copy_from_slice(self.term(t));
            mask[t * max_term_len..t * max_term_len + len].fill(1.0);
        }
        Ok((out, mask))
    }
}

/// Extend `term_lens` with filler entries so they sum to `padded_width`.
///
/// Fillers are `fill_len` repeated as often as it fits, followed by one
/// remainder entry (possibly zero).
pub fn extend_term_lens(term_lens: &[usize], padded_width: usize, fill_len: usize) -> Vec<usize> {
    let mut lens = term_lens.to_vec();
    let used: usize = term_lens.iter().sum();
    let diff = padded_width.saturating_sub(used);
    let fill_len = fill_len.max(1);
    lens.extend(std::iter::repeat(fill_len).take(diff / fill_len));
    lens.push(diff % fill_len);
    lens
}

/// Pad a batch of ragged TERM blocks to the batch maxima.
///
/// Returns `[B, T, L_t, width]` values and a `[B, T, L_t]` mask, where `T` is the
/// largest TERM count and `L_t` the longest TERM in the batch.
pub fn pad_terms(batch: &[RaggedTerms], device: &Device) -> Result<(Tensor, Tensor)> {
    let n_batch = batch.len();
    let n_terms = batch.iter().map(|r| r.num_terms()).max().unwrap_or(0);
    let max_len = batch.iter().map(|r| r.max_term_len()).max().unwrap_or(0);
    let width = batch.first().map(|r| r.width()).unwrap_or(0);
    if batch.iter().any(|r| r.width() != width) {
        return Err(TerminatorError::malformed("ragged terms", "widths differ across batch"));
    }
    let mut values = Vec::with_capacity(n_batch * n_terms * max_len * width);
    let mut mask = Vec::with_capacity(n_batch * n_terms * max_len);
    for ragged in batch {
        let (v, m) = ragged.pad_to(n_terms, max_len)?;
        values.extend(v);
        mask.extend(m);
    }
    let values = Tensor::from_vec(values, (n_batch, n_terms, max_len, width), device)?;
    let mask = Tensor::from_vec(mask, (n_batch, n_terms, max_len), device)?;
    Ok((values, mask))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::IndexOp;

    #[test]
    fn test_extend_term_lens_sums_to_width() {
        let cases: [(&[usize], usize, usize); 5] = [
            (&[3], 6, 4),
            (&[2, 4], 6, 4),
            (&[1, 1, 1], 20, 5),
            (&[7], 7, 7),
            (&[2, 3], 17, 3),
        ];
        for (lens, width, fill) in cases {
            let extended = extend_term_lens(lens, width, fill);
            assert_eq!(extended.iter().sum::<usize>(), width, "{lens:?} -> {extended:?}");
            assert_eq!(&extended[..lens.len()], lens);
            assert!(extended.iter().all(|&l| l <= fill.max(*lens.iter().max().unwrap())));
        }
        assert_eq!(extend_term_lens(&[3], 6, 4), vec![3, 3]);
        assert_eq!(extend_term_lens(&[2, 4], 6, 4), vec![2, 4, 0]);
        assert_eq!(extend_term_lens(&[1, 1, 1], 20, 5), vec![1, 1, 1, 5, 5, 5, 2]);
    }

    #[test]
    fn test_pad_to_layout() {
        let ragged = RaggedTerms::new(vec![2, 1], 2, vec![1., 2., 3., 4., 5., 6.]).unwrap();
        assert_eq!(ragged.term(1), &[5., 6.]);
        let (values, mask) = ragged.pad_to(3, 2).unwrap();
        assert_eq!(
            values,
            vec![1., 2., 3., 4., 5., 6., 0., 0., 0., 0., 0., 0.]
        );
        assert_eq!(mask, vec![1., 1., 1., 0., 0., 0.]);
        assert!(ragged.pad_to(1, 2).is_err());
        assert!(ragged.pad_to(2, 1).is_err());
    }

    #[test]
    fn test_rejects_short_values() {
        assert!(RaggedTerms::new(vec![2, 2], 3, vec![0.; 11]).is_err());
        assert!(RaggedTerms::from_rows(vec![2], &[vec![1.0], vec![1.0, 2.0]]).is_err());
    }

    #[test]
    fn test_pad_terms_two_proteins() -> Result<()> {
        let device = Device::Cpu;
        // protein A: one TERM of length 3; protein B: TERMs of length 2 and 4
        let a = RaggedTerms::new(vec![3], 1, vec![1., 2., 3.])?;
        let b = RaggedTerms::new(vec![2, 4], 1, vec![1., 2., 3., 4., 5., 6.])?;
        let (values, mask) = pad_terms(&[a, b], &device)?;
        assert_eq!(values.dims(), &[2, 2, 4, 1]);
        assert_eq!(mask.dims(), &[2, 2, 4]);

        let a_term: Vec<f32> = values.i((0, 0, .., 0))?.to_vec1()?;
        assert_eq!(a_term, vec![1., 2., 3., 0.]);
        let a_mask: Vec<Vec<f32>> = mask.i(0)?.to_vec2()?;
        assert_eq!(a_mask, vec![vec![1., 1., 1., 0.], vec![0., 0., 0., 0.]]);

        let b_terms: Vec<Vec<f32>> = values.i((1, .., .., 0))?.to_vec2()?;
        assert_eq!(b_terms, vec![vec![1., 2., 0., 0.], vec![3., 4., 5., 6.]]);
        let b_mask: Vec<Vec<f32>> = mask.i(1)?.to_vec2()?;
        assert_eq!(b_mask, vec![vec![1., 1., 0., 0.], vec![1., 1., 1., 1.]]);
        Ok(())
    }
}
