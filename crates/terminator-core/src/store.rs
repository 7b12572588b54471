//! On-disk feature records.
//!
//! Layout: `{dir}/{pdb}/{pdb}.features` holds a JSON [`ProteinRecord`] and
//! `{dir}/{pdb}/{pdb}.length` holds two lines, the total TERM residue count and
//! the sequence length. Opening a store reads only the sidecars; records are
//! parsed on demand.
use crate::error::{Result, TerminatorError};
use crate::record::{DatasetVariant, ProteinRecord};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLengths {
    pub focus_len: usize,
    pub seq_len: usize,
}

impl RecordLengths {
    fn parse(pdb: &str, text: &str) -> Result<Self> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        let mut next = |what: &str| -> Result<usize> {
            let line = lines.next().ok_or_else(|| {
                TerminatorError::malformed(pdb, format!("length file lacks {what}"))
            })?;
            line.parse::<usize>()
                .map_err(|e| TerminatorError::malformed(pdb, format!("bad {what}: {e}")))
        };
        Ok(Self {
            focus_len: next("TERM residue count")?,
            seq_len: next("sequence length")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FeatureStore {
    dir: PathBuf,
    ids: Vec<String>,
    lengths: Vec<RecordLengths>,
}

impl FeatureStore {
    /// Index a feature directory.
    ///
    /// With `ids` only those proteins are indexed, in the given order; otherwise
    /// every `*/*.features` entry is picked up, sorted by id. Proteins with fewer
    /// than `min_protein_len` residues are skipped.
    pub fn open(
        dir: impl AsRef<Path>,
        ids: Option<&[String]>,
        min_protein_len: usize,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let candidates = match ids {
            Some(ids) => ids.to_vec(),
            None => Self::discover(&dir)?,
        };
        let mut kept = Vec::with_capacity(candidates.len());
        let mut lengths = Vec::with_capacity(candidates.len());
        let mut skipped = 0usize;
        for pdb in candidates {
            let text = fs::read_to_string(ProteinRecord::length_path(&dir, &pdb))?;
            let lens = RecordLengths::parse(&pdb, &text)?;
            if lens.seq_len < min_protein_len {
                skipped += 1;
                continue;
            }
            kept.push(pdb);
            lengths.push(lens);
        }
        tracing::info!(
            dir = %dir.display(),
            indexed = kept.len(),
            skipped,
            min_protein_len,
            "opened feature store"
        );
        Ok(Self {
            dir,
            ids: kept,
            lengths,
        })
    }

    fn discover(dir: &Path) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let pdb = entry.file_name().to_string_lossy().into_owned();
            if ProteinRecord::features_path(dir, &pdb).is_file() {
                ids.push(pdb);
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Focus lengths in index order, as used for clustering.
    pub fn focus_lengths(&self) -> Vec<usize> {
        self.lengths.iter().map(|l| l.focus_len).collect()
    }

    pub fn lengths(&self) -> &[RecordLengths] {
        &self.lengths
    }

    /// Parse and validate the `i`th record.
    pub fn load(&self, i: usize) -> Result<ProteinRecord> {
        let pdb = self.ids.get(i).ok_or_else(|| {
            let reason = format!("store holds {} records", self.len());
            TerminatorError::malformed(format!("#{i}"), reason)
        })?;
        let record = ProteinRecord::from_file(ProteinRecord::features_path(&self.dir, pdb))?;
        if &record.pdb != pdb {
            return Err(TerminatorError::malformed(
                pdb,
                format!("file contains record {}", record.pdb),
            ));
        }
        record.validate()?;
        let lens = self.lengths[i];
        if lens.focus_len != record.focus_len() || lens.seq_len != record.seq_len() {
            return Err(TerminatorError::malformed(pdb, "length file disagrees with record"));
        }
        Ok(record)
    }

    /// Load every record and resolve which dataset variant they form.
    pub fn load_all(&self) -> Result<(Vec<ProteinRecord>, DatasetVariant)> {
        let records = (0..self.len()).map(|i| self.load(i)).collect::<Result<Vec<_>>>()?;
        let variant = match records.first() {
            Some(first) => first.variant()?,
            None => DatasetVariant::WithoutAuxStats,
        };
        if let Some(odd) = records.iter().find(|r| r.variant().ok() != Some(variant)) {
            return Err(TerminatorError::malformed(
                &odd.pdb,
                "dataset mixes records with and without auxiliary statistics",
            ));
        }
        tracing::info!(records = records.len(), ?variant, "loaded feature records");
        Ok((records, variant))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::synthetic_record;

    #[test]
    fn test_open_filters_short_proteins() -> Result<()> {
        let dir = tempfile::tempdir()?;
        synthetic_record("LONG", 40, &[5, 5]).write(dir.path())?;
        synthetic_record("SHRT", 12, &[4]).write(dir.path())?;
        // stray files are ignored
        fs::write(dir.path().join("notes.txt"), "x")?;

        let store = FeatureStore::open(dir.path(), None, 30)?;
        assert_eq!(store.ids(), &["LONG".to_string()]);
        assert_eq!(store.focus_lengths(), vec![10]);

        let store = FeatureStore::open(dir.path(), None, 0)?;
        assert_eq!(store.len(), 2);
        assert_eq!(store.ids()[1], "SHRT");
        Ok(())
    }

    #[test]
    fn test_load_roundtrip_and_ids() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let record = synthetic_record("1ABC", 10, &[3, 4]);
        record.write(dir.path())?;
        // rewriting is idempotent
        record.write(dir.path())?;
        let ids = vec!["1ABC".to_string()];
        let store = FeatureStore::open(dir.path(), Some(&ids), 0)?;
        let loaded = store.load(0)?;
        assert_eq!(loaded.term_lens, record.term_lens);
        assert_eq!(loaded.msas, record.msas);
        assert!(store.load(1).is_err());
        Ok(())
    }

    #[test]
    fn test_mixed_variants_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        synthetic_record("AAAA", 10, &[3]).write(dir.path())?;
        let mut with_aux = synthetic_record("BBBB", 10, &[3]);
        with_aux.ppoe = Some(vec![vec![0.0]; 3]);
        with_aux.sing_stats = Some(vec![vec![0.0]; 3]);
        with_aux.pair_stats = Some(vec![vec![0.0; 9]]);
        with_aux.write(dir.path())?;

        let store = FeatureStore::open(dir.path(), None, 0)?;
        assert!(store.load_all().is_err());
        Ok(())
    }

    #[test]
    fn test_bad_length_file() {
        assert!(RecordLengths::parse("X", "12\n").is_err());
        assert!(RecordLengths::parse("X", "a\n3\n").is_err());
        assert_eq!(
            RecordLengths::parse("X", "12\n30\n").unwrap(),
            RecordLengths {
                focus_len: 12,
                seq_len: 30
            }
        );
    }
}
