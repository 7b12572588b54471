//! terminator-test-data
//!
//! Small feature records embedded in the crate for use in tests.
//!
//! Single records are exposed as [`TestFile`]s, which write the raw bytes to a
//! temporary file. [`TestDataset`] lays several records out the way a feature
//! directory is organised on disk: `{dir}/{pdb}/{pdb}.features` plus the
//! `{pdb}.length` sidecar.
use std::fs;
use std::io;
use std::path::Path;
use tempfile::{Builder, NamedTempFile, TempDir};

#[derive(Debug)]
/// Test File
///
/// Example usage:
///
/// ```ignore
/// // returns (filepath, _tempfile_handle).
/// // _handle ensures the tempfile remains in scope
/// use terminator_test_data::TestFile;
/// let (features, _temp) = TestFile::features_01().create_temp().unwrap();
/// ```
pub struct TestFile {
    pdb: &'static str,
    filebinary: &'static [u8],
    length: &'static [u8],
    suffix: &'static str,
}

impl TestFile {
    /// 32 residues over two chains, three TERMs, four alignments.
    /// The O atom of the last residue is missing.
    pub fn features_01() -> Self {
        Self {
            pdb: "1TRM",
            filebinary: include_bytes!("../data/features/1TRM/1TRM.features"),
            length: include_bytes!("../data/features/1TRM/1TRM.length"),
            suffix: "features",
        }
    }

    /// 36 residues, four TERMs, three alignments.
    pub fn features_02() -> Self {
        Self {
            pdb: "2TRM",
            filebinary: include_bytes!("../data/features/2TRM/2TRM.features"),
            length: include_bytes!("../data/features/2TRM/2TRM.length"),
            suffix: "features",
        }
    }

    /// 12 residues; below the default minimum protein length.
    pub fn features_03() -> Self {
        Self {
            pdb: "3TRM",
            filebinary: include_bytes!("../data/features/3TRM/3TRM.features"),
            length: include_bytes!("../data/features/3TRM/3TRM.length"),
            suffix: "features",
        }
    }

    pub fn pdb(&self) -> &'static str {
        self.pdb
    }

    pub fn create_temp(&self) -> io::Result<(String, NamedTempFile)> {
        let temp = Builder::new()
            .suffix(&format!(".{}", self.suffix))
            .tempfile()?;

        fs::write(&temp, self.filebinary)?;
        let path = temp.path().to_string_lossy().into_owned();
        Ok((path, temp))
    }

    /// Write the record and its sidecar under `dir/{pdb}/`.
    pub fn write_into(&self, dir: &Path) -> io::Result<()> {
        let sub = dir.join(self.pdb);
        fs::create_dir_all(&sub)?;
        fs::write(sub.join(format!("{}.{}", self.pdb, self.suffix)), self.filebinary)?;
        fs::write(sub.join(format!("{}.length", self.pdb)), self.length)?;
        Ok(())
    }
}

/// A feature directory holding every embedded record.
pub struct TestDataset;

impl TestDataset {
    pub fn all() -> Vec<TestFile> {
        vec![
            TestFile::features_01(),
            TestFile::features_02(),
            TestFile::features_03(),
        ]
    }

    /// Returns the directory handle; the files are removed when it drops.
    pub fn create_temp() -> io::Result<TempDir> {
        let dir = tempfile::tempdir()?;
        for file in Self::all() {
            file.write_into(dir.path())?;
        }
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_temp_file() {
        let (path, _temp) = TestFile::features_01().create_temp().unwrap();
        assert!(path.ends_with(".features"));
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("{\"pdb\":\"1TRM\""));
    }

    #[test]
    fn test_dataset_layout() {
        let dir = TestDataset::create_temp().unwrap();
        for file in TestDataset::all() {
            let sub = dir.path().join(file.pdb());
            assert!(sub.join(format!("{}.features", file.pdb())).is_file());
            assert!(sub.join(format!("{}.length", file.pdb())).is_file());
        }
    }
}
