//! On-disk case store

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::types::{
    CaseError, CaseListing, INPUT_FILE_NAME, case_id, case_number, validate_case_id,
};

/// Attempts at claiming a fresh case directory before giving up
const MAX_CREATE_ATTEMPTS: usize = 16;

/// Case directories under the upload and output roots
#[derive(Debug, Clone)]
pub struct CaseStore {
    upload_dir: PathBuf,
    output_dir: PathBuf,
}

impl CaseStore {
    pub fn new(upload_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn output_root(&self) -> &Path {
        &self.output_dir
    }

    /// `<upload_dir>/<case>`
    pub fn input_dir(&self, case: &str) -> PathBuf {
        self.upload_dir.join(case)
    }

    /// `<output_dir>/<case>`
    pub fn output_dir(&self, case: &str) -> PathBuf {
        self.output_dir.join(case)
    }

    /// `<upload_dir>/<case>/ct.nii.gz`
    pub fn input_volume_path(&self, case: &str) -> PathBuf {
        self.input_dir(case).join(INPUT_FILE_NAME)
    }

    /// `<output_dir>/<case>/segmentations`
    pub fn segmentations_dir(&self, case: &str) -> PathBuf {
        self.output_dir(case).join("segmentations")
    }

    pub fn exists(&self, case: &str) -> bool {
        validate_case_id(case).is_ok() && self.input_dir(case).is_dir()
    }

    /// Next free generated id: one past the highest existing sequence number
    pub fn next_case_id(&self) -> Result<String, CaseError> {
        let entries = match fs::read_dir(&self.upload_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(case_id(1)),
            Err(e) => return Err(e.into()),
        };

        let highest = entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_str().and_then(case_number))
            .max()
            .unwrap_or(0);
        Ok(case_id(highest + 1))
    }

    /// Store an uploaded volume under a freshly generated case id
    pub fn create_case(&self, volume: &[u8]) -> Result<String, CaseError> {
        fs::create_dir_all(&self.upload_dir)?;

        // Claiming the directory with create_dir is what makes the id ours
        for _ in 0..MAX_CREATE_ATTEMPTS {
            let case = self.next_case_id()?;
            let dir = self.input_dir(&case);
            match fs::create_dir(&dir) {
                Ok(()) => {
                    fs::write(dir.join(INPUT_FILE_NAME), volume)?;
                    info!("Created case {} ({} bytes)", case, volume.len());
                    return Ok(case);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!("Case directory {:?} claimed concurrently, retrying", dir);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CaseError::IoError(io::Error::other(
            "could not allocate a case id",
        )))
    }

    /// All case directories with the plain files they contain, sorted by name
    pub fn list(&self) -> Result<Vec<CaseListing>, CaseError> {
        let entries = match fs::read_dir(&self.upload_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut cases = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(case_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };

            let mut files: Vec<String> = fs::read_dir(&path)?
                .flatten()
                .filter(|f| f.path().is_file())
                .filter_map(|f| f.file_name().to_str().map(str::to_string))
                .collect();
            files.sort();

            cases.push(CaseListing { case_name, files });
        }
        cases.sort_by(|a, b| a.case_name.cmp(&b.case_name));
        Ok(cases)
    }

    /// Remove a case's upload directory
    pub fn delete(&self, case: &str) -> Result<(), CaseError> {
        validate_case_id(case)?;
        let dir = self.input_dir(case);
        if !dir.is_dir() {
            return Err(CaseError::NotFound(case.to_string()));
        }
        fs::remove_dir_all(&dir)?;
        info!("Deleted case {}", case);
        Ok(())
    }
}
