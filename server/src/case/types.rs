//! Case identifiers and error definitions

use serde::Serialize;
use thiserror::Error;

/// Prefix shared by every generated case id
pub const CASE_PREFIX: &str = "casename";

/// Digits in the zero-padded case sequence number
pub const CASE_NUMBER_WIDTH: usize = 5;

/// File name of the uploaded CT volume inside a case directory
pub const INPUT_FILE_NAME: &str = "ct.nii.gz";

/// Errors that can occur when working with the case store
#[derive(Debug, Error)]
pub enum CaseError {
    #[error("Case not found: {0}")]
    NotFound(String),

    #[error("Invalid case id: {0:?}")]
    InvalidCaseId(String),

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// One entry of the upload listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseListing {
    pub case_name: String,
    pub files: Vec<String>,
}

/// Reject ids that could escape the storage roots.
///
/// Accepted ids are non-empty ASCII alphanumerics, `_` and `-`.
pub fn validate_case_id(id: &str) -> Result<(), CaseError> {
    let valid = !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(CaseError::InvalidCaseId(id.to_string()))
    }
}

/// Sequence number of a generated case id, if `name` is one
pub fn case_number(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(CASE_PREFIX)?;
    if digits.len() != CASE_NUMBER_WIDTH || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Format the case id for a sequence number
pub fn case_id(number: u32) -> String {
    format!("{}{:0width$}", CASE_PREFIX, number, width = CASE_NUMBER_WIDTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_case_id() {
        assert!(validate_case_id("casename00001").is_ok());
        assert!(validate_case_id("my-case_2").is_ok());
        assert!(validate_case_id("").is_err());
        assert!(validate_case_id("../etc").is_err());
        assert!(validate_case_id("a/b").is_err());
        assert!(validate_case_id("case name").is_err());
    }

    #[test]
    fn test_case_number_parsing() {
        assert_eq!(case_number("casename00042"), Some(42));
        assert_eq!(case_number("casename0042"), None);
        assert_eq!(case_number("casename000x1"), None);
        assert_eq!(case_number("other00001"), None);
        assert_eq!(case_id(7), "casename00007");
    }
}
