//! Case storage: generated ids, uploads, listing and deletion

pub mod routes;
mod store;
mod types;

pub use routes::case_routes;
pub use store::CaseStore;
pub use types::{CASE_PREFIX, CaseError, CaseListing, INPUT_FILE_NAME, validate_case_id};
