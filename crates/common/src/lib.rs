//! Common types, protocol definitions, and errors shared across the credential
//! engine crates.

pub mod error;
pub mod protocol;
pub mod types;

pub use error::ServiceError;
pub use types::{Actor, CredentialType, CredentialValue, PermissionOperation};
