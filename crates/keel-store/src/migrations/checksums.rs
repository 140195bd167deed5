//! Table checksums
//!
//! The checksum of a table is the SHA-256 of its rendered DDL, so any change
//! to a column, key or index of an applied table is detected as drift.

use sha2::{Digest, Sha256};

/// Compute SHA256 checksum of a string
pub fn compute_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Checksum over an ordered list of statements
pub fn statements_checksum(statements: &[String]) -> String {
    compute_checksum(&statements.join(";\n"))
}
