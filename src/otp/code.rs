//! Login code generation and hashing.

use anyhow::{Context, Result};
use rand::{Rng, rngs::OsRng};

/// Number of digits in a login code.
pub const CODE_LENGTH: usize = 6;

/// Fixed bcrypt cost for code digests.
const HASH_COST: u32 = 10;

/// Generate a login code: six digits, left-zero-padded, uniform over
/// `000000..=999999`.
///
/// Codes come from the OS CSPRNG; the code is the sole proof of inbox
/// control, so a non-cryptographic generator is not acceptable here.
#[must_use]
pub fn generate_code() -> String {
    let value: u32 = OsRng.gen_range(0..1_000_000);
    format!("{value:06}")
}

/// Hash a plaintext code before it is persisted.
///
/// The raw code is only ever sent to the user; storage sees the digest.
///
/// # Errors
/// Returns an error if the bcrypt backend fails.
pub fn hash_code(code: &str) -> Result<String> {
    bcrypt::hash(code, HASH_COST).context("failed to hash login code")
}

/// Verify a candidate code against a stored digest.
///
/// Malformed digests and backend failures verify as `false`; the caller
/// never learns why a comparison failed.
#[must_use]
pub fn verify_code(code: &str, digest: &str) -> bool {
    bcrypt::verify(code, digest).unwrap_or(false)
}
