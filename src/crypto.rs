//! Password hashing and one-time code helpers.

use rand::Rng;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use subtle::ConstantTimeEq;

use crate::error::{AccessError, AccessResult};

/// Default bcrypt cost for passwords and reset codes.
pub const BCRYPT_COST: u32 = 12;

/// Hash a secret (salted, one-way) at the given bcrypt cost.
pub fn hash_password(secret: &str, cost: u32) -> AccessResult<String> {
    bcrypt::hash(secret, cost).map_err(|e| {
        tracing::error!("bcrypt hash failed: {:?}", e);
        AccessError::StorageUnavailable(e.to_string())
    })
}

/// Verify a password against a stored digest. A malformed digest counts as a mismatch.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match bcrypt::verify(password, hash) {
        Ok(matches) => matches,
        Err(e) => {
            tracing::warn!("bcrypt verify failed: {:?}", e);
            false
        }
    }
}

const DUMMY_SECRET: &str = "pdf-library-unknown-account";

/// Digest of a throwaway secret at `cost`, computed once per cost and cached.
fn dummy_digest(cost: u32) -> String {
    static DIGESTS: OnceLock<Mutex<HashMap<u32, String>>> = OnceLock::new();
    let mut digests = DIGESTS
        .get_or_init(Mutex::default)
        .lock()
        .unwrap_or_else(|p| p.into_inner());
    digests
        .entry(cost)
        .or_insert_with(|| bcrypt::hash(DUMMY_SECRET, cost).unwrap_or_default())
        .clone()
}

/// Runs a full bcrypt verification for an identifier that has no account.
pub fn verify_dummy(password: &str, cost: u32) {
    let _ = verify_password(password, &dummy_digest(cost));
}

/// Constant-time comparison for the configured admin secret.
pub fn secrets_match(supplied: &str, expected: &str) -> bool {
    supplied.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Random 6-digit password reset code.
pub fn generate_reset_code() -> String {
    let code: u32 = rand::thread_rng().gen_range(100000..1000000);
    code.to_string()
}
