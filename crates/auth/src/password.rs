//! Password hashing (bcrypt) off the async runtime.

use std::sync::OnceLock;

use crate::AuthError;
use crate::subject::PASSWORD_MAX_BYTES;

static DUMMY_HASH: OnceLock<String> = OnceLock::new();

/// Hash a password on the blocking pool.
///
/// Passwords longer than [`PASSWORD_MAX_BYTES`] are refused rather than
/// silently truncated.
pub async fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    if password.len() > PASSWORD_MAX_BYTES {
        return Err(AuthError::validation(format!(
            "password must be at most {PASSWORD_MAX_BYTES} bytes"
        )));
    }
    let password = password.to_string();
    tokio::task::spawn_blocking(move || {
        bcrypt::hash(password, cost).map_err(|e| AuthError::Hashing(e.to_string()))
    })
    .await
    .map_err(|e| AuthError::Hashing(format!("task join error: {e}")))?
}

/// Check a password against a stored hash. `Ok(false)` on mismatch.
///
/// An over-long password never matches, even when its first
/// [`PASSWORD_MAX_BYTES`] bytes do; the hash is still checked so the call
/// costs the same.
pub async fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let too_long = password.len() > PASSWORD_MAX_BYTES;
    let password = password.to_string();
    let hash = hash.to_string();
    let matched = tokio::task::spawn_blocking(move || {
        bcrypt::verify(password, &hash).map_err(|e| AuthError::Hashing(e.to_string()))
    })
    .await
    .map_err(|e| AuthError::Hashing(format!("task join error: {e}")))??;
    Ok(matched && !too_long)
}

/// Spend roughly the time of a real verification when the account does not
/// exist, so response timing does not reveal which half of the credential was
/// wrong.
pub async fn verify_against_dummy(password: &str, cost: u32) {
    let dummy = match DUMMY_HASH.get() {
        Some(h) => h.clone(),
        None => match hash_password("gatehouse-dummy-password", cost).await {
            Ok(h) => DUMMY_HASH.get_or_init(|| h).clone(),
            Err(_) => return,
        },
    };
    let _ = verify_password(password, &dummy).await;
}
