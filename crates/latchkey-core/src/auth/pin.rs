//! PIN hashing and verification
//!
//! PINs are hashed using Argon2id; the PHC string (salt and parameters
//! included) is what the store persists as the secret.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use zeroize::Zeroizing;

use super::AuthError;
use crate::types::Secret;

/// Minimum PIN length
pub const MIN_PIN_LENGTH: usize = 4;
/// Maximum PIN length
pub const MAX_PIN_LENGTH: usize = 12;

/// Validate PIN format
pub fn validate_pin(pin: &str) -> Result<(), AuthError> {
    if pin.len() < MIN_PIN_LENGTH || pin.len() > MAX_PIN_LENGTH {
        return Err(AuthError::InvalidPinLength(MIN_PIN_LENGTH, MAX_PIN_LENGTH));
    }

    if !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(AuthError::InvalidPinFormat);
    }

    Ok(())
}

/// Validate a new PIN entered twice during setup
pub fn validate_new_pin(pin: &str, confirm: &str) -> Result<(), AuthError> {
    validate_pin(pin)?;
    if pin != confirm {
        return Err(AuthError::PinMismatch);
    }
    Ok(())
}

/// Produces secrets from PINs
#[derive(Clone)]
pub struct PinHasher {
    argon2: Argon2<'static>,
}

impl Default for PinHasher {
    fn default() -> Self {
        Self {
            argon2: Argon2::default(),
        }
    }
}

impl PinHasher {
    /// Argon2id with explicit memory (KiB) and iteration costs
    pub fn with_cost(memory_kib: u32, iterations: u32) -> Result<Self, AuthError> {
        let params = Params::new(memory_kib, iterations, 1, None)
            .map_err(|e| AuthError::CryptoError(format!("Invalid Argon2 parameters: {}", e)))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Validate and hash a PIN into a storable secret
    pub fn hash(&self, pin: &str) -> Result<Secret, AuthError> {
        validate_pin(pin)?;

        let salt = SaltString::generate(&mut OsRng);
        let pin_bytes = Zeroizing::new(pin.as_bytes().to_vec());

        let hash = self
            .argon2
            .hash_password(&pin_bytes, &salt)
            .map_err(|e| AuthError::CryptoError(format!("Failed to hash PIN: {}", e)))?
            .to_string();

        Ok(Secret::from_hash(hash))
    }

    /// Check an entered PIN against the stored secret.
    ///
    /// An unset or unparsable secret matches nothing. The parameters come
    /// from the PHC string, so secrets hashed at any cost verify here.
    pub fn verify(secret: &Secret, pin: &str) -> bool {
        if !secret.is_set {
            return false;
        }
        let Ok(parsed) = PasswordHash::new(&secret.pin) else {
            return false;
        };
        let pin_bytes = Zeroizing::new(pin.as_bytes().to_vec());
        Argon2::default().verify_password(&pin_bytes, &parsed).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_hasher() -> PinHasher {
        PinHasher::with_cost(64, 1).unwrap()
    }

    #[test]
    fn test_pin_hash_and_verify() {
        let secret = fast_hasher().hash("1234").unwrap();
        assert!(secret.is_set);
        assert!(secret.pin.starts_with("$argon2id$"));
        assert!(PinHasher::verify(&secret, "1234"));
        assert!(!PinHasher::verify(&secret, "4321"));
    }

    #[test]
    fn test_same_pin_different_salt() {
        let hasher = fast_hasher();
        let a = hasher.hash("1234").unwrap();
        let b = hasher.hash("1234").unwrap();
        assert_ne!(a.pin, b.pin);
    }

    #[test]
    fn test_pin_validation() {
        // Too short
        assert!(validate_pin("123").is_err());

        // Too long
        assert!(validate_pin("1234567890123").is_err());

        // Non-digits
        assert!(matches!(validate_pin("12a4"), Err(AuthError::InvalidPinFormat)));

        // Valid
        assert!(validate_pin("1234").is_ok());
        assert!(validate_pin("123456789012").is_ok());
    }

    #[test]
    fn test_confirmation_mismatch() {
        assert!(matches!(
            validate_new_pin("1234", "1235"),
            Err(AuthError::PinMismatch)
        ));
        assert!(validate_new_pin("1234", "1234").is_ok());
    }

    #[test]
    fn test_unset_secret_matches_nothing() {
        assert!(!PinHasher::verify(&Secret::unset(), ""));
        let garbage = Secret::from_hash("not-a-phc-string".to_string());
        assert!(!PinHasher::verify(&garbage, "1234"));
    }
}
