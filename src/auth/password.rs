//! Argon2id password hashing.

use argon2::{
    password_hash::SaltString, Algorithm, Argon2, Params, PasswordHash, PasswordHasher,
    PasswordVerifier, Version,
};
use rand::rngs::OsRng;

use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub struct Credentials {
    params: Params,
}

impl Credentials {
    #[must_use]
    pub fn new() -> Self {
        Self {
            params: Params::default(),
        }
    }

    /// Use custom cost parameters (cheap ones keep tests fast).
    #[must_use]
    pub fn with_params(params: Params) -> Self {
        Self { params }
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash `password` into a PHC string.
    ///
    /// # Errors
    /// Returns `InvalidInput` when the password is empty or cannot be hashed.
    pub fn hash(&self, password: &str) -> Result<String> {
        if password.is_empty() {
            return Err(Error::InvalidInput("password must not be empty".to_string()));
        }
        let salt = SaltString::generate(&mut OsRng);
        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|_| Error::InvalidInput("password could not be hashed".to_string()))
    }

    /// `false` for a wrong password and for an unparsable stored hash.
    #[must_use]
    pub fn verify(&self, password: &str, stored_hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(stored_hash) else {
            return false;
        };
        self.argon2()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new()
    }
}
