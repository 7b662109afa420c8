// MIT License - Copyright (c) 2026 Peter Wright
// Credentials: password hashing, opaque tokens and token subjects

use std::fmt;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use uuid::Uuid;

use crate::error::{Result, SecCtlError};

/// What kind of principal a token was issued to.
///
/// Users and sites share one id space in the token table, so the kind is
/// checked on every validation: a site token must never authenticate a
/// user, even if the ids happened to collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubjectKind {
    User,
    Site,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::User => "user",
            SubjectKind::Site => "site",
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The principal a token is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subject {
    pub id: Uuid,
    pub kind: SubjectKind,
}

impl Subject {
    pub fn user(id: Uuid) -> Self {
        Self {
            id,
            kind: SubjectKind::User,
        }
    }

    pub fn site(id: Uuid) -> Self {
        Self {
            id,
            kind: SubjectKind::Site,
        }
    }
}

/// Generate a fresh opaque token string.
pub fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Hash a password with Argon2id and a random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| SecCtlError::Credential {
            details: format!("failed to hash password: {e}"),
        })?;
    Ok(hash.to_string())
}

/// Verify a password against a stored Argon2id hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| SecCtlError::Credential {
        details: format!("invalid password hash: {e}"),
    })?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
