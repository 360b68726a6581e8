// src/utils/hash.rs

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

use crate::error::AppError;

/// KDF cost profile. Student logins arrive in a thundering herd at exam
/// start, so their hashes use deliberately cheap parameters; admin accounts
/// are few and get the stronger profile.
#[derive(Debug, Clone, Copy)]
pub enum HashCost {
    Student,
    Admin,
}

fn hasher(cost: HashCost) -> Result<Argon2<'static>, AppError> {
    let params = match cost {
        HashCost::Student => Params::new(4096, 1, 1, None),
        HashCost::Admin => Params::new(19456, 2, 1, None),
    }
    .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

pub fn hash_password(password: &str, cost: HashCost) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = hasher(cost)?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(e.to_string()))?
        .to_string();

    Ok(password_hash)
}

/// Verifies against the parameters embedded in the stored hash, so the cost
/// profile of the account type is honored automatically.
pub fn verify_password(password: &str, password_hash: &str) -> Result<bool, AppError> {
    let parsed_hash = PasswordHash::new(password_hash)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let result = Argon2::default().verify_password(password.as_bytes(), &parsed_hash);

    match result {
        Ok(_) => Ok(true),
        Err(_) => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let hash = hash_password("password123", HashCost::Student).unwrap();
        assert!(verify_password("password123", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn profiles_produce_distinct_parameters() {
        let student = hash_password("pw", HashCost::Student).unwrap();
        let admin = hash_password("pw", HashCost::Admin).unwrap();
        assert!(student.contains("m=4096"));
        assert!(admin.contains("m=19456"));
        // Both still verify regardless of profile.
        assert!(verify_password("pw", &student).unwrap());
        assert!(verify_password("pw", &admin).unwrap());
    }
}
