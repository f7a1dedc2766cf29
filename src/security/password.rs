use crate::config::SecurityConfig;
use crate::error::Error;
use anyhow::Result;
use bcrypt::{hash, verify};

/// Hash a password with the configured bcrypt cost
pub fn hash_password(password: &str, config: &SecurityConfig) -> Result<String> {
    if password.is_empty() {
        return Err(Error::InvalidInput("password must not be empty".to_string()).into());
    }

    let hashed = hash(password, config.password_hash_cost)
        .map_err(|e| Error::Authentication(format!("Failed to hash password: {}", e)))?;

    Ok(hashed)
}

/// Verify a password against a stored hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let result = verify(password, hash)
        .map_err(|e| Error::Authentication(format!("Failed to verify password: {}", e)))?;

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SecurityConfig {
        SecurityConfig { password_hash_cost: 4, ..SecurityConfig::default() }
    }

    #[test]
    fn hashes_verify_only_the_original_password() {
        let hashed = hash_password("lookout", &config()).unwrap();
        assert_ne!(hashed, "lookout");
        assert!(verify_password("lookout", &hashed).unwrap());
        assert!(!verify_password("lookdown", &hashed).unwrap());
    }

    #[test]
    fn empty_password_is_rejected() {
        assert!(hash_password("", &config()).is_err());
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(verify_password("lookout", "not-a-bcrypt-hash").is_err());
    }
}
