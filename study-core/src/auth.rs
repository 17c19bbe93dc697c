use subtle::ConstantTimeEq;

use crate::config::AuthConfig;
use crate::error::StudyError;

/// Single shared-secret gate. No accounts, no lockout.
#[derive(Clone, Default)]
pub struct PasswordGate {
    secret: Option<String>,
}

impl std::fmt::Debug for PasswordGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordGate")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl PasswordGate {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Some(secret.into()),
        }
    }

    /// A gate that lets everyone through.
    pub fn disabled() -> Self {
        Self { secret: None }
    }

    /// Read the secret from the configured environment variable.
    pub fn from_config(config: &AuthConfig) -> Result<Self, StudyError> {
        if !config.enabled {
            return Ok(Self::disabled());
        }
        match std::env::var(&config.password_env) {
            Ok(secret) if !secret.is_empty() => Ok(Self::new(secret)),
            _ => Err(StudyError::MissingSecret(config.password_env.clone())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    /// Constant-time comparison against the secret. Always true when disabled.
    pub fn verify(&self, input: &str) -> bool {
        match &self.secret {
            Some(secret) => input.as_bytes().ct_eq(secret.as_bytes()).into(),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_accepts_only_exact_secret() {
        let gate = PasswordGate::new("photosynthesis");
        assert!(gate.verify("photosynthesis"));
        assert!(!gate.verify("Photosynthesis"));
        assert!(!gate.verify("photosynthesi"));
        assert!(!gate.verify(""));
    }

    #[test]
    fn test_disabled_gate_accepts_anything() {
        let gate = PasswordGate::disabled();
        assert!(!gate.is_enabled());
        assert!(gate.verify("whatever"));
    }

    #[test]
    fn test_from_config_disabled_needs_no_secret() {
        let config = AuthConfig {
            enabled: false,
            password_env: "STUDY_TEST_PASSWORD_NOT_SET".to_string(),
        };
        assert!(!PasswordGate::from_config(&config).unwrap().is_enabled());
    }

    #[test]
    fn test_from_config_enabled_without_secret_is_error() {
        let config = AuthConfig {
            enabled: true,
            password_env: "STUDY_TEST_PASSWORD_NOT_SET".to_string(),
        };
        assert!(matches!(
            PasswordGate::from_config(&config),
            Err(StudyError::MissingSecret(_))
        ));
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let gate = PasswordGate::new("hunter2");
        assert!(!format!("{gate:?}").contains("hunter2"));
    }
}
