//! Static model allow-list check.

use std::collections::HashSet;

use crate::core::config::AppConfig;
use crate::core::error::{AppError, Result};

/// Validates requested model identifiers against a configured allow-list.
#[derive(Debug, Clone, Default)]
pub struct ModelAuthorizationGuard {
    enabled: bool,
    authorized_models: HashSet<String>,
}

impl ModelAuthorizationGuard {
    pub fn new<I, S>(enabled: bool, authorized_models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled,
            authorized_models: authorized_models.into_iter().map(Into::into).collect(),
        }
    }

    /// A guard that lets every model through.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.model_authorization_enabled,
            config.authorized_model_list(),
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fails with [`AppError::ModelNotAuthorized`] when checking is enabled
    /// and `model` is not an exact, case-sensitive member of the allow-list.
    pub fn check_authorized(&self, model: &str) -> Result<()> {
        if !self.enabled || self.authorized_models.contains(model) {
            return Ok(());
        }
        Err(AppError::ModelNotAuthorized(model.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlisted_model_rejected_when_enabled() {
        let guard = ModelAuthorizationGuard::new(true, ["gpt-3.5-turbo"]);
        let err = guard.check_authorized("gpt-4").unwrap_err();
        assert!(matches!(err, AppError::ModelNotAuthorized(m) if m == "gpt-4"));
    }

    #[test]
    fn test_listed_model_allowed() {
        let guard = ModelAuthorizationGuard::new(true, ["gpt-3.5-turbo"]);
        assert!(guard.check_authorized("gpt-3.5-turbo").is_ok());
    }

    #[test]
    fn test_disabled_allows_everything() {
        let guard = ModelAuthorizationGuard::new(false, ["gpt-3.5-turbo"]);
        assert!(guard.check_authorized("gpt-4").is_ok());
        assert!(ModelAuthorizationGuard::disabled()
            .check_authorized("anything")
            .is_ok());
    }

    #[test]
    fn test_match_is_case_sensitive() {
        let guard = ModelAuthorizationGuard::new(true, ["gpt-4"]);
        assert!(guard.check_authorized("GPT-4").is_err());
        assert!(guard.check_authorized("gpt-4 ").is_err());
    }

    #[test]
    fn test_enabled_with_empty_list_rejects_all() {
        let guard = ModelAuthorizationGuard::new(true, Vec::<String>::new());
        assert!(guard.check_authorized("gpt-4").is_err());
    }

    #[test]
    fn test_from_config() {
        let config = AppConfig {
            model_authorization_enabled: true,
            authorized_models: vec!["gpt-3.5-turbo".to_string(), String::new()],
            ..AppConfig::default()
        };
        let guard = ModelAuthorizationGuard::from_config(&config);
        assert!(guard.is_enabled());
        assert!(guard.check_authorized("gpt-3.5-turbo").is_ok());
        assert!(guard.check_authorized("").is_err());
    }
}
