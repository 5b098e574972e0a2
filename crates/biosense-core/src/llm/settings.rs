use anyhow::Result;
use serde::Deserialize;
use std::collections::HashMap;

use super::ProviderKind;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Environment-driven configuration for the inference service.
///
/// A missing API key is not an error: it selects the offline classification rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmSettings {
    pub provider: ProviderKind,
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: u64,
}

/// Values read from a configuration file; environment variables take precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LlmOverrides {
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Gemini,
            api_key: None,
            endpoint: None,
            model: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl LlmSettings {
    const PROVIDER_ENV: &'static str = "BIOSENSE_PROVIDER";
    const API_KEY_ENV: &'static str = "BIOSENSE_API_KEY";
    const ENDPOINT_ENV: &'static str = "BIOSENSE_ENDPOINT";
    const MODEL_ENV: &'static str = "BIOSENSE_MODEL";
    const TIMEOUT_ENV: &'static str = "BIOSENSE_TIMEOUT_SECS";

    /// Load settings from environment variables.
    ///
    /// * `BIOSENSE_PROVIDER`    : `gemini` (default), `openai` or `offline`.
    /// * `BIOSENSE_API_KEY`     : API key; leave unset to run offline.
    /// * `BIOSENSE_ENDPOINT`    : Optional custom base URL.
    /// * `BIOSENSE_MODEL`       : Optional model name.
    /// * `BIOSENSE_TIMEOUT_SECS`: Per-request timeout (default 30).
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(&LlmOverrides::default())
    }

    /// Like [`LlmSettings::from_env`], filling unset variables from `overrides`.
    pub fn from_env_with(overrides: &LlmOverrides) -> Result<Self> {
        Self::from_map(std::env::vars().collect(), overrides)
    }

    fn from_map(vars: HashMap<String, String>, overrides: &LlmOverrides) -> Result<Self> {
        let pick = |key: &str, fallback: &Option<String>| {
            vars.get(key)
                .cloned()
                .or_else(|| fallback.clone())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let provider = match pick(Self::PROVIDER_ENV, &overrides.provider) {
            Some(name) => name.parse()?,
            None => ProviderKind::Gemini,
        };
        let timeout_secs = vars
            .get(Self::TIMEOUT_ENV)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .or(overrides.timeout_secs)
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Ok(Self {
            provider,
            api_key: pick(Self::API_KEY_ENV, &overrides.api_key),
            endpoint: pick(Self::ENDPOINT_ENV, &overrides.endpoint),
            model: pick(Self::MODEL_ENV, &overrides.model),
            timeout_secs,
        })
    }

    /// Whether a remote call may be attempted at all.
    pub fn has_credential(&self) -> bool {
        self.provider != ProviderKind::Offline && self.api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    fn with_env_lock<F: FnOnce()>(func: F) {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        for key in [
            LlmSettings::PROVIDER_ENV,
            LlmSettings::API_KEY_ENV,
            LlmSettings::ENDPOINT_ENV,
            LlmSettings::MODEL_ENV,
            LlmSettings::TIMEOUT_ENV,
        ] {
            env::remove_var(key);
        }
        func();
    }

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_to_gemini_without_credential() {
        with_env_lock(|| {
            let settings = LlmSettings::from_env().expect("should load settings");
            assert_eq!(settings.provider, ProviderKind::Gemini);
            assert!(settings.api_key.is_none());
            assert!(!settings.has_credential());
            assert_eq!(settings.timeout_secs, 30);
        });
    }

    #[test]
    fn reads_key_and_provider_from_env() {
        with_env_lock(|| {
            env::set_var(LlmSettings::PROVIDER_ENV, "openai");
            env::set_var(LlmSettings::API_KEY_ENV, "secret");
            env::set_var(LlmSettings::TIMEOUT_ENV, "45");
            let settings = LlmSettings::from_env().expect("should parse");
            assert_eq!(settings.provider, ProviderKind::OpenAi);
            assert_eq!(settings.api_key.as_deref(), Some("secret"));
            assert_eq!(settings.timeout_secs, 45);
            assert!(settings.has_credential());
            env::remove_var(LlmSettings::PROVIDER_ENV);
            env::remove_var(LlmSettings::API_KEY_ENV);
            env::remove_var(LlmSettings::TIMEOUT_ENV);
        });
    }

    #[test]
    fn blank_key_counts_as_absent() {
        let settings =
            LlmSettings::from_map(vars(&[("BIOSENSE_API_KEY", "   ")]), &LlmOverrides::default())
                .unwrap();
        assert!(settings.api_key.is_none());
    }

    #[test]
    fn offline_provider_never_has_credential() {
        let settings = LlmSettings::from_map(
            vars(&[("BIOSENSE_PROVIDER", "offline"), ("BIOSENSE_API_KEY", "k")]),
            &LlmOverrides::default(),
        )
        .unwrap();
        assert_eq!(settings.provider, ProviderKind::Offline);
        assert!(!settings.has_credential());
    }

    #[test]
    fn environment_wins_over_file_overrides() {
        let overrides = LlmOverrides {
            provider: Some("openai".into()),
            model: Some("file-model".into()),
            timeout_secs: Some(12),
            ..LlmOverrides::default()
        };
        let settings =
            LlmSettings::from_map(vars(&[("BIOSENSE_MODEL", "env-model")]), &overrides).unwrap();
        assert_eq!(settings.provider, ProviderKind::OpenAi);
        assert_eq!(settings.model.as_deref(), Some("env-model"));
        assert_eq!(settings.timeout_secs, 12);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = LlmSettings::from_map(
            vars(&[("BIOSENSE_PROVIDER", "carrier-pigeon")]),
            &LlmOverrides::default(),
        )
        .expect_err("unknown provider");
        assert!(err.to_string().contains("carrier-pigeon"));
    }
}
