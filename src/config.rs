//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::triage::TriageConfig;
use crate::triage::prompts;

/// Service configuration, read from `TRIAGE_*` environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    /// HTTP / WebSocket listen port.
    pub port: u16,
    pub db_path: PathBuf,
    /// When false every triaged message is escalated.
    pub auto_reply: bool,
    pub triage: TriageConfig,
    /// Extra regexes that always escalate (matched on subject and body).
    pub escalate_patterns: Vec<String>,
    /// How often pending messages are re-processed.
    pub pending_interval: Duration,
}

impl AppConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend: LlmBackend = match var("TRIAGE_LLM_BACKEND") {
            Some(s) => s.parse()?,
            None => LlmBackend::OpenAi,
        };
        let api_key = var(backend.api_key_var())
            .ok_or_else(|| ConfigError::MissingEnvVar(backend.api_key_var().to_string()))?;
        let model = var("TRIAGE_MODEL").unwrap_or_else(|| backend.default_model().to_string());

        let port = parse_or(var("TRIAGE_PORT"), "TRIAGE_PORT", 8080u16)?;
        let db_path = var("TRIAGE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/support-triage.db"));
        let auto_reply = match var("TRIAGE_AUTO_REPLY") {
            Some(s) => parse_bool("TRIAGE_AUTO_REPLY", &s)?,
            None => true,
        };
        let pending_secs = parse_or(
            var("TRIAGE_PENDING_INTERVAL_SECS"),
            "TRIAGE_PENDING_INTERVAL_SECS",
            300u64,
        )?;
        if pending_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TRIAGE_PENDING_INTERVAL_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let categories = var("TRIAGE_CATEGORIES")
            .map(|s| split_list(&s))
            .filter(|c| !c.is_empty())
            .unwrap_or_else(prompts::default_categories);
        let escalate_patterns = var("TRIAGE_ESCALATE_PATTERNS")
            .map(|s| split_list(&s))
            .unwrap_or_default();
        for pattern in &escalate_patterns {
            regex::Regex::new(pattern).map_err(|e| ConfigError::InvalidValue {
                key: "TRIAGE_ESCALATE_PATTERNS".to_string(),
                message: format!("'{pattern}': {e}"),
            })?;
        }

        Ok(Self {
            llm: LlmConfig {
                backend,
                api_key: SecretString::from(api_key),
                model,
            },
            port,
            db_path,
            auto_reply,
            triage: TriageConfig {
                categories,
                ..TriageConfig::default()
            },
            escalate_patterns,
            pending_interval: Duration::from_secs(pending_secs),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    value: Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match value {
        Some(s) => s.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[("OPENAI_API_KEY", "sk-test")]).unwrap();
        assert_eq!(cfg.llm.backend, LlmBackend::OpenAi);
        assert_eq!(cfg.llm.model, "gpt-4o-mini");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.db_path, PathBuf::from("./data/support-triage.db"));
        assert!(cfg.auto_reply);
        assert_eq!(cfg.pending_interval, Duration::from_secs(300));
        assert_eq!(cfg.triage.categories, prompts::default_categories());
        assert!(cfg.escalate_patterns.is_empty());
    }

    #[test]
    fn missing_api_key() {
        let err = config(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "OPENAI_API_KEY"));
    }

    #[test]
    fn anthropic_backend_uses_its_key() {
        let cfg = config(&[
            ("TRIAGE_LLM_BACKEND", "anthropic"),
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("TRIAGE_MODEL", "claude-custom"),
        ])
        .unwrap();
        assert_eq!(cfg.llm.backend, LlmBackend::Anthropic);
        assert_eq!(cfg.llm.model, "claude-custom");
    }

    #[test]
    fn overrides() {
        let cfg = config(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("TRIAGE_PORT", "9000"),
            ("TRIAGE_AUTO_REPLY", "false"),
            ("TRIAGE_CATEGORIES", "Financeiro, Técnico ,,Outros"),
            ("TRIAGE_ESCALATE_PATTERNS", "(?i)cancelar contrato"),
            ("TRIAGE_PENDING_INTERVAL_SECS", "60"),
        ])
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert!(!cfg.auto_reply);
        assert_eq!(cfg.triage.categories, vec!["Financeiro", "Técnico", "Outros"]);
        assert_eq!(cfg.escalate_patterns, vec!["(?i)cancelar contrato"]);
        assert_eq!(cfg.pending_interval, Duration::from_secs(60));
    }

    #[test]
    fn invalid_values_are_rejected() {
        for (key, value) in [
            ("TRIAGE_PORT", "http"),
            ("TRIAGE_AUTO_REPLY", "maybe"),
            ("TRIAGE_ESCALATE_PATTERNS", "(unclosed"),
            ("TRIAGE_PENDING_INTERVAL_SECS", "0"),
            ("TRIAGE_LLM_BACKEND", "cohere"),
        ] {
            let err = config(&[("OPENAI_API_KEY", "sk-test"), (key, value)]).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { key: ref k, .. } if k == key),
                "{key}={value} gave {err:?}"
            );
        }
    }
}
