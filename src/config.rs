use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors that prevent startup. The process never serves events with
/// invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    MissingVar(&'static str),

    #[error("{key} must be set when AI_PROVIDER={provider}")]
    MissingProviderKey {
        key: &'static str,
        provider: AiProvider,
    },

    #[error("AI_PROVIDER must be either 'openai' or 'openrouter', got '{0}'")]
    InvalidProvider(String),

    #[error("PORT must be an integer, got '{0}'")]
    InvalidPort(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AiProvider {
    #[default]
    Openai,
    Openrouter,
}

impl fmt::Display for AiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AiProvider::Openai => write!(f, "openai"),
            AiProvider::Openrouter => write!(f, "openrouter"),
        }
    }
}

impl FromStr for AiProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(AiProvider::Openai),
            "openrouter" => Ok(AiProvider::Openrouter),
            other => Err(ConfigError::InvalidProvider(other.to_string())),
        }
    }
}

/// Configuration values required to run the assistant, read once from the
/// environment at startup and immutable afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub slack_bot_token: String,
    pub slack_signing_secret: String,
    pub trigger_phrase: String,
    pub provider: AiProvider,
    pub openai_api_key: Option<String>,
    pub openai_model: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub openrouter_model: Option<String>,
    pub openrouter_base_url: Option<String>,
    pub openrouter_referer: Option<String>,
    pub openrouter_title: Option<String>,
    pub system_prompt: Option<String>,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Trigger phrase lower-cased and trimmed for matching.
    pub fn normalized_trigger(&self) -> String {
        self.trigger_phrase.trim().to_lowercase()
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Empty values are treated the same as unset ones.
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let slack_bot_token =
            get("SLACK_BOT_TOKEN").ok_or(ConfigError::MissingVar("SLACK_BOT_TOKEN"))?;
        let slack_signing_secret =
            get("SLACK_SIGNING_SECRET").ok_or(ConfigError::MissingVar("SLACK_SIGNING_SECRET"))?;

        let provider = match get("AI_PROVIDER") {
            Some(raw) => raw.parse()?,
            None => AiProvider::default(),
        };

        let port = match get("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(raw))?,
            None => 3000,
        };

        Ok(Config {
            slack_bot_token,
            slack_signing_secret,
            trigger_phrase: get("TRIGGER_PHRASE").unwrap_or_else(|| "pcmbot".to_string()),
            provider,
            openai_api_key: get("OPENAI_API_KEY"),
            openai_model: get("OPENAI_MODEL"),
            openrouter_api_key: get("OPENROUTER_API_KEY"),
            openrouter_model: get("OPENROUTER_MODEL"),
            openrouter_base_url: get("OPENROUTER_BASE_URL"),
            openrouter_referer: get("OPENROUTER_REFERER"),
            openrouter_title: get("OPENROUTER_TITLE"),
            system_prompt: get("SYSTEM_PROMPT"),
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + 'static {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_minimal_config_applies_defaults() {
        let config = Config::from_lookup(env(&[
            ("SLACK_BOT_TOKEN", "xoxb-1"),
            ("SLACK_SIGNING_SECRET", "shh"),
        ]))
        .unwrap();

        assert_eq!(config.provider, AiProvider::Openai);
        assert_eq!(config.trigger_phrase, "pcmbot");
        assert_eq!(config.port, 3000);
        assert!(config.system_prompt.is_none());
    }

    #[test]
    fn test_missing_bot_token_fails() {
        let err = Config::from_lookup(env(&[("SLACK_SIGNING_SECRET", "shh")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("SLACK_BOT_TOKEN")));
    }

    #[test]
    fn test_missing_signing_secret_fails() {
        let err = Config::from_lookup(env(&[("SLACK_BOT_TOKEN", "xoxb-1")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("SLACK_SIGNING_SECRET")));
    }

    #[test]
    fn test_empty_value_counts_as_unset() {
        let err = Config::from_lookup(env(&[
            ("SLACK_BOT_TOKEN", "  "),
            ("SLACK_SIGNING_SECRET", "shh"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("SLACK_BOT_TOKEN")));
    }

    #[test]
    fn test_invalid_provider_rejected() {
        let err = Config::from_lookup(env(&[
            ("SLACK_BOT_TOKEN", "xoxb-1"),
            ("SLACK_SIGNING_SECRET", "shh"),
            ("AI_PROVIDER", "anthropic"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidProvider(_)));
    }

    #[test]
    fn test_provider_parse_is_case_insensitive() {
        let config = Config::from_lookup(env(&[
            ("SLACK_BOT_TOKEN", "xoxb-1"),
            ("SLACK_SIGNING_SECRET", "shh"),
            ("AI_PROVIDER", "OpenRouter"),
        ]))
        .unwrap();
        assert_eq!(config.provider, AiProvider::Openrouter);
    }

    #[test]
    fn test_invalid_port_rejected() {
        let err = Config::from_lookup(env(&[
            ("SLACK_BOT_TOKEN", "xoxb-1"),
            ("SLACK_SIGNING_SECRET", "shh"),
            ("PORT", "three-thousand"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort(_)));
    }

    #[test]
    fn test_normalized_trigger_lowercases_and_trims() {
        let config = Config::from_lookup(env(&[
            ("SLACK_BOT_TOKEN", "xoxb-1"),
            ("SLACK_SIGNING_SECRET", "shh"),
            ("TRIGGER_PHRASE", "  PcmBot "),
        ]))
        .unwrap();
        assert_eq!(config.normalized_trigger(), "pcmbot");
    }
}
