//! Configuration types, loaded once from the environment at startup.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::logging::LogConfig;

/// Persona used when `SCAMMERREPLIER_PERS` is not set.
pub const DEFAULT_PERSONA: &str = "Sei Luca Tux, un personaggio fittizio tonto e credulone. \
Luca ha appena ricevuto questa email, quale sarebbe il corpo della mail in risposta a questa email? \
Non introdurre commenti o consigli, solo il corpo della mail di risposta da ottimo credulone. \
Non essere sarcastico.";

/// Default IMAP search expression.
pub const DEFAULT_SEARCH_FILTER: &str = "UNSEEN";

/// Default seconds between polling cycles.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 600;

const DEFAULT_IMAP_PORT: u16 = 993;
const DEFAULT_SMTP_PORT: u16 = 587;

/// Mailbox connection details. Immutable for the process lifetime.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    /// Store-specific search expression selecting eligible messages.
    pub search_filter: String,
}

impl Credentials {
    /// Check that every required field is non-empty.
    ///
    /// Runs before any network activity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("SCAMMERREPLIER_IMAP", self.imap_host.as_str(), "IMAP host"),
            ("SCAMMERREPLIER_USER", self.username.as_str(), "mailbox username"),
            ("SCAMMERREPLIER_PASS", self.password.expose_secret(), "mailbox password"),
            ("SCAMMERREPLIER_SMTP", self.smtp_host.as_str(), "SMTP host"),
            ("SCAMMERREPLIER_FILTER", self.search_filter.as_str(), "IMAP search filter"),
        ];
        for (key, value, what) in fields {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingRequired {
                    key: key.to_string(),
                    hint: format!("The {what} must not be empty."),
                });
            }
        }
        Ok(())
    }
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct ReplierConfig {
    pub credentials: Credentials,
    /// Operator-supplied persona; `None` selects [`DEFAULT_PERSONA`].
    pub persona: Option<String>,
    pub poll_interval: Duration,
    pub llm: LlmConfig,
    pub log: LogConfig,
}

impl ReplierConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str, hint: &str| -> Result<String, ConfigError> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingRequired {
                    key: key.to_string(),
                    hint: hint.to_string(),
                })
        };

        let imap_host = required("SCAMMERREPLIER_IMAP", "Set the IMAP host of the mailbox.")?;
        let username = required("SCAMMERREPLIER_USER", "Set the mailbox username.")?;
        let password = required("SCAMMERREPLIER_PASS", "Set the mailbox password.")?;
        let smtp_host = required("SCAMMERREPLIER_SMTP", "Set the SMTP host used for replies.")?;

        let search_filter = lookup("SCAMMERREPLIER_FILTER")
            .unwrap_or_else(|| DEFAULT_SEARCH_FILTER.to_string())
            .to_uppercase();

        let credentials = Credentials {
            imap_host,
            imap_port: parse_or(&lookup, "SCAMMERREPLIER_IMAP_PORT", DEFAULT_IMAP_PORT)?,
            smtp_host,
            smtp_port: parse_or(&lookup, "SCAMMERREPLIER_SMTP_PORT", DEFAULT_SMTP_PORT)?,
            username,
            password: SecretString::from(password),
            search_filter,
        };
        credentials.validate()?;

        let persona = lookup("SCAMMERREPLIER_PERS").filter(|p| !p.trim().is_empty());

        let poll_interval = Duration::from_secs(parse_or(
            &lookup,
            "SCAMMERREPLIER_TIME",
            DEFAULT_POLL_INTERVAL_SECS,
        )?);

        let backend = match lookup("SCAMMERREPLIER_LLM").as_deref().map(str::trim) {
            None | Some("") => LlmBackend::Anthropic,
            Some(name) => name.parse()?,
        };
        let api_key = required(
            backend.api_key_var(),
            "Set the API key for the selected text-generation backend.",
        )?;
        let model = lookup("SCAMMERREPLIER_MODEL")
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| backend.default_model().to_string());

        let llm = LlmConfig {
            backend,
            api_key: SecretString::from(api_key),
            model,
        };

        let mut log = LogConfig::default();
        if let Some(dir) = lookup("SCAMMERREPLIER_LOG_DIR").filter(|d| !d.trim().is_empty()) {
            log = log.with_log_dir(dir);
        }

        Ok(Self {
            credentials,
            persona,
            poll_interval,
            llm,
            log,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
    }
}
