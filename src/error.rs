//! Error types for the replier.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Fatal(#[from] FatalError),
}

/// Configuration-related errors. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mailbox gateway errors (IMAP inbound, SMTP outbound).
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Authentication failed for {host}: {reason}")]
    Authentication { host: String, reason: String },

    #[error("Could not connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Failed to send reply to {to}: {reason}")]
    Send { to: String, reason: String },

    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("IMAP protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Conditions that end the polling loop. The process exits and an external
/// supervisor is expected to restart it.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("Cannot access mail server: {0}")]
    Connect(#[source] MailboxError),

    #[error("Cannot fetch unread messages: {0}")]
    Fetch(#[source] MailboxError),
}

/// Result type alias for the replier.
pub type Result<T> = std::result::Result<T, Error>;
