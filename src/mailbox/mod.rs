//! Mailbox gateway — IMAP for inbound, SMTP via lettre for outbound.
//!
//! A fresh connection is opened for every cycle and closed at its end.

pub mod imap;
pub mod message;
pub mod smtp;

pub use message::{Message, reply_subject};

use std::io::{Read, Write};

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::config::Credentials;
use crate::error::MailboxError;
use imap::{ImapClient, TlsStream};

/// Folder searched for unread messages.
pub const INBOX: &str = "INBOX";

/// Sender substring that marks the bot's own auto-replies.
///
/// A crude loop guard: any sender containing it is never answered.
pub const REPLY_LOOP_MARKER: &str = "reply";

/// Opens per-cycle connections to the mail store.
#[async_trait]
pub trait MailboxGateway: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn MailboxConnection>, MailboxError>;
}

/// One authenticated session, scoped to a single cycle.
#[async_trait]
pub trait MailboxConnection: Send {
    /// Fetch all messages matching the configured filter, eagerly.
    async fn fetch_unread(&mut self) -> Result<Vec<Message>, MailboxError>;

    /// Send the reply attached to `message`.
    async fn send(&mut self, message: &Message) -> Result<(), MailboxError>;

    /// Release the session. Idempotent; safe to call after a failed fetch.
    async fn close(&mut self);
}

/// Why a fetched message was left out of the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Sender contains [`REPLY_LOOP_MARKER`].
    ReplyLoop,
    /// Sender is the mailbox owner.
    SelfSent,
    /// No sender address could be extracted.
    NoSender,
}

/// Decide whether a message from `sender` must be excluded from the batch.
pub fn skip_reason(sender: &str, mailbox_owner: &str) -> Option<SkipReason> {
    if sender.is_empty() {
        Some(SkipReason::NoSender)
    } else if sender.contains(REPLY_LOOP_MARKER) {
        Some(SkipReason::ReplyLoop)
    } else if sender.eq_ignore_ascii_case(mailbox_owner) {
        Some(SkipReason::SelfSent)
    } else {
        None
    }
}

/// Select the inbox, search with `filter` and convert each hit to a [`Message`].
///
/// Every fetched message is flagged `\Seen`, including the skipped ones.
pub fn fetch_matching<S: Read + Write>(
    client: &mut ImapClient<S>,
    filter: &str,
    mailbox_owner: &str,
) -> Result<Vec<Message>, MailboxError> {
    client.select(INBOX)?;
    let uids = client.uid_search(filter)?;

    let mut messages = Vec::with_capacity(uids.len());
    for uid in uids {
        let raw = client.uid_fetch_rfc822(uid)?;

        if let Err(e) = client.uid_mark_seen(uid) {
            warn!(uid, error = %e, "Failed to mark message as seen");
        }

        let Some(message) = raw
            .as_deref()
            .and_then(|raw| Message::from_rfc822(raw, mailbox_owner))
        else {
            warn!(uid, "Skipping message that could not be parsed");
            continue;
        };

        if let Some(reason) = skip_reason(&message.sender, mailbox_owner) {
            debug!(uid, sender = %message.sender, ?reason, "Skipping message");
            continue;
        }

        messages.push(message);
    }

    if messages.is_empty() {
        info!("No new emails to process");
    } else {
        info!(count = messages.len(), "Fetched unread emails");
    }
    Ok(messages)
}

// ── IMAP + SMTP gateway ─────────────────────────────────────────────

/// Production gateway: IMAP over implicit TLS, SMTP with STARTTLS.
pub struct ImapSmtpGateway {
    credentials: Credentials,
}

impl ImapSmtpGateway {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl MailboxGateway for ImapSmtpGateway {
    async fn connect(&self) -> Result<Box<dyn MailboxConnection>, MailboxError> {
        // Reject empty fields before touching the network.
        self.credentials
            .validate()
            .map_err(|e| MailboxError::Authentication {
                host: self.credentials.imap_host.clone(),
                reason: e.to_string(),
            })?;

        let creds = self.credentials.clone();
        let client = tokio::task::spawn_blocking(move || {
            let mut client = imap::connect_tls(&creds.imap_host, creds.imap_port)?;
            client.login(&creds.username, creds.password.expose_secret())?;
            Ok::<_, MailboxError>(client)
        })
        .await
        .map_err(|e| MailboxError::Connect {
            host: self.credentials.imap_host.clone(),
            reason: format!("connect task panicked: {e}"),
        })??;

        info!(
            host = %self.credentials.imap_host,
            user = %self.credentials.username,
            "Connected to mailbox"
        );

        Ok(Box::new(ImapSmtpConnection {
            client: Some(client),
            credentials: self.credentials.clone(),
        }))
    }
}

/// A logged-in IMAP session plus what is needed to send replies.
struct ImapSmtpConnection {
    client: Option<ImapClient<TlsStream>>,
    credentials: Credentials,
}

#[async_trait]
impl MailboxConnection for ImapSmtpConnection {
    async fn fetch_unread(&mut self) -> Result<Vec<Message>, MailboxError> {
        let mut client = self
            .client
            .take()
            .ok_or_else(|| MailboxError::Protocol("IMAP session already closed".into()))?;
        let filter = self.credentials.search_filter.clone();
        let owner = self.credentials.username.clone();

        let (client, result) = tokio::task::spawn_blocking(move || {
            let result = fetch_matching(&mut client, &filter, &owner);
            (client, result)
        })
        .await
        .map_err(|e| MailboxError::Fetch(format!("fetch task panicked: {e}")))?;

        self.client = Some(client);
        result
    }

    async fn send(&mut self, message: &Message) -> Result<(), MailboxError> {
        let creds = self.credentials.clone();
        let message = message.clone();
        let to = message.sender.clone();
        tokio::task::spawn_blocking(move || smtp::send_reply(&creds, &message))
            .await
            .map_err(|e| MailboxError::Send {
                to,
                reason: format!("send task panicked: {e}"),
            })?
    }

    async fn close(&mut self) {
        let Some(mut client) = self.client.take() else {
            return;
        };
        let host = self.credentials.imap_host.clone();
        let result = tokio::task::spawn_blocking(move || client.logout()).await;
        match result {
            Ok(Ok(())) => debug!(host = %host, "IMAP session closed"),
            Ok(Err(e)) => warn!(host = %host, error = %e, "IMAP logout failed"),
            Err(e) => warn!(host = %host, error = %e, "IMAP logout task panicked"),
        }
    }
}
