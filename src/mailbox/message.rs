//! Message model — one fetched email and its pending reply.

use std::sync::LazyLock;

use mail_parser::{MessageParser, PartType};
use regex::Regex;

/// Matches an existing reply prefix (`Re:`, `RE:`, `re:`), ignoring leading whitespace.
static REPLY_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*re:").unwrap_or_else(|e| panic!("invalid reply prefix regex: {e}"))
});

/// One email awaiting an automated reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Sender address, treated as opaque.
    pub sender: String,
    /// May be empty.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// Account that received the message; the `From` of the reply.
    pub mailbox_owner: String,
    /// Message-ID header of the original, used for reply threading.
    pub message_id: Option<String>,
    /// Empty until a usable reply has been generated.
    pub reply: String,
}

impl Message {
    pub fn new(
        sender: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        mailbox_owner: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            subject: subject.into(),
            body: body.into(),
            mailbox_owner: mailbox_owner.into(),
            message_id: None,
            reply: String::new(),
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Parse a raw RFC 5322 message. Returns `None` if it cannot be parsed.
    pub fn from_rfc822(raw: &[u8], mailbox_owner: &str) -> Option<Self> {
        let parsed = MessageParser::default().parse(raw)?;
        let sender = extract_sender(&parsed);
        let subject = parsed.subject().unwrap_or_default().to_string();
        let body = extract_text(&parsed);
        let message_id = parsed.message_id().map(|id| id.to_string());

        Some(Self {
            sender,
            subject,
            body,
            mailbox_owner: mailbox_owner.to_string(),
            message_id,
            reply: String::new(),
        })
    }

    /// Subject line for the reply envelope.
    pub fn reply_subject(&self) -> String {
        reply_subject(&self.subject)
    }

    pub fn has_reply(&self) -> bool {
        !self.reply.is_empty()
    }
}

/// Prefix `subject` with `Re: ` unless it already carries a reply prefix.
///
/// Idempotent: `reply_subject(&reply_subject(s)) == reply_subject(s)`.
pub fn reply_subject(subject: &str) -> String {
    if REPLY_PREFIX.is_match(subject) {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    }
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract the sender address from a parsed email.
fn extract_sender(parsed: &mail_parser::Message) -> String {
    parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_default()
}

/// Plain-text part first, then the HTML part reduced to text, then the raw
/// text of the first part.
fn extract_text(parsed: &mail_parser::Message) -> String {
    for part in parsed.text_bodies() {
        if let PartType::Text(text) = &part.body {
            return text.to_string();
        }
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    parsed
        .parts
        .first()
        .map(|part| String::from_utf8_lossy(part.contents()).into_owned())
        .unwrap_or_default()
}
