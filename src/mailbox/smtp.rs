//! Outbound replies via SMTP (STARTTLS) using lettre.

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{SmtpTransport, Transport};
use secrecy::ExposeSecret;

use crate::config::Credentials;
use crate::error::MailboxError;
use crate::mailbox::message::Message;

fn parse_mailbox(address: &str) -> Result<Mailbox, MailboxError> {
    address.parse().map_err(|e| MailboxError::InvalidAddress {
        address: address.to_string(),
        reason: format!("{e}"),
    })
}

/// Build the reply envelope for `message`.
///
/// `From` is the mailbox owner, `To` the original sender, the subject gets a
/// single `Re: ` prefix and the body is the generated reply.
pub fn build_reply(message: &Message) -> Result<lettre::Message, MailboxError> {
    let mut builder = lettre::Message::builder()
        .from(parse_mailbox(&message.mailbox_owner)?)
        .to(parse_mailbox(&message.sender)?)
        .subject(message.reply_subject())
        .header(ContentType::TEXT_PLAIN);

    if let Some(id) = &message.message_id {
        let id = format!("<{}>", id.trim_matches(|c| c == '<' || c == '>'));
        builder = builder.in_reply_to(id.clone()).references(id);
    }

    builder
        .body(message.reply.clone())
        .map_err(|e| MailboxError::Send {
            to: message.sender.clone(),
            reason: format!("Failed to build email: {e}"),
        })
}

/// Send one reply over a fresh STARTTLS session. Blocking.
pub fn send_reply(credentials: &Credentials, message: &Message) -> Result<(), MailboxError> {
    let email = build_reply(message)?;

    let creds = SmtpCredentials::new(
        credentials.username.clone(),
        credentials.password.expose_secret().to_string(),
    );

    let transport = SmtpTransport::starttls_relay(&credentials.smtp_host)
        .map_err(|e| MailboxError::Connect {
            host: credentials.smtp_host.clone(),
            reason: format!("SMTP relay error: {e}"),
        })?
        .port(credentials.smtp_port)
        .credentials(creds)
        .build();

    transport.send(&email).map_err(|e| MailboxError::Send {
        to: message.sender.clone(),
        reason: format!("SMTP send failed: {e}"),
    })?;

    tracing::info!(to = %message.sender, subject = %message.reply_subject(), "Reply sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        let mut msg = Message::new(
            "scammer@example.com",
            "You won!",
            "Congratulations, claim your prize now.",
            "bait@example.com",
        );
        msg.reply = "Oh wonderful! How do I claim it?".into();
        msg
    }

    fn formatted(email: &lettre::Message) -> String {
        String::from_utf8_lossy(&email.formatted()).to_string()
    }

    #[test]
    fn reply_envelope_headers() {
        let email = build_reply(&sample()).unwrap();
        let raw = formatted(&email);
        assert!(raw.contains("From: bait@example.com"));
        assert!(raw.contains("To: scammer@example.com"));
        assert!(raw.contains("Subject: Re: You won!"));
        assert!(raw.contains("Oh wonderful! How do I claim it?"));
    }

    #[test]
    fn reply_envelope_keeps_existing_prefix() {
        let mut msg = sample();
        msg.subject = "Re: You won!".into();
        let raw = formatted(&build_reply(&msg).unwrap());
        assert!(raw.contains("Subject: Re: You won!"));
        assert!(!raw.contains("Re: Re:"));
    }

    #[test]
    fn reply_envelope_threads_on_message_id() {
        let msg = sample().with_message_id("abc123@example.com");
        let raw = formatted(&build_reply(&msg).unwrap());
        assert!(raw.contains("In-Reply-To: <abc123@example.com>"));
        assert!(raw.contains("References: <abc123@example.com>"));
    }

    #[test]
    fn invalid_sender_is_rejected() {
        let mut msg = sample();
        msg.sender = "not an address".into();
        assert!(matches!(
            build_reply(&msg),
            Err(MailboxError::InvalidAddress { .. })
        ));
    }
}
