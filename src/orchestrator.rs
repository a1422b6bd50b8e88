//! Cycle orchestrator — one fetch → generate → send pass, and the polling loop.
//!
//! Cycle states: `Connecting → Fetching → (Idle) → Generating → Sending → Sleeping`.
//! Only connecting and fetching can end the process; every later step skips
//! the affected message and carries on.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::{FatalError, MailboxError};
use crate::mailbox::{MailboxConnection, MailboxGateway, Message};
use crate::reply::ReplyGenerator;

/// Bodies this short (in characters) are not worth answering.
pub const MIN_BODY_CHARS: usize = 5;

/// Replies this short (in characters) are never sent.
pub const MIN_SEND_CHARS: usize = 5;

/// A reply that could not be delivered.
#[derive(Debug)]
pub struct SendFailure {
    pub recipient: String,
    pub subject: String,
    pub error: MailboxError,
}

/// Outcome of one cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Messages returned by the gateway.
    pub fetched: usize,
    /// Messages whose body was too short to answer.
    pub skipped_short_body: usize,
    /// Messages that received a usable reply.
    pub generated: usize,
    /// Replies delivered.
    pub sent: usize,
    /// Messages left unanswered because no usable reply was produced.
    pub dropped: usize,
    pub send_failures: Vec<SendFailure>,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.fetched == 0
    }
}

/// Drives polling cycles against one mailbox.
pub struct Orchestrator {
    gateway: Arc<dyn MailboxGateway>,
    generator: ReplyGenerator,
    poll_interval: Duration,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn MailboxGateway>,
        generator: ReplyGenerator,
        poll_interval: Duration,
    ) -> Self {
        Self {
            gateway,
            generator,
            poll_interval,
        }
    }

    /// Run cycles forever, sleeping `poll_interval` between them.
    ///
    /// Only returns when a cycle hits a fatal error.
    pub async fn run(&self) -> Result<Infallible, FatalError> {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            "Replier started"
        );
        loop {
            let report = self.run_cycle().await?;
            if !report.is_idle() {
                info!(
                    fetched = report.fetched,
                    skipped = report.skipped_short_body,
                    generated = report.generated,
                    sent = report.sent,
                    dropped = report.dropped,
                    failed = report.send_failures.len(),
                    "Cycle complete"
                );
            }
            info!("Waiting for next execution...");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Run a single cycle. The connection is closed before returning, on
    /// every path that opened one.
    pub async fn run_cycle(&self) -> Result<CycleReport, FatalError> {
        let mut conn = self.gateway.connect().await.map_err(FatalError::Connect)?;

        let mut messages = match conn.fetch_unread().await {
            Ok(messages) => messages,
            Err(e) => {
                conn.close().await;
                return Err(FatalError::Fetch(e));
            }
        };

        let mut report = CycleReport {
            fetched: messages.len(),
            ..CycleReport::default()
        };

        if !messages.is_empty() {
            self.generate_replies(&mut messages, &mut report).await;
            send_replies(conn.as_mut(), messages, &mut report).await;
        }

        conn.close().await;
        Ok(report)
    }

    /// Attach a reply to each message, in fetch order.
    async fn generate_replies(&self, messages: &mut [Message], report: &mut CycleReport) {
        for message in messages.iter_mut() {
            debug!(
                sender = %message.sender,
                subject = %message.subject,
                "Generating answer"
            );
            if message.body.chars().count() <= MIN_BODY_CHARS {
                warn!(body = %message.body, "Body is too short to be processed");
                report.skipped_short_body += 1;
                continue;
            }
            message.reply = self.generator.generate(&message.body).await;
            if message.has_reply() {
                report.generated += 1;
            }
        }
    }
}

/// Send every message carrying a long-enough reply; drop the rest.
///
/// A failed send is recorded and the loop moves on to the next message.
async fn send_replies(
    conn: &mut dyn MailboxConnection,
    messages: Vec<Message>,
    report: &mut CycleReport,
) {
    for message in messages {
        if message.reply.chars().count() <= MIN_SEND_CHARS {
            warn!(
                sender = %message.sender,
                reply = %message.reply,
                "Reply is too short to be sent"
            );
            report.dropped += 1;
            continue;
        }

        info!(subject = %message.subject, to = %message.sender, "Sending reply");
        match conn.send(&message).await {
            Ok(()) => report.sent += 1,
            Err(e) => {
                error!(to = %message.sender, error = %e, "Failed to send reply");
                report.send_failures.push(SendFailure {
                    recipient: message.sender,
                    subject: message.subject,
                    error: e,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::LlmError;
    use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};

    struct FixedLlm(&'static str);

    #[async_trait]
    impl LlmProvider for FixedLlm {
        fn model_name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: self.0.to_string(),
                input_tokens: 0,
                output_tokens: 0,
            })
        }
    }

    #[derive(Default)]
    struct Shared {
        connects: AtomicUsize,
        closes: AtomicUsize,
        sent: Mutex<Vec<Message>>,
    }

    struct MockGateway {
        shared: Arc<Shared>,
        inbox: Vec<Message>,
        fail_fetch: bool,
        fail_send_to: Option<&'static str>,
    }

    struct MockConnection {
        shared: Arc<Shared>,
        inbox: Vec<Message>,
        fail_fetch: bool,
        fail_send_to: Option<&'static str>,
    }

    #[async_trait]
    impl MailboxGateway for MockGateway {
        async fn connect(&self) -> Result<Box<dyn MailboxConnection>, MailboxError> {
            self.shared.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockConnection {
                shared: Arc::clone(&self.shared),
                inbox: self.inbox.clone(),
                fail_fetch: self.fail_fetch,
                fail_send_to: self.fail_send_to,
            }))
        }
    }

    #[async_trait]
    impl MailboxConnection for MockConnection {
        async fn fetch_unread(&mut self) -> Result<Vec<Message>, MailboxError> {
            if self.fail_fetch {
                return Err(MailboxError::Fetch("connection reset".into()));
            }
            Ok(std::mem::take(&mut self.inbox))
        }

        async fn send(&mut self, message: &Message) -> Result<(), MailboxError> {
            if self.fail_send_to == Some(message.sender.as_str()) {
                return Err(MailboxError::Send {
                    to: message.sender.clone(),
                    reason: "550 mailbox unavailable".into(),
                });
            }
            self.shared.sent.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn close(&mut self) {
            self.shared.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn msg(sender: &str, body: &str) -> Message {
        Message::new(sender, "Hello", body, "bait@example.com")
    }

    fn orchestrator(gateway: MockGateway, reply: &'static str) -> Orchestrator {
        let generator = ReplyGenerator::new(Arc::new(FixedLlm(reply)), None);
        Orchestrator::new(Arc::new(gateway), generator, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn short_bodies_skipped_and_never_sent() {
        let shared = Arc::new(Shared::default());
        let gateway = MockGateway {
            shared: Arc::clone(&shared),
            inbox: vec![msg("a@example.com", "hi!"), msg("b@example.com", "Please wire the fee today")],
            fail_fetch: false,
            fail_send_to: None,
        };
        let orch = orchestrator(gateway, "Of course, which bank should I use?");

        let report = orch.run_cycle().await.unwrap();
        assert_eq!(report.fetched, 2);
        assert_eq!(report.skipped_short_body, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(report.dropped, 1);

        let sent = shared.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].sender, "b@example.com");
        assert_eq!(shared.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_failure_does_not_stop_remaining_sends() {
        let shared = Arc::new(Shared::default());
        let gateway = MockGateway {
            shared: Arc::clone(&shared),
            inbox: vec![
                msg("bounce@example.com", "Urgent business proposal"),
                msg("ok@example.com", "Urgent business proposal"),
            ],
            fail_fetch: false,
            fail_send_to: Some("bounce@example.com"),
        };
        let orch = orchestrator(gateway, "Tell me more, I am very interested!");

        let report = orch.run_cycle().await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(report.send_failures.len(), 1);
        assert_eq!(report.send_failures[0].recipient, "bounce@example.com");
        assert_eq!(shared.sent.lock().unwrap()[0].sender, "ok@example.com");
    }

    #[tokio::test]
    async fn fetch_failure_is_fatal_and_closes_connection() {
        let shared = Arc::new(Shared::default());
        let gateway = MockGateway {
            shared: Arc::clone(&shared),
            inbox: vec![],
            fail_fetch: true,
            fail_send_to: None,
        };
        let orch = orchestrator(gateway, "irrelevant reply text");

        let err = orch.run().await.unwrap_err();
        assert!(matches!(err, FatalError::Fetch(_)));
        assert_eq!(shared.connects.load(Ordering::SeqCst), 1);
        assert_eq!(shared.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_fetch_is_idle() {
        let shared = Arc::new(Shared::default());
        let gateway = MockGateway {
            shared: Arc::clone(&shared),
            inbox: vec![],
            fail_fetch: false,
            fail_send_to: None,
        };
        let orch = orchestrator(gateway, "irrelevant reply text");

        let report = orch.run_cycle().await.unwrap();
        assert!(report.is_idle());
        assert_eq!(report.generated, 0);
        assert!(shared.sent.lock().unwrap().is_empty());
        assert_eq!(shared.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn each_cycle_opens_a_fresh_connection() {
        let shared = Arc::new(Shared::default());
        let gateway = MockGateway {
            shared: Arc::clone(&shared),
            inbox: vec![],
            fail_fetch: false,
            fail_send_to: None,
        };
        let orch = orchestrator(gateway, "irrelevant reply text");

        orch.run_cycle().await.unwrap();
        orch.run_cycle().await.unwrap();
        assert_eq!(shared.connects.load(Ordering::SeqCst), 2);
        assert_eq!(shared.closes.load(Ordering::SeqCst), 2);
    }
}
