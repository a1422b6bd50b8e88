//! Minimal blocking IMAP4rev1 client over rustls.
//!
//! Covers exactly what the replier needs: LOGIN, SELECT, UID SEARCH,
//! UID FETCH (RFC822), UID STORE and LOGOUT. Run it inside `spawn_blocking`.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::MailboxError;

/// TLS stream used for real servers.
pub type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Response to one tagged command.
#[derive(Debug, Default)]
pub struct Response {
    /// Untagged (`* ...`) lines, without CRLF.
    pub untagged: Vec<String>,
    /// Literal payloads (`{N}` blocks) in the order received.
    pub literals: Vec<Vec<u8>>,
    /// Whether the tagged completion was `OK`.
    pub ok: bool,
    /// The tagged completion line, without CRLF.
    pub status: String,
}

/// An authenticated-or-not IMAP session over any byte stream.
pub struct ImapClient<S: Read + Write> {
    stream: BufReader<S>,
    host: String,
    next_tag: u32,
    logged_out: bool,
}

/// Open a TCP connection to `host:port` and wrap it in TLS.
pub fn connect_tls(host: &str, port: u16) -> Result<ImapClient<TlsStream>, MailboxError> {
    let connect_err = |reason: String| MailboxError::Connect {
        host: host.to_string(),
        reason,
    };

    let tcp = TcpStream::connect((host, port)).map_err(|e| connect_err(e.to_string()))?;
    tcp.set_read_timeout(Some(READ_TIMEOUT))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls_pki_types::ServerName::try_from(host.to_string())
        .map_err(|e| connect_err(format!("invalid server name: {e}")))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| connect_err(format!("TLS setup failed: {e}")))?;

    ImapClient::new(rustls::StreamOwned::new(conn, tcp), host)
}

impl<S: Read + Write> ImapClient<S> {
    /// Wrap a stream and consume the server greeting.
    pub fn new(stream: S, host: &str) -> Result<Self, MailboxError> {
        let mut client = Self {
            stream: BufReader::new(stream),
            host: host.to_string(),
            next_tag: 1,
            logged_out: false,
        };
        let greeting = client.read_line()?;
        let greeting = String::from_utf8_lossy(&greeting);
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(MailboxError::Connect {
                host: client.host.clone(),
                reason: format!("unexpected greeting: {}", greeting.trim_end()),
            });
        }
        Ok(client)
    }

    /// The underlying stream.
    pub fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<(), MailboxError> {
        let cmd = format!("LOGIN {} {}", quote(username), quote(password));
        let resp = self.command(&cmd)?;
        if !resp.ok {
            return Err(MailboxError::Authentication {
                host: self.host.clone(),
                reason: resp.status,
            });
        }
        debug!(host = %self.host, "IMAP login succeeded");
        Ok(())
    }

    pub fn select(&mut self, mailbox: &str) -> Result<(), MailboxError> {
        let resp = self.command(&format!("SELECT {}", quote(mailbox)))?;
        if !resp.ok {
            return Err(MailboxError::Fetch(format!(
                "cannot select {mailbox}: {}",
                resp.status
            )));
        }
        Ok(())
    }

    /// UIDs of messages matching `filter` in the selected mailbox.
    pub fn uid_search(&mut self, filter: &str) -> Result<Vec<u32>, MailboxError> {
        let resp = self.command(&format!("UID SEARCH {filter}"))?;
        if !resp.ok {
            return Err(MailboxError::Fetch(format!(
                "search {filter:?} rejected: {}",
                resp.status
            )));
        }
        let uids = resp
            .untagged
            .iter()
            .filter_map(|line| line.strip_prefix("* SEARCH"))
            .flat_map(|rest| rest.split_whitespace())
            .filter_map(|n| n.parse().ok())
            .collect();
        Ok(uids)
    }

    /// Full RFC 822 content of one message. `None` if the server returned no body.
    pub fn uid_fetch_rfc822(&mut self, uid: u32) -> Result<Option<Vec<u8>>, MailboxError> {
        let resp = self.command(&format!("UID FETCH {uid} RFC822"))?;
        if !resp.ok {
            return Err(MailboxError::Fetch(format!(
                "fetch of UID {uid} failed: {}",
                resp.status
            )));
        }
        Ok(resp.literals.into_iter().next())
    }

    pub fn uid_mark_seen(&mut self, uid: u32) -> Result<(), MailboxError> {
        let resp = self.command(&format!("UID STORE {uid} +FLAGS.SILENT (\\Seen)"))?;
        if !resp.ok {
            return Err(MailboxError::Protocol(format!(
                "store on UID {uid} failed: {}",
                resp.status
            )));
        }
        Ok(())
    }

    pub fn logout(&mut self) -> Result<(), MailboxError> {
        if self.logged_out {
            return Ok(());
        }
        self.logged_out = true;
        self.command("LOGOUT")?;
        Ok(())
    }

    /// Send a tagged command and collect everything up to its completion.
    pub fn command(&mut self, cmd: &str) -> Result<Response, MailboxError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let stream = self.stream.get_mut();
        stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        stream.flush()?;

        let tag_prefix = format!("{tag} ");
        let mut resp = Response::default();
        loop {
            let line = self.read_line()?;
            if let Some(len) = literal_len(&line) {
                let mut literal = vec![0u8; len];
                self.stream.read_exact(&mut literal)?;
                resp.literals.push(literal);
            }

            let text = String::from_utf8_lossy(&line).trim_end().to_string();
            if let Some(rest) = text.strip_prefix(&tag_prefix) {
                resp.ok = rest.starts_with("OK");
                resp.status = text;
                return Ok(resp);
            }
            if text.starts_with('*') {
                resp.untagged.push(text);
            }
        }
    }

    fn read_line(&mut self) -> Result<Vec<u8>, MailboxError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(MailboxError::Protocol("IMAP connection closed".into()));
        }
        Ok(buf)
    }
}

impl<S: Read + Write> Drop for ImapClient<S> {
    fn drop(&mut self) {
        if !self.logged_out
            && let Err(e) = self.logout()
        {
            warn!(host = %self.host, error = %e, "IMAP logout on drop failed");
        }
    }
}

/// Quote an IMAP string argument.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Size of a `{N}` literal announced at the end of `line`.
fn literal_len(line: &[u8]) -> Option<usize> {
    let line = std::str::from_utf8(line).ok()?.trim_end();
    let open = line.rfind('{')?;
    line[open + 1..].strip_suffix('}')?.parse().ok()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;

    use super::*;

    /// In-memory stream: reads a scripted server transcript, records writes.
    pub(crate) struct ScriptedStream {
        input: Cursor<Vec<u8>>,
        pub(crate) output: Vec<u8>,
    }

    impl ScriptedStream {
        pub(crate) fn new(script: &str) -> Self {
            Self {
                input: Cursor::new(script.as_bytes().to_vec()),
                output: Vec::new(),
            }
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn sent(client: &ImapClient<ScriptedStream>) -> String {
        String::from_utf8_lossy(&client.get_ref().output).to_string()
    }

    #[test]
    fn quote_escapes_specials() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote(r#"pa"ss\word"#), r#""pa\"ss\\word""#);
    }

    #[test]
    fn literal_len_parses_trailing_size() {
        assert_eq!(literal_len(b"* 1 FETCH (UID 7 RFC822 {42}\r\n"), Some(42));
        assert_eq!(literal_len(b"* OK ready\r\n"), None);
    }

    #[test]
    fn rejects_bad_greeting() {
        let stream = ScriptedStream::new("* BYE go away\r\n");
        assert!(matches!(
            ImapClient::new(stream, "imap.test"),
            Err(MailboxError::Connect { .. })
        ));
    }

    #[test]
    fn login_failure_is_authentication_error() {
        let stream = ScriptedStream::new("* OK hello\r\nA1 NO [AUTHENTICATIONFAILED] nope\r\n");
        let mut client = ImapClient::new(stream, "imap.test").unwrap();
        let err = client.login("user", "wrong").unwrap_err();
        assert!(matches!(err, MailboxError::Authentication { .. }));
        assert!(sent(&client).starts_with("A1 LOGIN \"user\" \"wrong\"\r\n"));
    }

    #[test]
    fn search_collects_uids() {
        let stream = ScriptedStream::new(
            "* OK hello\r\n\
             A1 OK logged in\r\n\
             * 3 EXISTS\r\n\
             A2 OK [READ-WRITE] selected\r\n\
             * SEARCH 4 9 12\r\n\
             A3 OK search done\r\n",
        );
        let mut client = ImapClient::new(stream, "imap.test").unwrap();
        client.login("user", "pass").unwrap();
        client.select("INBOX").unwrap();
        assert_eq!(client.uid_search("UNSEEN").unwrap(), vec![4, 9, 12]);
        assert!(sent(&client).contains("A3 UID SEARCH UNSEEN\r\n"));
    }

    #[test]
    fn empty_search_returns_no_uids() {
        let stream = ScriptedStream::new("* OK hello\r\n* SEARCH\r\nA1 OK done\r\n");
        let mut client = ImapClient::new(stream, "imap.test").unwrap();
        assert!(client.uid_search("UNSEEN").unwrap().is_empty());
    }

    #[test]
    fn fetch_reads_literal_by_length() {
        let body = "Subject: Hi\r\n\r\nline one\r\nA1 OK not really the end\r\n";
        let script = format!(
            "* OK hello\r\n* 1 FETCH (UID 5 RFC822 {{{}}}\r\n{body})\r\nA1 OK fetched\r\n",
            body.len()
        );
        let mut client = ImapClient::new(ScriptedStream::new(&script), "imap.test").unwrap();
        let raw = client.uid_fetch_rfc822(5).unwrap().unwrap();
        assert_eq!(raw, body.as_bytes());
    }

    #[test]
    fn logout_is_sent_once() {
        let stream = ScriptedStream::new("* OK hello\r\n* BYE bye\r\nA1 OK logged out\r\n");
        let mut client = ImapClient::new(stream, "imap.test").unwrap();
        client.logout().unwrap();
        client.logout().unwrap();
        assert_eq!(sent(&client), "A1 LOGOUT\r\n");
    }
}
