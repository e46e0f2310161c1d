//! SMTP sessions over lettre's async client connection.
//!
//! Error mapping:
//!
//! | lettre error | [`SendError`] |
//! |---|---|
//! | 4xx/5xx reply other than 421 | `Rejected` (transient / permanent) |
//! | 421, I/O, TLS, timeout, malformed reply | `ConnectionLost` |
//! | client-side refusal before any command (e.g. 8BITMIME unsupported) | `InvalidMessage` |
//! | message rendering failure | `InvalidMessage` |
//!
//! lettre drops the underlying connection after any failed transaction, so a
//! session that saw a rejection re-runs the handshake before its next send.
//! Callers still observe a usable session.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{AsyncSmtpConnection, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use lettre::transport::smtp::Error as SmtpError;
use tracing::{debug, info, warn};

use super::{Connector, ConnectionError, Encryption, SendError, Session, TransportConfig};
use crate::message::OutboundMessage;

/// Reply code a relay uses when it is closing the transmission channel.
const SERVICE_CLOSING: &str = "421";

/// Opens authenticated SMTP sessions.
#[derive(Clone)]
pub struct SmtpConnector {
    inner: Arc<ConnectorInner>,
}

struct ConnectorInner {
    config: TransportConfig,
    hello_name: ClientId,
}

impl SmtpConnector {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            inner: Arc::new(ConnectorInner {
                config,
                hello_name: ClientId::default(),
            }),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }
}

impl ConnectorInner {
    fn tls_parameters(&self) -> Result<TlsParameters, ConnectionError> {
        TlsParameters::new(self.config.host.clone())
            .map_err(|e| ConnectionError::Encryption(Box::new(e)))
    }

    /// Connect, upgrade and authenticate.
    async fn handshake(&self) -> Result<AsyncSmtpConnection, ConnectionError> {
        let started = Instant::now();
        let config = &self.config;

        info!(
            host = %config.host,
            port = config.port,
            encryption = ?config.encryption,
            "smtp_session_opening"
        );

        let wrapper = match config.encryption {
            Encryption::Implicit => Some(self.tls_parameters()?),
            _ => None,
        };

        let mut connection = AsyncSmtpConnection::connect_tokio1(
            (config.host.as_str(), config.port),
            Some(config.connect_timeout),
            &self.hello_name,
            wrapper,
            None,
        )
        .await
        .map_err(|e| ConnectionError::Connect(Box::new(e)))?;

        let upgrade = match config.encryption {
            Encryption::StartTls => {
                if !connection.can_starttls() {
                    connection.abort().await;
                    return Err(ConnectionError::StartTlsUnavailable);
                }
                true
            }
            Encryption::Opportunistic => connection.can_starttls(),
            Encryption::Implicit | Encryption::None => false,
        };

        if upgrade {
            connection
                .starttls(self.tls_parameters()?, &self.hello_name)
                .await
                .map_err(|e| ConnectionError::Encryption(Box::new(e)))?;
        }

        if config.has_credentials() {
            let credentials = Credentials::new(config.username.clone(), config.password.clone());
            if let Err(e) = connection
                .auth(&[Mechanism::Plain, Mechanism::Login], &credentials)
                .await
            {
                connection.abort().await;
                return Err(ConnectionError::Authentication(Box::new(e)));
            }
        }

        info!(
            host = %config.host,
            starttls = upgrade,
            authenticated = config.has_credentials(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "smtp_session_opened"
        );

        Ok(connection)
    }
}

#[async_trait]
impl Connector for SmtpConnector {
    type Session = SmtpSession;

    async fn open(&self) -> Result<SmtpSession, ConnectionError> {
        let connection = self.inner.handshake().await?;
        Ok(SmtpSession {
            inner: Arc::clone(&self.inner),
            connection: Some(connection),
            closed: false,
        })
    }
}

/// One SMTP connection reused across sends.
///
/// Dropping the session without [`Session::close`] still closes the socket,
/// only the polite `QUIT` is skipped.
pub struct SmtpSession {
    inner: Arc<ConnectorInner>,
    connection: Option<AsyncSmtpConnection>,
    closed: bool,
}

#[async_trait]
impl Session for SmtpSession {
    async fn send(&mut self, message: &OutboundMessage) -> Result<(), SendError> {
        if self.closed {
            return Err(SendError::ConnectionLost("session already closed".to_string()));
        }

        let mime = message
            .to_mime()
            .map_err(|e| SendError::InvalidMessage(e.to_string()))?;
        let raw = mime.formatted();

        // Held outside `self` during the transaction; an abandoned send drops it
        let mut connection = match self.connection.take() {
            Some(connection) if !connection.has_broken() => connection,
            _ => {
                debug!(host = %self.inner.config.host, "smtp_session_rehandshake");
                self.inner
                    .handshake()
                    .await
                    .map_err(|e| SendError::ConnectionLost(e.to_string()))?
            }
        };

        match connection.send(mime.envelope(), &raw).await {
            Ok(_) => {
                self.connection = Some(connection);
                debug!(
                    recipient = %message.recipient(),
                    bytes = raw.len(),
                    "smtp_message_accepted"
                );
                Ok(())
            }
            Err(error) => {
                let failure = classify(&error);
                if !failure.is_connection_lost() {
                    self.connection = Some(connection);
                }

                warn!(
                    recipient = %message.recipient(),
                    error = %error,
                    connection_lost = failure.is_connection_lost(),
                    "smtp_message_failed"
                );

                Err(failure)
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(mut connection) = self.connection.take() {
            if !connection.has_broken() {
                if let Err(e) = connection.quit().await {
                    warn!(error = %e, "smtp_quit_failed");
                }
            }
        }

        info!(host = %self.inner.config.host, "smtp_session_closed");
    }
}

/// Map a lettre error onto the session error taxonomy.
fn classify(error: &SmtpError) -> SendError {
    // Raised before anything is written, so the connection is still clean
    if error.is_client() {
        return SendError::InvalidMessage(error.to_string());
    }

    let code = error.status().map(|code| code.to_string());

    let is_reply = error.is_transient() || error.is_permanent();
    if is_reply && code.as_deref() != Some(SERVICE_CLOSING) {
        return SendError::Rejected {
            code: code.unwrap_or_default(),
            detail: error.to_string(),
            permanent: error.is_permanent(),
        };
    }

    SendError::ConnectionLost(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(port: u16) -> TransportConfig {
        TransportConfig {
            host: "127.0.0.1".to_string(),
            port,
            encryption: Encryption::None,
            username: String::new(),
            password: String::new(),
            connect_timeout: Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn test_open_unreachable_relay_is_connection_error() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = SmtpConnector::new(config(port));
        let result = connector.open().await;

        assert!(matches!(result, Err(ConnectionError::Connect(_))));
    }

    /// Minimal plaintext relay: rejects recipients containing "reject" and
    /// drops the channel for recipients containing "closing".
    async fn spawn_fake_relay() -> (u16, Arc<std::sync::atomic::AtomicUsize>) {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connections);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);

                tokio::spawn(async move {
                    let (read, mut write) = stream.into_split();
                    let mut lines = BufReader::new(read).lines();
                    let mut in_data = false;

                    if write.write_all(b"220 fake.relay ESMTP\r\n").await.is_err() {
                        return;
                    }

                    while let Ok(Some(line)) = lines.next_line().await {
                        let line = line.trim_end_matches('\r').to_string();
                        if in_data {
                            if line == "." {
                                in_data = false;
                                let _ = write.write_all(b"250 2.0.0 queued\r\n").await;
                            }
                            continue;
                        }

                        let upper = line.to_ascii_uppercase();
                        let reply: &[u8] = if upper.starts_with("EHLO") || upper.starts_with("HELO") {
                            b"250 fake.relay\r\n"
                        } else if upper.starts_with("RCPT") && upper.contains("REJECT") {
                            b"550 5.1.1 mailbox unavailable\r\n"
                        } else if upper.starts_with("RCPT") && upper.contains("CLOSING") {
                            b"421 4.3.2 service shutting down\r\n"
                        } else if upper.starts_with("MAIL") || upper.starts_with("RCPT") || upper.starts_with("RSET") {
                            b"250 2.1.0 ok\r\n"
                        } else if upper.starts_with("DATA") {
                            in_data = true;
                            b"354 end with <CRLF>.<CRLF>\r\n"
                        } else if upper.starts_with("QUIT") {
                            let _ = write.write_all(b"221 2.0.0 bye\r\n").await;
                            return;
                        } else {
                            b"502 5.5.2 unrecognized\r\n"
                        };

                        if write.write_all(reply).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        (port, connections)
    }

    fn message_to(recipient: &str) -> OutboundMessage {
        use crate::extract::ValidatedAddress;
        use crate::message::{Identity, MessageBuilder, TemplateValues};

        let sender = Identity::new("Jane Doe", "jane@example.com").unwrap();
        MessageBuilder::new(sender, TemplateValues::new()).build(
            &ValidatedAddress::parse(recipient).unwrap(),
            "Hello",
            "Body",
            None,
        )
    }

    #[tokio::test]
    async fn test_rejection_keeps_session_usable() {
        let (port, connections) = spawn_fake_relay().await;
        let connector = SmtpConnector::new(config(port));

        let mut session = connector.open().await.unwrap();
        session.send(&message_to("first@example.com")).await.unwrap();

        let rejected = session.send(&message_to("reject@example.com")).await;
        match rejected {
            Err(SendError::Rejected { code, permanent, .. }) => {
                assert_eq!(code, "550");
                assert!(permanent);
            }
            other => panic!("expected rejection, got {:?}", other),
        }

        session.send(&message_to("second@example.com")).await.unwrap();
        session.close().await;
        session.close().await;

        assert!(connections.load(std::sync::atomic::Ordering::SeqCst) >= 1);
        assert!(matches!(
            session.send(&message_to("late@example.com")).await,
            Err(SendError::ConnectionLost(_))
        ));
    }

    #[tokio::test]
    async fn test_service_closing_is_connection_lost() {
        let (port, _) = spawn_fake_relay().await;
        let connector = SmtpConnector::new(config(port));

        let mut session = connector.open().await.unwrap();
        let result = session.send(&message_to("closing@example.com")).await;

        assert!(matches!(result, Err(SendError::ConnectionLost(_))));
        session.close().await;
    }

    #[tokio::test]
    async fn test_client_refusal_is_invalid_message() {
        use lettre::address::Envelope;

        let (port, _) = spawn_fake_relay().await;
        let connector = SmtpConnector::new(config(port));
        let mut session = connector.open().await.unwrap();

        // The fake relay does not advertise 8BITMIME
        let connection = session.connection.as_mut().unwrap();
        let envelope = Envelope::new(
            Some("jane@example.com".parse().unwrap()),
            vec!["bob@example.com".parse().unwrap()],
        )
        .unwrap();
        let error = connection
            .send(&envelope, "Subject: Résumé\r\n\r\nbody".as_bytes())
            .await
            .unwrap_err();

        assert!(error.is_client());
        assert!(matches!(classify(&error), SendError::InvalidMessage(_)));
        assert!(!connection.has_broken());

        session.send(&message_to("after@example.com")).await.unwrap();
        session.close().await;
    }

    #[test]
    fn test_debug_hides_password() {
        let mut config = config(25);
        config.password = "hunter2".to_string();
        let connector = SmtpConnector::new(config);

        assert!(!format!("{:?}", connector.config()).contains("hunter2"));
    }
}
