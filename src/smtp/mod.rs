//! Module dedicated to the SMTP delivery engine.
//!
//! One authenticated, encrypted session is opened per run and reused
//! for every recipient. Authentication failure is fatal for the whole
//! run; a rejection of one message is a per-message failure the batch
//! survives.

pub mod config;

use std::time::Duration;

use mail_send::{
    smtp::message::{Address, IntoMessage, Message as SmtpMessage},
    SmtpClientBuilder,
};
use thiserror::Error;
use tokio::{net::TcpStream, time::sleep};
use tokio_rustls::client::TlsStream;
use tracing::{debug, info};

use crate::{ledger::AttemptStatus, message::ComposedMessage};

use self::config::SmtpConfig;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot authenticate to smtp server")]
    AuthenticationFailedError(#[source] mail_send::Error),
    #[error("cannot connect to smtp server using tcp")]
    ConnectTcpError(#[source] mail_send::Error),
    #[error("cannot connect to smtp server using tls")]
    ConnectTlsError(#[source] mail_send::Error),
}

/// Outcome of one delivery attempt, classified for the run ledger.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeliveryOutcome {
    pub status: AttemptStatus,
    pub message_id: Option<String>,
    pub error_detail: Option<String>,
}

impl DeliveryOutcome {
    pub fn sent(message_id: impl Into<String>) -> Self {
        Self {
            status: AttemptStatus::Sent,
            message_id: Some(message_id.into()),
            error_detail: None,
        }
    }

    pub fn failed(detail: impl ToString) -> Self {
        Self {
            status: AttemptStatus::Failed,
            message_id: None,
            error_detail: Some(detail.to_string()),
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: AttemptStatus::Skipped,
            message_id: None,
            error_detail: None,
        }
    }
}

/// The SMTP client stream.
///
/// STARTTLS and implicit TLS both end up on a TLS stream; the plain
/// TCP variant only exists for servers with encryption disabled.
pub enum SmtpClientStream {
    Tcp(mail_send::SmtpClient<TcpStream>),
    Tls(mail_send::SmtpClient<TlsStream<TcpStream>>),
}

impl SmtpClientStream {
    pub async fn send(&mut self, msg: impl IntoMessage<'_>) -> mail_send::Result<()> {
        match self {
            Self::Tcp(client) => client.send(msg).await,
            Self::Tls(client) => client.send(msg).await,
        }
    }
}

/// An authenticated SMTP session, scoped to one run.
///
/// Exclusively owned by the orchestrator for the run's duration and
/// closed on every exit path. Dropping the session closes the
/// underlying stream.
pub struct SmtpSession {
    config: SmtpConfig,
    pacing: Duration,
    client: SmtpClientStream,
}

impl SmtpSession {
    /// Open and authenticate the session.
    ///
    /// An authentication failure surfaces here, before any message is
    /// composed, and must abort the run.
    pub async fn connect(config: SmtpConfig, pacing: Duration) -> Result<Self> {
        info!("opening smtp session to {}:{}", config.host, config.port);

        let client_builder = SmtpClientBuilder::new(config.host.clone(), config.port)
            .credentials(config.credentials())
            .implicit_tls(!config.is_start_tls_encryption_enabled())
            .timeout(Duration::from_secs(60));

        let client = if config.is_encryption_enabled() {
            match client_builder.connect().await {
                Ok(client) => SmtpClientStream::Tls(client),
                Err(err @ mail_send::Error::AuthenticationFailed(_)) => {
                    return Err(Error::AuthenticationFailedError(err))
                }
                Err(err) => return Err(Error::ConnectTlsError(err)),
            }
        } else {
            match client_builder.connect_plain().await {
                Ok(client) => SmtpClientStream::Tcp(client),
                Err(err @ mail_send::Error::AuthenticationFailed(_)) => {
                    return Err(Error::AuthenticationFailedError(err))
                }
                Err(err) => return Err(Error::ConnectTcpError(err)),
            }
        };

        Ok(Self {
            config,
            pacing,
            client,
        })
    }

    /// Send one composed message and classify the outcome.
    ///
    /// `Ok` covers both acknowledged and rejected messages; `Err` is
    /// reserved for the fatal authentication case, which means every
    /// remaining send would fail the same way.
    pub async fn send(&mut self, msg: &ComposedMessage) -> Result<DeliveryOutcome> {
        debug!("smtp: sending message {} to {}", msg.message_id, msg.to);

        let smtp_msg = SmtpMessage {
            mail_from: self.config.login.clone().into(),
            rcpt_to: vec![Address {
                email: msg.to.clone().into(),
                ..Default::default()
            }],
            body: msg.raw.as_slice().into(),
        };

        match self.client.send(smtp_msg).await {
            Ok(()) => Ok(DeliveryOutcome::sent(msg.message_id.clone())),
            Err(err @ mail_send::Error::AuthenticationFailed(_)) => {
                Err(Error::AuthenticationFailedError(err))
            }
            Err(err) => Ok(DeliveryOutcome::failed(err)),
        }
    }

    /// Fixed pacing between sends, applied regardless of outcome.
    pub async fn pause(&self) {
        debug!("pausing {:?} before next delivery", self.pacing);
        sleep(self.pacing).await;
    }

    /// Close the session.
    pub fn close(self) {
        debug!("closing smtp session to {}", self.config.host);
    }
}
