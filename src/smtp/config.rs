//! Module dedicated to the SMTP sender configuration.

use std::fmt;

use mail_send::Credentials;
use serde::{Deserialize, Serialize};

/// The SMTP sender configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SmtpConfig {
    /// The SMTP server host name.
    pub host: String,

    /// The SMTP server host port.
    pub port: u16,

    /// The SMTP encryption protocol to use.
    ///
    /// Supported encryption: SSL/TLS or STARTTLS.
    pub encryption: Option<SmtpEncryptionKind>,

    /// The SMTP server login, also used as the envelope sender.
    pub login: String,

    /// The SMTP server password.
    pub password: String,
}

impl SmtpConfig {
    /// Return `true` if TLS or StartTLS is enabled.
    pub fn is_encryption_enabled(&self) -> bool {
        !matches!(self.encryption, Some(SmtpEncryptionKind::None))
    }

    /// Return `true` if StartTLS is enabled.
    pub fn is_start_tls_encryption_enabled(&self) -> bool {
        matches!(self.encryption, Some(SmtpEncryptionKind::StartTls))
    }

    /// Builds the SMTP credentials from login and password.
    pub fn credentials(&self) -> Credentials<String> {
        Credentials::new(self.login.clone(), self.password.clone())
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SmtpEncryptionKind {
    #[default]
    #[serde(alias = "ssl")]
    Tls,
    #[serde(alias = "starttls")]
    StartTls,
    None,
}

impl fmt::Display for SmtpEncryptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tls => write!(f, "SSL/TLS"),
            Self::StartTls => write!(f, "StartTLS"),
            Self::None => write!(f, "None"),
        }
    }
}

impl From<bool> for SmtpEncryptionKind {
    /// Map the `USE_SSL` switch: `true` is implicit TLS, `false` is
    /// STARTTLS. Both are encrypted.
    fn from(use_ssl: bool) -> Self {
        if use_ssl {
            Self::Tls
        } else {
            Self::StartTls
        }
    }
}
