//! Module dedicated to the run configuration.
//!
//! Configuration comes from environment variables, with a `.env` file
//! honored when present. Everything is loaded and validated before
//! any send is attempted: a broken configuration aborts the run with
//! a non-zero exit, it never fails recipient by recipient.

use std::{env, fmt, path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;

use crate::{
    attachment::AttachFormat,
    smtp::config::{SmtpConfig, SmtpEncryptionKind},
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("missing required environment variable {0}")]
    MissingVarError(&'static str),
    #[error("cannot parse environment variable {0}: {1}")]
    ParseVarError(&'static str, String),
    #[error("--contacts is required when not retrying from a log")]
    MissingContactsArgError,
}

pub const DEFAULT_SUBJECT_TEMPLATE: &str = "RFQ for {company} - documents attached";

/// The finalized run configuration.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub smtp: SmtpConfig,
    /// Display name of the sender, defaults to the SMTP login.
    pub from_name: String,
    /// Reply-To address, defaults to the SMTP login.
    pub reply_to: String,
    pub subject_template: String,
    /// Quote deadline; a template referencing `{deadline}` without it
    /// set is a render error.
    pub deadline: Option<String>,
    /// Path to the HTML body template.
    pub body_template_path: PathBuf,
    pub logo_path: Option<PathBuf>,
    /// Fixed pause between sends.
    pub sleep: Duration,
    /// Attempt cap per recipient across a retry chain.
    pub max_retries: u32,
    pub attach_format: AttachFormat,
    pub request_receipt: bool,
}

impl RunConfig {
    /// Load and validate the configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let host = require("SMTP_HOST")?;
        let port = parse_var("SMTP_PORT", 587u16)?;
        let use_ssl = parse_bool("USE_SSL", false)?;
        let login = require("SMTP_USER")?;
        let password = require("SMTP_PASSWORD")?;

        let smtp = SmtpConfig {
            host,
            port,
            encryption: Some(SmtpEncryptionKind::from(use_ssl)),
            login: login.clone(),
            password,
        };

        // values below 1 make no sense, fall back to the default cap
        let max_retries = match parse_var("MAX_RETRIES", 3u32)? {
            0 => 3,
            cap => cap,
        };

        let attach_format = match optional("ATTACH_FORMAT") {
            Some(raw) => raw
                .to_lowercase()
                .parse()
                .map_err(|err: crate::attachment::UnknownAttachFormatError| {
                    Error::ParseVarError("ATTACH_FORMAT", err.to_string())
                })?,
            None => AttachFormat::default(),
        };

        Ok(Self {
            smtp,
            from_name: optional("FROM_NAME").unwrap_or_else(|| login.clone()),
            reply_to: optional("REPLY_TO").unwrap_or_else(|| login.clone()),
            subject_template: optional("SUBJECT_TEMPLATE")
                .unwrap_or_else(|| DEFAULT_SUBJECT_TEMPLATE.to_owned()),
            deadline: optional("DEADLINE"),
            body_template_path: PathBuf::from(require("EMAIL_BODY_HTML_TEMPLATE")?),
            logo_path: optional("LOGO_PATH").map(PathBuf::from),
            sleep: Duration::from_secs_f64(parse_var("SLEEP_SECONDS", 1.0f64)?),
            max_retries,
            attach_format,
            request_receipt: parse_bool("REQUEST_RECEIPT", true)?,
        })
    }
}

fn optional(name: &'static str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn require(name: &'static str) -> Result<String> {
    optional(name).ok_or(Error::MissingVarError(name))
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T>
where
    T::Err: fmt::Display,
{
    match optional(name) {
        Some(raw) => raw
            .parse()
            .map_err(|err: T::Err| Error::ParseVarError(name, err.to_string())),
        None => Ok(default),
    }
}

fn parse_bool(name: &'static str, default: bool) -> Result<bool> {
    match optional(name) {
        Some(raw) => match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            other => Err(Error::ParseVarError(
                name,
                format!("expected a boolean, got {other:?}"),
            )),
        },
        None => Ok(default),
    }
}
