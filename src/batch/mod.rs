//! Module dedicated to run orchestration.
//!
//! Drives the per-recipient pipeline (render, attach, compose,
//! deliver, record) and the retry state machine. Each recipient makes
//! exactly one attempt per run; the attempt cap binds across runs
//! through the ledgers handed to retry mode.

pub mod sink;

use std::{fs, io, path::{Path, PathBuf}};

use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    attachment::{self, convert::DocumentConverter, Attachment},
    config::RunConfig,
    contact::{Contact, Gender},
    ledger::{self, AttemptStatus, DeliveryAttempt, LedgerWriter},
    message::{self, ComposeOptions, ComposedMessage},
    smtp::DeliveryOutcome,
    template::{self, Rendered, TokenStyle, Tokens, BODY_TOKENS, LETTER_TOKENS, SUBJECT_TOKENS},
};

use self::sink::MessageSink;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read template at {1}")]
    ReadTemplateError(#[source] io::Error, PathBuf),
    #[error("cannot create preview directory at {1}")]
    CreatePreviewDirError(#[source] io::Error, PathBuf),
    #[error("cannot write preview message at {1}")]
    WritePreviewError(#[source] io::Error, PathBuf),
    #[error("cannot write status summary at {1}")]
    WriteStatusError(#[source] csv::Error, PathBuf),
    #[error("cannot flush status summary at {1}")]
    FlushStatusError(#[source] io::Error, PathBuf),
}

/// Everything fixed for the duration of one run.
///
/// Passed explicitly through the pipeline; there is no ambient run
/// state. `today` binds to run start, so every letter of one run
/// carries the same date even when the batch stretches past midnight.
pub struct RunContext {
    pub config: RunConfig,
    pub started_at: DateTime<Local>,
    /// Invocation date, rendered once per run.
    pub today: String,
    pub body_template: String,
    pub letter_template: String,
    /// Static spreadsheet, read once and reused for every recipient.
    pub spreadsheet: Attachment,
    pub logo: Option<Attachment>,
    /// Content id the inline logo is keyed by for this run.
    pub logo_cid: String,
    pub converter: DocumentConverter,
}

impl RunContext {
    /// Load the fixed per-run inputs, failing fast on anything broken.
    ///
    /// An unusable logo is the one exception: it is reported here,
    /// eagerly, and the run proceeds without the inline image.
    pub fn prepare(
        config: RunConfig,
        letter_path: &Path,
        spreadsheet_path: &Path,
    ) -> crate::Result<Self> {
        let started_at = Local::now();
        let today = started_at.format("%m/%d/%Y").to_string();

        let body_template = fs::read_to_string(&config.body_template_path)
            .map_err(|err| Error::ReadTemplateError(err, config.body_template_path.clone()))?;
        let letter_template = fs::read_to_string(letter_path)
            .map_err(|err| Error::ReadTemplateError(err, letter_path.to_owned()))?;

        let spreadsheet = Attachment::from_path(spreadsheet_path)?;

        let logo = match &config.logo_path {
            Some(path) => match Attachment::from_path(path) {
                Ok(logo) => Some(logo),
                Err(err) => {
                    warn!("logo is unusable, sending without inline image: {err}");
                    None
                }
            },
            None => None,
        };

        let logo_cid = format!(
            "logo.{}@{}",
            started_at.format("%Y%m%d%H%M%S"),
            config.smtp.host,
        );

        Ok(Self {
            config,
            started_at,
            today,
            body_template,
            letter_template,
            spreadsheet,
            logo,
            logo_cid,
            converter: DocumentConverter::detect(),
        })
    }

    fn tokens_for(&self, contact: &Contact) -> Tokens {
        let mut tokens = Tokens::new();
        tokens.insert("salutation", contact.salutation());
        tokens.insert("company", contact.company.clone());
        if let Some(deadline) = &self.config.deadline {
            tokens.insert("deadline", deadline.clone());
        }
        tokens.insert("from_name", self.config.from_name.clone());
        tokens.insert("reply_to", self.config.reply_to.clone());
        tokens.insert("today", self.today.clone());
        tokens.insert("logo_cid", format!("cid:{}", self.logo_cid));
        tokens
    }

    /// Render subject, body and letter for one recipient.
    pub fn render(&self, contact: &Contact) -> template::Result<Rendered> {
        let tokens = self.tokens_for(contact);

        Ok(Rendered {
            subject: template::expand(
                &self.config.subject_template,
                TokenStyle::SingleBrace,
                SUBJECT_TOKENS,
                &tokens,
            )?,
            html_body: template::expand(
                &self.body_template,
                TokenStyle::SingleBrace,
                BODY_TOKENS,
                &tokens,
            )?,
            letter: template::expand(
                &self.letter_template,
                TokenStyle::DoubleBrace,
                LETTER_TOKENS,
                &tokens,
            )?,
        })
    }
}

/// One recipient queued for this run, with the attempts already spent
/// in its retry chain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Queued {
    pub contact: Contact,
    pub prev_attempts: u32,
}

impl From<Contact> for Queued {
    fn from(contact: Contact) -> Self {
        Self {
            contact,
            prev_attempts: 0,
        }
    }
}

/// Tally of one run, plus every attempt it recorded.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunReport {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub attempts: Vec<DeliveryAttempt>,
}

/// Drive the per-recipient pipeline over a queued batch.
///
/// Every terminal outcome is appended and flushed to the ledger
/// before the next recipient starts. Render, attachment and
/// per-message transport errors mark the recipient failed and the
/// batch continues; an error from the sink itself aborts the run with
/// all rows recorded so far intact.
pub async fn run(
    ctx: &RunContext,
    queue: Vec<Queued>,
    sink: &mut dyn MessageSink,
    mut ledger: Option<&mut LedgerWriter>,
) -> crate::Result<RunReport> {
    let mut report = RunReport::default();

    for queued in queue {
        let contact = &queued.contact;
        let attempt_number = queued.prev_attempts + 1;

        let outcome = match compose_for(ctx, contact).await {
            Ok(msg) => match sink.deliver(&msg).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!("aborting run, delivery sink is broken: {err}");
                    return Err(err);
                }
            },
            Err(err) => {
                warn!("{}: attempt {attempt_number} failed before delivery: {err}", contact.email);
                DeliveryOutcome::failed(err)
            }
        };

        let row = DeliveryAttempt::record(
            contact,
            attempt_number,
            outcome.status,
            outcome.message_id,
            outcome.error_detail,
        );

        if let Some(ledger) = ledger.as_deref_mut() {
            ledger.append(&row)?;
        }

        match row.status {
            AttemptStatus::Sent => {
                report.sent += 1;
                info!("sent to {} [{}]", row.email, row.message_id.as_deref().unwrap_or_default());
            }
            AttemptStatus::Failed => {
                report.failed += 1;
                if attempt_number >= ctx.config.max_retries {
                    warn!("{} exhausted after {attempt_number} attempts", row.email);
                }
            }
            AttemptStatus::Skipped => report.skipped += 1,
        }

        report.attempts.push(row);
    }

    Ok(report)
}

/// Render, build attachments and compose for one recipient.
///
/// Any error here is scoped to this recipient's attempt.
async fn compose_for(ctx: &RunContext, contact: &Contact) -> crate::Result<ComposedMessage> {
    let rendered = ctx.render(contact)?;

    let attachments = attachment::build(
        &ctx.converter,
        &rendered.letter,
        &contact.company,
        ctx.config.attach_format,
        &ctx.spreadsheet,
    )
    .await?;

    let opts = ComposeOptions {
        from_name: &ctx.config.from_name,
        from_addr: &ctx.config.smtp.login,
        reply_to: &ctx.config.reply_to,
        request_receipt: ctx.config.request_receipt,
        logo: ctx.logo.as_ref(),
        logo_cid: &ctx.logo_cid,
    };

    Ok(message::compose(&rendered, &attachments, &contact.email, &opts)?)
}

#[derive(Debug, Serialize)]
struct StatusRow<'a> {
    email: &'a str,
    name: &'a str,
    gender: Gender,
    company: &'a str,
    last_status: AttemptStatus,
    attempt_number: u32,
    message_id: Option<&'a str>,
    error_detail: Option<&'a str>,
}

/// Write the latest-status-per-recipient summary derived from this
/// run's attempts.
pub fn write_status_summary(path: impl AsRef<Path>, attempts: &[DeliveryAttempt]) -> Result<()> {
    let path = path.as_ref();
    let mut writer =
        csv::Writer::from_path(path).map_err(|err| Error::WriteStatusError(err, path.to_owned()))?;

    for state in ledger::fold_latest(attempts) {
        writer
            .serialize(StatusRow {
                email: &state.contact.email,
                name: &state.contact.name,
                gender: state.contact.gender,
                company: &state.contact.company,
                last_status: state.latest,
                attempt_number: state.attempts,
                message_id: state.message_id.as_deref(),
                error_detail: state.last_error.as_deref(),
            })
            .map_err(|err| Error::WriteStatusError(err, path.to_owned()))?;
    }

    writer
        .flush()
        .map_err(|err| Error::FlushStatusError(err, path.to_owned()))?;

    Ok(())
}
