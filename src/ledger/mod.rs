//! Module dedicated to the run ledger.
//!
//! The ledger is the append-only audit trail of a run and the source
//! of truth for retries: one CSV row per delivery attempt, flushed as
//! soon as it is written, never mutated afterwards. Reading and
//! folding a ledger are pure so a retry chain can be reconstructed
//! deterministically, however often the file is read.

use std::{
    collections::HashMap,
    fs::File,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::contact::{Contact, Gender};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot create run ledger at {1}")]
    CreateLedgerError(#[source] csv::Error, PathBuf),
    #[error("cannot append attempt to run ledger")]
    AppendAttemptError(#[source] csv::Error),
    #[error("cannot flush run ledger")]
    FlushLedgerError(#[source] std::io::Error),
    #[error("cannot open run ledger at {1}")]
    OpenLedgerError(#[source] csv::Error, PathBuf),
}

/// Terminal status of one delivery attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Sent,
    Failed,
    Skipped,
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sent => write!(f, "sent"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// One run ledger row. Append-only, never mutated after write.
///
/// The recipient personalization columns ride along so a prior ledger
/// is a complete retry source on its own.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub email: String,
    pub name: String,
    pub gender: Gender,
    pub company: String,
    pub attempt_number: u32,
    pub timestamp: DateTime<Utc>,
    pub status: AttemptStatus,
    pub message_id: Option<String>,
    pub error_detail: Option<String>,
}

impl DeliveryAttempt {
    /// Record one terminal attempt outcome for a contact, stamped now.
    pub fn record(
        contact: &Contact,
        attempt_number: u32,
        status: AttemptStatus,
        message_id: Option<String>,
        error_detail: Option<String>,
    ) -> Self {
        Self {
            email: contact.email.clone(),
            name: contact.name.clone(),
            gender: contact.gender,
            company: contact.company.clone(),
            attempt_number,
            timestamp: Utc::now(),
            status,
            message_id,
            error_detail,
        }
    }

    /// Rebuild the contact this row was recorded for.
    pub fn contact(&self) -> Contact {
        Contact {
            email: self.email.clone(),
            name: self.name.clone(),
            gender: self.gender,
            company: self.company.clone(),
        }
    }
}

/// Exclusive append handle over one run's ledger file.
///
/// Owned by the orchestrator for the duration of the run.
pub struct LedgerWriter {
    writer: csv::Writer<File>,
    path: PathBuf,
}

impl LedgerWriter {
    /// Create the ledger file for a run started at `started_at`.
    ///
    /// The file name encodes the run start time, one file per run.
    pub fn create(dir: impl AsRef<Path>, started_at: DateTime<Local>) -> Result<Self> {
        let filename = format!("send_log_{}.csv", started_at.format("%Y%m%d_%H%M%S"));
        let path = dir.as_ref().join(filename);
        let writer =
            csv::Writer::from_path(&path).map_err(|err| Error::CreateLedgerError(err, path.clone()))?;

        debug!("created run ledger at {}", path.display());

        Ok(Self { writer, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one attempt row and flush it to disk.
    ///
    /// Flushing per row keeps every written row self-contained, so an
    /// interrupted run loses at most the attempt in flight.
    pub fn append(&mut self, attempt: &DeliveryAttempt) -> Result<()> {
        self.writer.serialize(attempt).map_err(Error::AppendAttemptError)?;
        self.writer.flush().map_err(Error::FlushLedgerError)?;
        Ok(())
    }

    /// Flush and finalize the ledger.
    ///
    /// Consuming the writer makes a second close impossible; skipping
    /// it on abnormal termination cannot corrupt rows already flushed.
    pub fn close(mut self) -> Result<()> {
        self.writer.flush().map_err(Error::FlushLedgerError)?;
        debug!("closed run ledger at {}", self.path.display());
        Ok(())
    }
}

/// Read every attempt row of a prior ledger.
///
/// Pure apart from the read itself. A torn trailing row left by an
/// interrupted run is skipped with a warning instead of failing the
/// whole read.
pub fn read(path: impl AsRef<Path>) -> Result<Vec<DeliveryAttempt>> {
    let path = path.as_ref();
    let mut reader =
        csv::Reader::from_path(path).map_err(|err| Error::OpenLedgerError(err, path.to_owned()))?;

    let mut attempts = Vec::new();
    for row in reader.deserialize() {
        match row {
            Ok(attempt) => attempts.push(attempt),
            Err(err) => warn!("skipping unreadable ledger row: {err}"),
        }
    }

    Ok(attempts)
}

/// Latest known state of one recipient's retry chain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChainState {
    pub contact: Contact,
    /// Highest attempt number seen for this recipient.
    pub attempts: u32,
    /// Status of that highest-numbered attempt.
    pub latest: AttemptStatus,
    pub message_id: Option<String>,
    pub last_error: Option<String>,
}

/// Fold ledger rows into the latest state per recipient.
///
/// Recipients keep their first-appearance order; emails compare
/// case-insensitively. Folding the same rows always yields the same
/// view.
pub fn fold_latest(rows: &[DeliveryAttempt]) -> Vec<ChainState> {
    let mut order = Vec::new();
    let mut states: HashMap<String, ChainState> = HashMap::new();

    for row in rows {
        let key = row.email.to_lowercase();
        let state = states.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            ChainState {
                contact: row.contact(),
                attempts: 0,
                latest: row.status,
                message_id: None,
                last_error: None,
            }
        });

        if row.attempt_number >= state.attempts {
            state.attempts = row.attempt_number;
            state.latest = row.status;
            state.message_id = row.message_id.clone();
            state.last_error = row.error_detail.clone().or_else(|| state.last_error.take());
        }
    }

    order
        .into_iter()
        .filter_map(|key| states.remove(&key))
        .collect()
}

/// A retry batch computed from a prior ledger.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RetryPlan {
    /// Recipients due another attempt, with the attempts already spent
    /// in their chain.
    pub due: Vec<(Contact, u32)>,
    /// Recipients whose chain hit the attempt cap, reported but never
    /// retried.
    pub exhausted: Vec<ChainState>,
}

/// Select the recipients a retry run may attempt again.
///
/// A recipient whose latest status is `sent` or `skipped` is never
/// re-selected; a still-failing recipient at the cap is exhausted.
pub fn plan_retries(states: Vec<ChainState>, max_retries: u32) -> RetryPlan {
    let mut plan = RetryPlan::default();

    for state in states {
        if state.latest != AttemptStatus::Failed {
            continue;
        }
        if state.attempts < max_retries {
            plan.due.push((state.contact.clone(), state.attempts));
        } else {
            plan.exhausted.push(state);
        }
    }

    plan
}
