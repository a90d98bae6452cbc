//! Module dedicated to the command line surface.

use std::path::PathBuf;

use clap::Parser;

/// RFQ batch mailer with templated cover letters, inline logo and a
/// resumable send log.
#[derive(Debug, Parser)]
#[command(name = "rfq-mailer", version, about)]
pub struct Cli {
    /// Path to the contacts CSV (email,name,gender,company).
    #[arg(long, value_name = "PATH", required_unless_present = "retry_from_log")]
    pub contacts: Option<PathBuf>,

    /// Path to the cover letter template.
    #[arg(long, value_name = "PATH")]
    pub letter: PathBuf,

    /// Path to the static spreadsheet attached to every message.
    #[arg(long, value_name = "PATH")]
    pub spreadsheet: PathBuf,

    /// Retry the failures recorded in a prior run ledger instead of
    /// loading contacts.
    #[arg(long, value_name = "PATH", conflicts_with = "contacts")]
    pub retry_from_log: Option<PathBuf>,

    /// Process only the first N recipients.
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,

    /// Run the full pipeline without delivering anything.
    #[arg(long, conflicts_with = "preview")]
    pub dry_run: bool,

    /// Compose the first N messages to .eml files instead of sending.
    #[arg(long, value_name = "N")]
    pub preview: Option<usize>,

    /// Directory for preview .eml files.
    #[arg(long, value_name = "DIR", default_value = "preview")]
    pub eml_out: PathBuf,

    /// Directory where run ledgers are written.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub log_dir: PathBuf,

    /// Write the latest-status-per-recipient summary to this path
    /// after the run.
    #[arg(long, value_name = "PATH")]
    pub status_out: Option<PathBuf>,
}
