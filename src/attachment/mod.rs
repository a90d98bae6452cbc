//! Module dedicated to the attachment set.
//!
//! Every message carries exactly two attachments, in a stable order:
//! the cover letter converted to the configured document format, then
//! the static spreadsheet. The spreadsheet is read once per run and
//! reused unchanged for every recipient.

pub mod convert;

use std::{ffi::OsStr, fmt, fs, path::{Path, PathBuf}, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use self::convert::DocumentConverter;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read attachment at {1}")]
    ReadAttachmentError(#[source] std::io::Error, PathBuf),
    #[error(transparent)]
    ConvertLetterError(#[from] convert::Error),
}

/// The document format of the converted cover letter.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachFormat {
    #[default]
    Pdf,
    Docx,
}

impl AttachFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }
}

impl fmt::Display for AttachFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl FromStr for AttachFormat {
    type Err = UnknownAttachFormatError;

    fn from_str(format: &str) -> std::result::Result<Self, Self::Err> {
        match format {
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            _ => Err(UnknownAttachFormatError(format.to_owned())),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("unknown attachment format {0:?}, expected pdf or docx")]
pub struct UnknownAttachFormatError(pub String);

/// A single transport-ready attachment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    /// Read a static attachment from disk, keeping its file name.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let bytes = fs::read(&path).map_err(|err| Error::ReadAttachmentError(err, path.clone()))?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".into());
        let mime_type = guess_mime_type(&path, &bytes);

        Ok(Self {
            filename,
            mime_type,
            bytes,
        })
    }
}

/// Resolve a MIME type from the file extension, sniffing the content
/// as a fallback for anything outside the known set.
pub fn guess_mime_type(path: &Path, bytes: &[u8]) -> String {
    let extension = path
        .extension()
        .and_then(OsStr::to_str)
        .map(str::to_lowercase);

    match extension.as_deref() {
        Some("pdf") => "application/pdf".into(),
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document".into()
        }
        Some("xlsx") => {
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet".into()
        }
        Some("xls") => "application/vnd.ms-excel".into(),
        Some("html") | Some("htm") => "text/html".into(),
        Some("png") => "image/png".into(),
        Some("jpg") | Some("jpeg") => "image/jpeg".into(),
        Some("gif") => "image/gif".into(),
        Some("txt") => "text/plain".into(),
        Some("csv") => "text/csv".into(),
        _ => tree_magic_mini::from_u8(bytes).to_owned(),
    }
}

/// Build the fixed two-entry attachment set for one recipient.
///
/// A conversion failure aborts only this recipient's attempt, never
/// the run.
pub async fn build(
    converter: &DocumentConverter,
    letter: &str,
    company: &str,
    format: AttachFormat,
    spreadsheet: &Attachment,
) -> Result<Vec<Attachment>> {
    let letter = converter.convert(letter, company, format).await?;
    Ok(vec![letter, spreadsheet.clone()])
}
