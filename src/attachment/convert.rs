//! Module dedicated to cover letter conversion.
//!
//! The rendered letter is converted to its portable document format by
//! a headless LibreOffice found on PATH. The backend is located once
//! per run; a missing backend surfaces as a per-attempt conversion
//! error, not a startup failure.

use std::{env, fs, path::PathBuf, process::Stdio};

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use super::{AttachFormat, Attachment};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot find a document conversion backend (soffice or libreoffice) on PATH")]
    MissingBackendError,
    #[error("cannot create conversion work directory")]
    CreateWorkDirError(#[source] std::io::Error),
    #[error("cannot write rendered letter to conversion work directory")]
    WriteLetterError(#[source] std::io::Error),
    #[error("cannot run document conversion backend")]
    RunBackendError(#[source] std::io::Error),
    #[error("document conversion backend exited with status {0}: {1}")]
    BackendFailedError(i32, String),
    #[error("document conversion backend produced no {1} output for {0}")]
    MissingOutputError(String, AttachFormat),
    #[error("cannot read converted letter")]
    ReadOutputError(#[source] std::io::Error),
}

/// The external document conversion backend.
pub struct DocumentConverter {
    program: Option<PathBuf>,
}

impl DocumentConverter {
    /// Build a converter around an explicit backend executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
        }
    }

    /// Locate the conversion backend on PATH.
    pub fn detect() -> Self {
        let program = find_program("soffice").or_else(|| find_program("libreoffice"));

        match &program {
            Some(program) => debug!("using document conversion backend at {}", program.display()),
            None => debug!("no document conversion backend found on PATH"),
        }

        Self { program }
    }

    /// Convert the rendered letter into the configured format.
    ///
    /// The letter is staged in a temporary work directory which is
    /// removed when the conversion is done, successful or not.
    pub async fn convert(
        &self,
        letter: &str,
        company: &str,
        format: AttachFormat,
    ) -> Result<Attachment> {
        let program = self.program.as_ref().ok_or(Error::MissingBackendError)?;

        let workdir = tempfile::tempdir().map_err(Error::CreateWorkDirError)?;
        let base = format!("Cover_Letter_{}", company.replace(' ', "_"));
        let input = workdir.path().join(format!("{base}.html"));
        fs::write(&input, letter).map_err(Error::WriteLetterError)?;

        let output = Command::new(program)
            .arg("--headless")
            .arg("--convert-to")
            .arg(format.extension())
            .arg("--outdir")
            .arg(workdir.path())
            .arg(&input)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(Error::RunBackendError)?;

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            return Err(Error::BackendFailedError(code, stderr));
        }

        let filename = format!("{base}.{}", format.extension());
        let converted = workdir.path().join(&filename);
        if !converted.exists() {
            return Err(Error::MissingOutputError(base, format));
        }

        let bytes = fs::read(&converted).map_err(Error::ReadOutputError)?;
        debug!("converted letter to {filename} ({} bytes)", bytes.len());

        Ok(Attachment {
            filename,
            mime_type: format.mime_type().to_owned(),
            bytes,
        })
    }
}

fn find_program(name: &str) -> Option<PathBuf> {
    let file = format!("{name}{}", env::consts::EXE_SUFFIX);
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(&file))
        .find(|candidate| candidate.is_file())
}
