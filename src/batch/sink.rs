//! Module dedicated to delivery sinks.
//!
//! The orchestrator hands every composed message to a sink. The live
//! implementation is the SMTP session; dry-run and preview substitute
//! sinks with no transport behind them, so the rest of the pipeline
//! runs unchanged.

use std::{fs, path::PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::{
    message::ComposedMessage,
    smtp::{DeliveryOutcome, SmtpSession},
};

use super::Error;

/// Where composed messages end up.
///
/// An `Err` from a sink means the sink itself is broken and every
/// remaining delivery would fail the same way: the orchestrator
/// aborts the run. Per-message rejections travel inside the returned
/// [`DeliveryOutcome`].
#[async_trait]
pub trait MessageSink {
    async fn deliver(&mut self, msg: &ComposedMessage) -> crate::Result<DeliveryOutcome>;
}

#[async_trait]
impl MessageSink for SmtpSession {
    async fn deliver(&mut self, msg: &ComposedMessage) -> crate::Result<DeliveryOutcome> {
        let outcome = self.send(msg).await?;
        self.pause().await;
        Ok(outcome)
    }
}

/// Dry-run sink: the full pipeline runs, nothing is delivered.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

#[async_trait]
impl MessageSink for NoopSink {
    async fn deliver(&mut self, msg: &ComposedMessage) -> crate::Result<DeliveryOutcome> {
        info!("dry run: would send {:?} to {}", msg.subject, msg.to);
        Ok(DeliveryOutcome::skipped())
    }
}

/// Preview sink: serializes composed messages to `.eml` files.
#[derive(Clone, Debug)]
pub struct EmlSink {
    dir: PathBuf,
    seq: usize,
}

impl EmlSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seq: 0,
        }
    }
}

#[async_trait]
impl MessageSink for EmlSink {
    async fn deliver(&mut self, msg: &ComposedMessage) -> crate::Result<DeliveryOutcome> {
        fs::create_dir_all(&self.dir)
            .map_err(|err| Error::CreatePreviewDirError(err, self.dir.clone()))?;

        self.seq += 1;
        let filename = format!("{:03}_{}.eml", self.seq, msg.to.replace('@', "_at_"));
        let path = self.dir.join(filename);
        fs::write(&path, &msg.raw).map_err(|err| Error::WritePreviewError(err, path.clone()))?;

        info!("preview written to {}", path.display());

        Ok(DeliveryOutcome::skipped())
    }
}
