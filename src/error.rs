use thiserror::Error;

/// The global `Error` enum of the crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    ConfigError(#[from] crate::config::Error),

    #[error(transparent)]
    ContactError(#[from] crate::contact::Error),

    #[error(transparent)]
    RenderError(#[from] crate::template::Error),

    #[error(transparent)]
    AttachmentError(#[from] crate::attachment::Error),

    #[error(transparent)]
    ComposeError(#[from] crate::message::Error),

    #[error(transparent)]
    TransportError(#[from] crate::smtp::Error),

    #[error(transparent)]
    LedgerError(#[from] crate::ledger::Error),

    #[error(transparent)]
    BatchError(#[from] crate::batch::Error),
}

/// The global `Result` alias of the crate.
pub type Result<T> = std::result::Result<T, Error>;
