//! Module dedicated to message composition.
//!
//! Assembles a transport-ready MIME message for one recipient: text
//! and HTML alternatives, the inline logo referenced by the run's
//! content id, the two attachments, and the delivery-receipt request
//! headers. Pure given its inputs, except for the generated
//! Message-ID.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use mail_builder::{
    headers::{address::Address, text::Text},
    MessageBuilder,
};
use nanohtml2text::html2text;
use thiserror::Error;

use crate::{attachment::Attachment, template::Rendered};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot write composed message")]
    WriteMessageError(#[source] std::io::Error),
}

/// Per-run inputs of the composer that do not vary by recipient.
#[derive(Clone, Copy, Debug)]
pub struct ComposeOptions<'a> {
    pub from_name: &'a str,
    pub from_addr: &'a str,
    pub reply_to: &'a str,
    pub request_receipt: bool,
    pub logo: Option<&'a Attachment>,
    /// The content id the body template's `logo_cid` token resolved to.
    pub logo_cid: &'a str,
}

/// A fully assembled, transport-ready email.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ComposedMessage {
    pub to: String,
    pub subject: String,
    pub message_id: String,
    pub raw: Vec<u8>,
}

static MESSAGE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Generate a unique Message-ID scoped to the sender domain.
pub fn generate_message_id(from_addr: &str) -> String {
    let domain = from_addr.split_once('@').map(|(_, domain)| domain).unwrap_or("localhost");
    let seq = MESSAGE_SEQ.fetch_add(1, Ordering::Relaxed);
    format!(
        "{}.{}.{}@{}",
        Utc::now().timestamp_micros(),
        std::process::id(),
        seq,
        domain,
    )
}

/// Compose the transport-ready message for one recipient.
///
/// The plain-text alternative is derived from the HTML body so both
/// parts always say the same thing.
pub fn compose(
    rendered: &Rendered,
    attachments: &[Attachment],
    to: &str,
    opts: &ComposeOptions<'_>,
) -> Result<ComposedMessage> {
    let message_id = generate_message_id(opts.from_addr);
    let text_body = html2text(&rendered.html_body);

    let mut builder = MessageBuilder::new()
        .message_id(message_id.clone())
        .from(Address::new_address(Some(opts.from_name), opts.from_addr))
        .to(Address::new_address(None::<&str>, to))
        .header("Reply-To", Address::new_address(None::<&str>, opts.reply_to))
        .subject(rendered.subject.clone())
        .text_body(text_body)
        .html_body(rendered.html_body.clone());

    if opts.request_receipt {
        builder = builder
            .header("Disposition-Notification-To", Text::new(opts.from_addr.to_owned()))
            .header("Return-Receipt-To", Text::new(opts.from_addr.to_owned()));
    }

    if let Some(logo) = opts.logo {
        builder = builder.inline(
            logo.mime_type.clone(),
            format!("cid:{}", opts.logo_cid),
            logo.bytes.clone(),
        );
    }

    for attachment in attachments {
        builder = builder.attachment(
            attachment.mime_type.clone(),
            attachment.filename.clone(),
            attachment.bytes.clone(),
        );
    }

    let raw = builder.write_to_vec().map_err(Error::WriteMessageError)?;

    Ok(ComposedMessage {
        to: to.to_owned(),
        subject: rendered.subject.clone(),
        message_id,
        raw,
    })
}
