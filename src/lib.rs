//! Batch RFQ mailer.
//!
//! Personalizes and delivers a batch of request-for-quote emails, each
//! carrying a converted cover letter and a static spreadsheet, over an
//! authenticated SMTP session.
//!
//! The heart of the crate is the delivery orchestration: the
//! per-recipient pipeline in [`batch`], the append-only run ledger in
//! [`ledger`] that makes interrupted batches resumable, and the
//! bounded retry state machine built on top of both. Everything a run
//! needs is carried by an explicit [`batch::RunContext`], there is no
//! ambient state.

pub mod attachment;
pub mod batch;
pub mod cli;
pub mod config;
pub mod contact;
mod error;
pub mod ledger;
pub mod message;
pub mod smtp;
pub mod template;

pub use self::error::{Error, Result};
