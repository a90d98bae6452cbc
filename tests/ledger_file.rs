use std::fs::OpenOptions;
use std::io::Write;

use chrono::Local;
use rfq_mailer::contact::{Contact, Gender};
use rfq_mailer::ledger::{self, AttemptStatus, DeliveryAttempt, LedgerWriter};
use tempfile::TempDir;

fn contact(email: &str) -> Contact {
    Contact {
        email: email.into(),
        name: "Jane Doe".into(),
        gender: Gender::Feminine,
        company: "Acme".into(),
    }
}

fn attempt(email: &str, attempt_number: u32, status: AttemptStatus) -> DeliveryAttempt {
    DeliveryAttempt::record(&contact(email), attempt_number, status, None, None)
}

#[test]
fn rows_round_trip_in_append_order() {
    let dir = TempDir::new().unwrap();
    let mut writer = LedgerWriter::create(dir.path(), Local::now()).unwrap();

    let rows = [
        attempt("alice@x.com", 1, AttemptStatus::Sent),
        attempt("bob@x.com", 1, AttemptStatus::Failed),
        attempt("carol@x.com", 1, AttemptStatus::Skipped),
    ];
    for row in &rows {
        writer.append(row).unwrap();
    }
    let path = writer.path().to_owned();
    writer.close().unwrap();

    let read = ledger::read(&path).unwrap();
    assert_eq!(read, rows);
}

#[test]
fn skipping_close_leaves_flushed_rows_readable() {
    let dir = TempDir::new().unwrap();
    let mut writer = LedgerWriter::create(dir.path(), Local::now()).unwrap();

    writer.append(&attempt("alice@x.com", 1, AttemptStatus::Sent)).unwrap();
    let path = writer.path().to_owned();
    // simulate abnormal termination: the writer is dropped, not closed
    drop(writer);

    let read = ledger::read(&path).unwrap();
    assert_eq!(read.len(), 1);
    assert_eq!(read[0].email, "alice@x.com");
}

#[test]
fn torn_trailing_row_is_tolerated() {
    let dir = TempDir::new().unwrap();
    let mut writer = LedgerWriter::create(dir.path(), Local::now()).unwrap();

    writer.append(&attempt("alice@x.com", 1, AttemptStatus::Sent)).unwrap();
    writer.append(&attempt("bob@x.com", 1, AttemptStatus::Failed)).unwrap();
    let path = writer.path().to_owned();
    writer.close().unwrap();

    // a row cut short by a crash mid-write
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    write!(file, "carol@x.com,Carol").unwrap();

    let read = ledger::read(&path).unwrap();
    assert_eq!(read.len(), 2);
    assert_eq!(read[1].email, "bob@x.com");
}

#[test]
fn repeated_reads_reconstruct_the_same_view() {
    let dir = TempDir::new().unwrap();
    let mut writer = LedgerWriter::create(dir.path(), Local::now()).unwrap();

    writer.append(&attempt("alice@x.com", 1, AttemptStatus::Failed)).unwrap();
    writer.append(&attempt("alice@x.com", 2, AttemptStatus::Sent)).unwrap();
    writer.append(&attempt("bob@x.com", 1, AttemptStatus::Failed)).unwrap();
    let path = writer.path().to_owned();
    writer.close().unwrap();

    let first = ledger::fold_latest(&ledger::read(&path).unwrap());
    let second = ledger::fold_latest(&ledger::read(&path).unwrap());

    assert_eq!(first, second);
    assert_eq!(first[0].latest, AttemptStatus::Sent);
    assert_eq!(first[1].latest, AttemptStatus::Failed);
}

#[test]
fn ledger_filename_encodes_run_start_time() {
    let dir = TempDir::new().unwrap();
    let started_at = Local::now();
    let writer = LedgerWriter::create(dir.path(), started_at).unwrap();

    let expected = format!("send_log_{}.csv", started_at.format("%Y%m%d_%H%M%S"));
    assert_eq!(writer.path().file_name().unwrap().to_str().unwrap(), expected);
}
