use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use concat_with::concat_line;
use rfq_mailer::{
    attachment::{convert::DocumentConverter, AttachFormat},
    batch::{self, sink::{EmlSink, MessageSink, NoopSink}, Queued, RunContext},
    config::RunConfig,
    contact::{Contact, Gender},
    ledger::{self, AttemptStatus, LedgerWriter},
    message::ComposedMessage,
    smtp::{
        config::{SmtpConfig, SmtpEncryptionKind},
        DeliveryOutcome,
    },
};
use tempfile::TempDir;

fn contact(email: &str, name: &str, gender: Gender, company: &str) -> Contact {
    Contact {
        email: email.into(),
        name: name.into(),
        gender,
        company: company.into(),
    }
}

fn run_config(dir: &Path) -> RunConfig {
    RunConfig {
        smtp: SmtpConfig {
            host: "smtp.example.com".into(),
            port: 587,
            encryption: Some(SmtpEncryptionKind::StartTls),
            login: "buyer@example.com".into(),
            password: "secret".into(),
        },
        from_name: "Procurement".into(),
        reply_to: "buyer@example.com".into(),
        subject_template: "RFQ for {company} - documents attached".into(),
        deadline: Some("August 29, 2026".into()),
        body_template_path: dir.join("body.html"),
        logo_path: None,
        sleep: Duration::ZERO,
        max_retries: 3,
        attach_format: AttachFormat::Pdf,
        request_receipt: true,
    }
}

/// Stands in for LibreOffice: copies the staged letter to the
/// expected output path.
fn fake_converter(dir: &Path) -> PathBuf {
    let script = dir.join("fake-soffice");
    fs::write(
        &script,
        concat_line!(
            "#!/bin/sh",
            "# args: --headless --convert-to EXT --outdir DIR FILE",
            "ext=\"$3\"; dir=\"$5\"; file=\"$6\"",
            "base=\"$(basename \"$file\" .html)\"",
            "cp \"$file\" \"$dir/$base.$ext\"",
        ),
    )
    .unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    script
}

fn context(dir: &Path) -> RunContext {
    fs::write(
        dir.join("body.html"),
        "<p>{salutation},</p><p>please quote by {deadline}.</p><img src=\"{logo_cid}\"/>",
    )
    .unwrap();
    fs::write(
        dir.join("letter.html"),
        "<html><body><p>{{today}}</p><p>{{salutation}},</p>\
         <p>{{company}}, offers are due by {{deadline}}.</p>\
         <p>{{from_name}} ({{reply_to}})</p></body></html>",
    )
    .unwrap();
    fs::write(dir.join("specifications.xlsx"), b"PK fake sheet").unwrap();

    let mut ctx = RunContext::prepare(
        run_config(dir),
        &dir.join("letter.html"),
        &dir.join("specifications.xlsx"),
    )
    .unwrap();
    ctx.converter = DocumentConverter::new(fake_converter(dir));
    ctx
}

/// Transport double that acknowledges everything.
struct AckSink;

#[async_trait]
impl MessageSink for AckSink {
    async fn deliver(&mut self, msg: &ComposedMessage) -> rfq_mailer::Result<DeliveryOutcome> {
        Ok(DeliveryOutcome::sent(msg.message_id.clone()))
    }
}

/// Transport double that rejects one mailbox and acknowledges the
/// rest.
struct RejectSink {
    reject: String,
}

#[async_trait]
impl MessageSink for RejectSink {
    async fn deliver(&mut self, msg: &ComposedMessage) -> rfq_mailer::Result<DeliveryOutcome> {
        if msg.to == self.reject {
            Ok(DeliveryOutcome::failed("550 mailbox unavailable"))
        } else {
            Ok(DeliveryOutcome::sent(msg.message_id.clone()))
        }
    }
}

#[test_log::test(tokio::test)]
async fn single_recipient_success_writes_one_sent_row() {
    let dir = TempDir::new().unwrap();
    let ctx = context(dir.path());

    let queue = vec![Queued::from(contact("alice@x.com", "Alice", Gender::Feminine, "Acme"))];
    let mut ledger_writer = LedgerWriter::create(dir.path(), ctx.started_at).unwrap();
    let report = batch::run(&ctx, queue, &mut AckSink, Some(&mut ledger_writer))
        .await
        .unwrap();
    let path = ledger_writer.path().to_owned();
    ledger_writer.close().unwrap();

    assert_eq!((report.sent, report.failed, report.skipped), (1, 0, 0));

    let rows = ledger::read(&path).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].email, "alice@x.com");
    assert_eq!(rows[0].attempt_number, 1);
    assert_eq!(rows[0].status, AttemptStatus::Sent);
    assert!(rows[0].message_id.is_some());
}

#[test_log::test(tokio::test)]
async fn dry_run_records_skipped_rows_in_processing_order() {
    let dir = TempDir::new().unwrap();
    let ctx = context(dir.path());

    let queue = vec![
        Queued::from(contact("alice@x.com", "Alice", Gender::Feminine, "Acme")),
        Queued::from(contact("bob@x.com", "Bob", Gender::Masculine, "Initech")),
        Queued::from(contact("carol@x.com", "Carol", Gender::Neutral, "Globex")),
    ];
    let mut ledger_writer = LedgerWriter::create(dir.path(), ctx.started_at).unwrap();
    let report = batch::run(&ctx, queue, &mut NoopSink, Some(&mut ledger_writer))
        .await
        .unwrap();
    let path = ledger_writer.path().to_owned();
    ledger_writer.close().unwrap();

    assert_eq!(report.skipped, 3);
    assert_eq!(report.sent, 0);

    let rows = ledger::read(&path).unwrap();
    let emails: Vec<_> = rows.iter().map(|row| row.email.as_str()).collect();
    assert_eq!(emails, ["alice@x.com", "bob@x.com", "carol@x.com"]);
    assert!(rows.iter().all(|row| row.status == AttemptStatus::Skipped));
}

#[test_log::test(tokio::test)]
async fn preview_serializes_messages_and_writes_no_ledger() {
    let dir = TempDir::new().unwrap();
    let ctx = context(dir.path());
    let eml_dir = dir.path().join("preview");

    let mut queue = vec![
        Queued::from(contact("alice@x.com", "Alice", Gender::Feminine, "Acme")),
        Queued::from(contact("bob@x.com", "Bob", Gender::Masculine, "Initech")),
        Queued::from(contact("carol@x.com", "Carol", Gender::Neutral, "Globex")),
    ];
    queue.truncate(2);

    let mut sink = EmlSink::new(&eml_dir);
    let report = batch::run(&ctx, queue, &mut sink, None).await.unwrap();

    assert_eq!(report.skipped, 2);

    let mut files: Vec<_> = fs::read_dir(&eml_dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    files.sort();
    assert_eq!(files, ["001_alice_at_x.com.eml", "002_bob_at_x.com.eml"]);

    let eml = fs::read_to_string(eml_dir.join(&files[0])).unwrap();
    assert!(eml.contains("Subject: RFQ for Acme - documents attached"));
    assert!(eml.contains("Cover_Letter_Acme.pdf"));

    // no ledger was created anywhere
    let ledgers = fs::read_dir(dir.path())
        .unwrap()
        .filter(|entry| {
            entry
                .as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .starts_with("send_log_")
        })
        .count();
    assert_eq!(ledgers, 0);
}

#[test_log::test(tokio::test)]
async fn failing_recipient_is_exhausted_after_three_chained_runs() {
    let dir = TempDir::new().unwrap();
    let ctx = context(dir.path());

    let alice = contact("alice@x.com", "Alice", Gender::Feminine, "Acme");
    let bob = contact("bob@x.com", "Bob", Gender::Masculine, "Initech");
    let mut sink = RejectSink {
        reject: "bob@x.com".into(),
    };

    // normal run: both recipients, bob fails his first attempt
    let mut writer = LedgerWriter::create(dir.path(), ctx.started_at).unwrap();
    let queue = vec![Queued::from(alice.clone()), Queued::from(bob.clone())];
    batch::run(&ctx, queue, &mut sink, Some(&mut writer)).await.unwrap();
    let mut log = writer.path().to_owned();
    writer.close().unwrap();

    // two retry runs, each chained off the previous ledger
    for run in 1u32..3 {
        let rows = ledger::read(&log).unwrap();
        let plan = ledger::plan_retries(ledger::fold_latest(&rows), ctx.config.max_retries);

        // alice was sent, she is never re-selected
        assert_eq!(plan.due.len(), 1);
        assert_eq!(plan.due[0].0.email, "bob@x.com");
        assert_eq!(plan.due[0].1, run);

        let queue: Vec<Queued> = plan
            .due
            .into_iter()
            .map(|(contact, prev_attempts)| Queued { contact, prev_attempts })
            .collect();

        let started_at = ctx.started_at + chrono::Duration::seconds(run as i64);
        let mut writer = LedgerWriter::create(dir.path(), started_at).unwrap();
        let report = batch::run(&ctx, queue, &mut sink, Some(&mut writer)).await.unwrap();
        assert_eq!(report.failed, 1);

        log = writer.path().to_owned();
        writer.close().unwrap();
    }

    // the chain now shows attempts 1, 2, 3, all failed, and the next
    // retry source excludes bob as exhausted
    let rows = ledger::read(&log).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].attempt_number, 3);
    assert_eq!(rows[0].status, AttemptStatus::Failed);

    let plan = ledger::plan_retries(ledger::fold_latest(&rows), ctx.config.max_retries);
    assert!(plan.due.is_empty());
    assert_eq!(plan.exhausted.len(), 1);
    assert_eq!(plan.exhausted[0].contact.email, "bob@x.com");
    assert_eq!(plan.exhausted[0].attempts, 3);
}

#[test_log::test(tokio::test)]
async fn conversion_failure_marks_recipient_failed_and_continues() {
    let dir = TempDir::new().unwrap();
    let mut ctx = context(dir.path());
    // no backend available at all
    ctx.converter = DocumentConverter::new("/nonexistent/soffice");

    let queue = vec![
        Queued::from(contact("alice@x.com", "Alice", Gender::Feminine, "Acme")),
        Queued::from(contact("bob@x.com", "Bob", Gender::Masculine, "Initech")),
    ];
    let mut ledger_writer = LedgerWriter::create(dir.path(), ctx.started_at).unwrap();
    let report = batch::run(&ctx, queue, &mut AckSink, Some(&mut ledger_writer))
        .await
        .unwrap();
    let path = ledger_writer.path().to_owned();
    ledger_writer.close().unwrap();

    assert_eq!(report.failed, 2);

    let rows = ledger::read(&path).unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.status == AttemptStatus::Failed));
    assert!(rows.iter().all(|row| row.error_detail.is_some()));
}

#[test_log::test(tokio::test)]
async fn rendered_letter_carries_run_date_and_salutation() {
    let dir = TempDir::new().unwrap();
    let ctx = context(dir.path());

    let rendered = ctx
        .render(&contact("alice@x.com", "Alice Smith", Gender::Feminine, "Acme"))
        .unwrap();

    assert_eq!(rendered.subject, "RFQ for Acme - documents attached");
    assert!(rendered.html_body.contains("Dear Ms Smith,"));
    assert!(rendered.html_body.contains(&format!("cid:{}", ctx.logo_cid)));
    assert!(rendered.letter.contains(&ctx.today));
    assert!(rendered.letter.contains("Acme, offers are due by August 29, 2026."));
    assert!(rendered.letter.contains("Procurement (buyer@example.com)"));
}
