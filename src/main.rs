use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rfq_mailer::{
    batch::{self, sink::{EmlSink, NoopSink}, Queued, RunContext, RunReport},
    cli::Cli,
    config::{self, RunConfig},
    contact,
    ledger::{self, LedgerWriter},
    smtp::SmtpSession,
    Result,
};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match try_main().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn try_main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = RunConfig::from_env()?;

    let mut exhausted = 0;
    let mut queue: Vec<Queued> = match &cli.retry_from_log {
        Some(log) => {
            let rows = ledger::read(log)?;
            let plan = ledger::plan_retries(ledger::fold_latest(&rows), config.max_retries);
            for state in &plan.exhausted {
                warn!(
                    "{} exhausted after {} attempts, not retrying",
                    state.contact.email, state.attempts,
                );
            }
            exhausted = plan.exhausted.len();
            plan.due
                .into_iter()
                .map(|(contact, prev_attempts)| Queued { contact, prev_attempts })
                .collect()
        }
        None => {
            let path = cli.contacts.as_ref().ok_or(config::Error::MissingContactsArgError)?;
            let loaded = contact::load_csv(path)?;
            for reject in &loaded.rejects {
                warn!("{reject}");
            }
            loaded.contacts.into_iter().map(Queued::from).collect()
        }
    };

    if let Some(limit) = cli.limit {
        queue.truncate(limit);
    }

    let ctx = RunContext::prepare(config, &cli.letter, &cli.spreadsheet)?;

    let report: RunReport = if let Some(limit) = cli.preview {
        queue.truncate(limit);
        let mut sink = EmlSink::new(cli.eml_out.clone());
        batch::run(&ctx, queue, &mut sink, None).await?
    } else if cli.dry_run {
        let mut ledger = LedgerWriter::create(&cli.log_dir, ctx.started_at)?;
        let mut sink = NoopSink;
        let result = batch::run(&ctx, queue, &mut sink, Some(&mut ledger)).await;
        finalize_ledger(ledger)?;
        result?
    } else {
        let mut session = SmtpSession::connect(ctx.config.smtp.clone(), ctx.config.sleep).await?;
        let mut ledger = LedgerWriter::create(&cli.log_dir, ctx.started_at)?;
        let result = batch::run(&ctx, queue, &mut session, Some(&mut ledger)).await;
        session.close();
        finalize_ledger(ledger)?;
        result?
    };

    info!(
        "done: {} sent, {} failed, {} skipped, {} exhausted",
        report.sent, report.failed, report.skipped, exhausted,
    );

    if let Some(path) = &cli.status_out {
        batch::write_status_summary(path, &report.attempts)?;
        info!("status summary written to {}", path.display());
    }

    Ok(())
}

fn finalize_ledger(ledger: LedgerWriter) -> Result<()> {
    let path = ledger.path().to_owned();
    ledger.close()?;
    info!("run ledger saved to {}", path.display());
    Ok(())
}
