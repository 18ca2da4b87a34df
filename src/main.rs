use std::fs;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};

use remote::http::HttpRemote;

mod cli;
use crate::cli::Cli;
use crate::cli::Commands;
use crate::cli::Config;

mod context;
use crate::context::{Cancel, Context, Layout};

mod convert;
use crate::convert::{Converter, Ffdec};

mod document;
use crate::document::Status;

mod download;
mod error;
use crate::error::Error;

mod journal;
use crate::journal::Journal;

mod probe;
mod progress;
mod reassemble;

#[cfg(test)]
mod fixture;

fn main() -> ExitCode {
    // Parse the cli
    let cli = Cli::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Aborted: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    let config = Config::load(cli.config.as_deref())?;
    info!("CONFIG: {:?}", config);

    match cli.command {
        Commands::Extract {
            data,
            file,
            scan,
            no_convert,
        } => {
            let blob = match (data, file) {
                (Some(data), _) => data,
                (None, Some(file)) => fs::read_to_string(file)?,
                (None, None) => unreachable!("clap requires one input"),
            };
            extract(&config, &blob, scan || config.scan_undeclared, !no_convert)
        }
        Commands::Clean { code } => {
            document::clean(&Layout::new(&config.output_root, &code))?;
            Ok(())
        }
        Commands::Index => {
            document::rebuild_index(&config.output_root)?;
            Ok(())
        }
    }
}

fn extract(config: &Config, blob: &str, scan: bool, convert: bool) -> Result<(), Error> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    // Ctrl-C only stops new work from starting, progress stays consistent
    let cancel = Arc::new(Cancel::new());
    {
        let cancel = cancel.clone();
        runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing running downloads");
                cancel.cancel();
            }
        });
    }

    let remote = HttpRemote::new(
        runtime.handle().clone(),
        &config.user_agent,
        config.referer.as_deref(),
    )?;
    let journal = Journal::new(&config.log_dir);

    let converter = match (&config.converter, convert) {
        (Some(c), true) => {
            let ffdec = Ffdec::from(c);
            ffdec.check()?;
            Some(ffdec)
        }
        _ => None,
    };

    let ctx = Context {
        config,
        remote: &remote,
        journal: &journal,
        cancel: &cancel,
    };

    let outcome = document::extract(
        &ctx,
        blob,
        scan,
        converter.as_ref().map(|c| c as &dyn Converter),
    )?;

    match outcome.status() {
        Status::Complete => info!(
            "{} ({}): fully reconstructed, {} pages",
            outcome.name,
            outcome.code,
            outcome.pages.len()
        ),
        Status::Partial { skipped, missing } => warn!(
            "{} ({}): partially reconstructed, {} of {} pages, {} skipped {:?}, {} never found",
            outcome.name,
            outcome.code,
            outcome.pages.len(),
            outcome.declared,
            skipped,
            outcome.skipped,
            missing
        ),
    }
    if !outcome.converted.is_empty() {
        info!(
            "{} converted pages in {}",
            outcome.converted.len(),
            outcome.dir.join("pdf").display()
        );
    }

    if config.clean {
        document::clean(&Layout::new(&config.output_root, &outcome.code))?;
    }
    document::rebuild_index(&config.output_root)?;

    runtime.shutdown_background();
    Ok(())
}
