use std::io;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use pssh_client::report::{EXIT_FAILURE, EXIT_STARTUP, EXIT_SUCCESS, EXIT_USAGE};
use pssh_client::{Args, Config};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            let code = if e.use_stderr() { EXIT_USAGE } else { EXIT_SUCCESS };
            return exit(code);
        }
    };
    init_logging();

    match run(args.into()) {
        Ok(code) => exit(code),
        Err(e) => {
            tracing::error!("{e:#}");
            let startup = e
                .downcast_ref::<pssh_client::SessionError>()
                .is_some_and(|e| e.is_startup());
            exit(if startup { EXIT_STARTUP } else { EXIT_FAILURE })
        }
    }
}

fn run(config: Config) -> Result<i32> {
    tracing::debug!(?config, "starting");
    let report = pssh_client::run(&config)?;

    print!("{}", report.summary());
    if let Some(reason) = report.failure() {
        tracing::error!("{reason}");
    }
    Ok(report.exit_code())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .without_time()
        .with_target(false)
        .with_level(false)
        .try_init();
}

fn exit(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
