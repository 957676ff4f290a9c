use std::error::Error;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tweetstash_core::config::Settings;

mod cmdline;
mod setup_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing::register();

    // Setup the CryptoProvider (controls core cryptography used by rustls) for the process
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| "Installing default CryptoProvider")?;

    if let Err(e) = run().await {
        error!("{e}");
        return Err(e);
    }
    info!("Exiting...");

    Ok(())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let matches = cmdline::root_cli().get_matches();
    let Some((cmdline::RUN_SUBCOMMAND, args)) = matches.subcommand() else {
        return Err(format!("Unknown subcommand {:?}", matches.subcommand_name()).into());
    };

    let mut settings = Settings::from_env()?;
    cmdline::apply_run_args(&mut settings, args);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(()) => signal_cancel.cancel(),
            Err(e) => error!(error = %e, "Failed to install signal handlers"),
        }
    });

    let report = tweetstash_core::run(settings, cancel).await?;
    info!(?report, "Run finished");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            info!("Received Ctrl+C signal");
        }
        _ = terminate.recv() => info!("Received terminate signal"),
    }
    Ok(())
}
