mod commands;

use clap::{Parser, Subcommand};
use commands::{ImageCommands, PodCommands, TrustCommands};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "brig")]
#[command(about = "Jail-based container runtime")]
struct Cli {
    /// Host configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the host's root datasets
    Init,
    /// Manage images
    #[command(subcommand)]
    Image(ImageCommands),
    /// Manage pods
    #[command(subcommand)]
    Pod(PodCommands),
    /// Manage trusted signing keys
    #[command(subcommand)]
    Trust(TrustCommands),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("brig: {}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(cli: Cli) -> brig_runtime::Result<()> {
    let config = brig_runtime::HostConfig::load(cli.config.as_deref())?;

    if let Commands::Init = cli.command {
        let host = brig_runtime::Host::initialize(config).await?;
        println!("initialized {}", host.config.root_dataset);
        return Ok(());
    }

    let host = brig_runtime::Host::open(config).await?;
    match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Image(cmd) => commands::image(&host, cmd).await,
        Commands::Pod(cmd) => commands::pod(&host, cmd).await,
        Commands::Trust(cmd) => commands::trust(&host, cmd).await,
    }
}

/// Every error kind gets a distinct exit code so scripts can react
/// without parsing messages.
fn exit_code(err: &brig_runtime::Error) -> u8 {
    use brig_keystore::KeystoreError;
    use brig_runtime::Error;

    match err {
        Error::NotFound(_) => 2,
        Error::AmbiguousMatch(_) => 3,
        Error::InUse(_) => 4,
        Error::AlreadyRunning(_) => 5,
        Error::AddressExhausted(_) => 6,
        Error::Keystore(KeystoreError::UnknownIssuer { .. }) => 7,
        Error::Keystore(KeystoreError::SignatureInvalid(_)) => 8,
        Error::InconsistentState(_) => 9,
        Error::Unsupported(_) => 10,
        Error::UsageError(_) => 64,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brig_runtime::Error;

    #[test]
    fn test_exit_codes_are_distinct() {
        let errors = [
            Error::NotFound("x".into()),
            Error::AmbiguousMatch("x".into()),
            Error::InUse("x".into()),
            Error::AlreadyRunning("x".into()),
            Error::AddressExhausted("x".into()),
            Error::Keystore(brig_keystore::KeystoreError::UnknownIssuer {
                name: "x".into(),
                issuer: "y".into(),
            }),
            Error::Keystore(brig_keystore::KeystoreError::SignatureInvalid("x".into())),
            Error::InconsistentState("x".into()),
            Error::Unsupported("x".into()),
            Error::UsageError("x".into()),
        ];
        let mut codes: Vec<u8> = errors.iter().map(exit_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        // And none of them collide with the catch-all.
        assert!(!codes.contains(&1));
    }
}
