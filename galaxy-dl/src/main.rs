use clap::{Parser, Subcommand};
use tracing::Level;

mod auth;
mod commands;

use commands::{archive, download, info, library, login};

#[derive(Parser)]
#[command(
    name = "galaxy-dl",
    about = "Archival downloader for GOG Galaxy builds",
    version,
    long_about = "Discovers builds on the Galaxy content-system, mirrors their \
                  CDN content with verified integrity, and packs the result into \
                  deterministic RGOG archives."
)]
struct Cli {
    /// Set the logging level
    #[arg(short, long, value_enum, default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session in auth.json
    Login(login::LoginArgs),

    /// List owned product ids, one per line
    Library(library::LibraryArgs),

    /// Show builds of a product, or summarise an archive
    Info(info::InfoArgs),

    /// Mirror a build's CDN content into a local tree
    Download(download::DownloadArgs),

    /// Pack a mirrored v2 tree into an RGOG archive
    Pack(archive::PackArgs),

    /// Unpack an RGOG archive back into a v2 tree
    Unpack(archive::UnpackArgs),

    /// List the builds inside an archive
    List(archive::ListArgs),

    /// Extract builds or files from an archive
    Extract(archive::ExtractArgs),

    /// Verify an archive's structure and content hashes
    Verify(archive::VerifyArgs),
}

/// Map a failure to the documented process exit codes
fn exit_code_for(error: &anyhow::Error) -> i32 {
    for cause in error.chain() {
        if let Some(e) = cause.downcast_ref::<galaxy_client::Error>() {
            return match e {
                galaxy_client::Error::Auth { .. } => 2,
                galaxy_client::Error::NotFound { .. } => 3,
                galaxy_client::Error::HashMismatch { .. } => 4,
                _ => 1,
            };
        }
        if let Some(e) = cause.downcast_ref::<galaxy_cdn::Error>() {
            return match e {
                galaxy_cdn::Error::HashMismatch { .. } => 4,
                galaxy_cdn::Error::NotFound { .. } => 3,
                galaxy_cdn::Error::Client(galaxy_client::Error::Auth { .. }) => 2,
                galaxy_cdn::Error::Client(galaxy_client::Error::NotFound { .. }) => 3,
                _ => 1,
            };
        }
        if let Some(e) = cause.downcast_ref::<galaxy_manifest::Error>() {
            return match e {
                galaxy_manifest::Error::NotFound { .. } => 3,
                galaxy_manifest::Error::Client(galaxy_client::Error::Auth { .. }) => 2,
                galaxy_manifest::Error::Client(galaxy_client::Error::NotFound { .. }) => 3,
                _ => 1,
            };
        }
        if let Some(e) = cause.downcast_ref::<rgog_archive::Error>() {
            return match e {
                rgog_archive::Error::HashMismatch { .. } => 4,
                rgog_archive::Error::NotFound { .. } => 3,
                _ => 1,
            };
        }
    }
    1
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(Level::from(cli.log_level))
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Login(args) => login::handle(args).await,
        Commands::Library(args) => library::handle(args).await,
        Commands::Info(args) => info::handle(args).await,
        Commands::Download(args) => download::handle(args).await,
        Commands::Pack(args) => archive::handle_pack(&args),
        Commands::Unpack(args) => archive::handle_unpack(&args),
        Commands::List(args) => archive::handle_list(&args),
        Commands::Extract(args) => archive::handle_extract(&args),
        Commands::Verify(args) => archive::handle_verify(&args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(exit_code_for(&e));
    }
}
