use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use archiver::cli::handle_backup_command;
use archiver::config::{paths::ArchiverPaths, settings::Settings};
use archiver::error::ArchiveError;
use archiver::source::{SourceStore, SqliteSource};

#[derive(Parser)]
#[command(
    name = "chat-archive",
    author = "Kaylee Beyene",
    version,
    about = "Rolling backups of the terminal's AI conversation history",
    long_about = "chat-archive keeps full and incremental backups of the AI \
                  conversations stored in the terminal's local SQLite database, \
                  verifies them, prunes old ones and restores them on demand."
)]
struct Cli {
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Backup management commands
    #[command(subcommand)]
    Backup(archiver::cli::BackupCommands),

    /// Copy the whole conversation database to a file
    Snapshot {
        /// Destination path (must not exist)
        dest: PathBuf,
    },

    /// Write default settings
    Init,

    /// Show current configuration and paths
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            let code = err
                .downcast_ref::<ArchiveError>()
                .map(ArchiveError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

fn init_logging(verbose: bool, settings: &Settings) {
    let default_level = if verbose {
        "debug"
    } else {
        settings.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run(cli: Cli) -> Result<()> {
    // Initialize paths and settings
    let paths = ArchiverPaths::new()?;
    let settings = Settings::load_or_create(&paths)?;
    init_logging(cli.verbose, &settings);

    match cli.command {
        Some(Commands::Backup(cmd)) => {
            handle_backup_command(&paths, &settings, cmd)?;
        }
        Some(Commands::Snapshot { dest }) => {
            let source = SqliteSource::new(settings.resolved_source_db()?);
            source
                .snapshot_to(&dest)
                .with_context(|| format!("snapshot of {}", source.db_path().display()))?;
            println!("Snapshot written: {}", dest.display());
        }
        Some(Commands::Init) => {
            println!("Initializing chat-archiver at: {}", paths.base_dir().display());
            paths.ensure_directories()?;
            settings.save(&paths)?;
            println!("Initialization complete!");
            println!();
            println!("Settings file: {}", paths.settings_file().display());
            println!("Run 'chat-archive backup full' to create your first backup.");
        }
        Some(Commands::Config) => {
            println!("chat-archiver Configuration");
            println!("===========================");
            println!("Base directory:   {}", paths.base_dir().display());
            println!("Settings file:    {}", paths.settings_file().display());
            println!(
                "Backup directory: {}",
                settings.resolved_backup_dir(&paths).display()
            );
            match settings.resolved_source_db() {
                Ok(db) => println!("Source database:  {}", db.display()),
                Err(e) => println!("Source database:  unresolved ({})", e),
            }
            println!();
            println!("Settings:");
            println!("  Compression:      {}", settings.backup.compress);
            println!("  Auto prune:       {}", settings.backup.auto_prune);
            println!(
                "  Keep chains:      {}",
                settings
                    .backup
                    .retention
                    .max_count
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "unlimited".into())
            );
            println!(
                "  Max age (days):   {}",
                settings
                    .backup
                    .retention
                    .max_age_days
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "unlimited".into())
            );
            println!("  Log level:        {}", settings.log_level);
        }
        None => {
            println!("chat-archive - backups for your terminal's AI conversations");
            println!();
            println!("Run 'chat-archive --help' for usage information.");
        }
    }

    Ok(())
}
