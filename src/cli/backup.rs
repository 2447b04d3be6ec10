//! Backup CLI commands
//!
//! Implements CLI commands for backup management.

use std::path::PathBuf;

use chrono::Utc;
use clap::Subcommand;
use tabled::{settings::Style, Table, Tabled};

use crate::backup::engine::{BackupEngine, EngineOptions, RetentionReport, VerifyOutcome};
use crate::backup::retention;
use crate::config::paths::ArchiverPaths;
use crate::config::settings::Settings;
use crate::error::{ArchiveError, ArchiveResult};
use crate::models::{ArtifactId, ArtifactKind, CatalogEntry};
use crate::source::SqliteSource;

/// Backup subcommands
#[derive(Subcommand)]
pub enum BackupCommands {
    /// Create a full backup of every conversation
    Full {
        /// Skip the retention pass after the backup
        #[arg(long)]
        no_prune: bool,
    },

    /// Back up conversations changed since the latest healthy backup
    #[command(alias = "inc")]
    Incremental {
        /// Skip the retention pass after the backup
        #[arg(long)]
        no_prune: bool,
    },

    /// List all backups in the catalog
    List {
        /// Show detailed information
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show backup statistics
    Stats,

    /// Re-read a backup and check its checksum
    Verify {
        /// Artifact id or file name (use 'latest' for most recent)
        backup: String,
    },

    /// Delete old backups according to retention policy
    Prune {
        /// Delete without showing the dry-run summary first
        #[arg(short, long)]
        force: bool,
    },

    /// Rebuild the conversations captured by a backup into a JSON file
    Restore {
        /// Artifact id or file name (use 'latest' for most recent)
        backup: String,

        /// Output file
        output: PathBuf,
    },
}

#[derive(Tabled)]
struct ArtifactRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Artifact")]
    id: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Records")]
    records: usize,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Age")]
    age: String,
    #[tabled(rename = "Status")]
    status: String,
}

impl ArtifactRow {
    fn new(index: usize, entry: &CatalogEntry) -> Self {
        let age = Utc::now().signed_duration_since(entry.artifact.created_at);
        Self {
            index,
            id: entry.id().to_string(),
            kind: entry.artifact.kind.to_string(),
            records: entry.artifact.record_count,
            size: format_size(entry.artifact.size_bytes),
            age: format_duration(age),
            status: entry.status.to_string(),
        }
    }
}

/// Open the engine configured by `settings`
fn open_engine(
    paths: &ArchiverPaths,
    settings: &Settings,
) -> ArchiveResult<BackupEngine<SqliteSource>> {
    let source = SqliteSource::new(settings.resolved_source_db()?);
    let options = EngineOptions::new(settings.resolved_backup_dir(paths))
        .compress(settings.backup.compress);
    let engine = BackupEngine::open(source, options)?;

    let recovery = engine.recovery_report();
    if !recovery.is_clean() {
        eprintln!(
            "Recovered backup directory: {} unfinished backup(s) discarded, {} stray file(s) removed, {} missing file(s)",
            recovery.discarded_entries.len(),
            recovery.removed_files.len(),
            recovery.missing_files.len()
        );
        for id in &recovery.stuck_entries {
            eprintln!("Warning: unfinished backup {} could not be removed", id);
        }
    }
    Ok(engine)
}

/// Handle a backup command
pub fn handle_backup_command(
    paths: &ArchiverPaths,
    settings: &Settings,
    cmd: BackupCommands,
) -> ArchiveResult<()> {
    let mut engine = open_engine(paths, settings)?;
    let retention = settings.backup.retention.to_config();

    match cmd {
        BackupCommands::Full { no_prune } => {
            create_backup(&mut engine, settings, ArtifactKind::Full, no_prune)?;
        }

        BackupCommands::Incremental { no_prune } => {
            create_backup(&mut engine, settings, ArtifactKind::Incremental, no_prune)?;
        }

        BackupCommands::List { verbose } => {
            let entries = engine.list_artifacts()?;

            if entries.is_empty() {
                println!("No backups found.");
                println!("Create one with: chat-archive backup full");
                return Ok(());
            }

            if verbose {
                println!("Available Backups");
                println!("=================");
                println!();
                for (i, entry) in entries.iter().enumerate() {
                    let artifact = &entry.artifact;
                    println!("{}. {} [{}]", i + 1, artifact.id, entry.status);
                    println!(
                        "   Created:  {}",
                        artifact.created_at.format("%Y-%m-%d %H:%M:%S%.3f UTC")
                    );
                    if let Some(at) = entry.verified_at {
                        println!("   Verified: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
                    }
                    match &artifact.baseline {
                        Some(baseline) => println!("   Baseline: {}", baseline),
                        None => println!("   Baseline: -"),
                    }
                    println!("   Records:  {}", artifact.record_count);
                    println!("   Size:     {}", format_size(artifact.size_bytes));
                    println!("   File:     {}", artifact.file_name);
                    println!("   SHA-256:  {}", artifact.checksum);
                    println!();
                }
            } else {
                let rows: Vec<ArtifactRow> = entries
                    .iter()
                    .enumerate()
                    .map(|(i, entry)| ArtifactRow::new(i + 1, entry))
                    .collect();
                let mut table = Table::new(rows);
                table.with(Style::psql());
                println!("{}", table);
                println!();
            }

            println!("Total: {} backup(s)", entries.len());
        }

        BackupCommands::Stats => {
            let stats = engine.stats()?;

            println!("Backup Statistics");
            println!("=================");
            println!("Directory:     {}", engine.backup_dir().display());
            println!(
                "Artifacts:     {} ({} full, {} incremental)",
                stats.total_artifacts, stats.full_count, stats.incremental_count
            );
            println!(
                "Status:        {} verified, {} corrupt",
                stats.verified_count, stats.corrupt_count
            );
            println!("Total size:    {}", format_size(stats.total_bytes));
            if let Some((id, at)) = &stats.oldest {
                println!("Oldest:        {} ({})", id, at.format("%Y-%m-%d %H:%M UTC"));
            }
            if let Some((id, at)) = &stats.newest {
                println!("Newest:        {} ({})", id, at.format("%Y-%m-%d %H:%M UTC"));
            }
            if let Some(records) = stats.latest_full_records {
                println!("Latest full:   {} record(s)", records);
            }

            println!();
            match engine.source().stats() {
                Ok(source) => {
                    println!("Source database");
                    println!("Conversations: {}", source.total_conversations);
                    println!("Database size: {}", format_size(source.database_size));
                    println!("Data size:     {}", format_size(source.total_data_size));
                    if let (Some(oldest), Some(newest)) =
                        (source.oldest_conversation, source.newest_conversation)
                    {
                        println!(
                            "Modified:      {} to {}",
                            oldest.format("%Y-%m-%d %H:%M UTC"),
                            newest.format("%Y-%m-%d %H:%M UTC")
                        );
                    }
                }
                Err(e) => println!("Source database unavailable: {}", e),
            }
        }

        BackupCommands::Verify { backup } => {
            let id = resolve_artifact_id(&mut engine, &backup)?;

            match engine.verify(&id)? {
                VerifyOutcome::Verified => {
                    println!("{}: OK", id);
                }
                VerifyOutcome::Corrupt { reason } => {
                    println!("{}: CORRUPT ({})", id, reason);
                    return Err(ArchiveError::verification_failure(id.as_str(), reason));
                }
            }
        }

        BackupCommands::Prune { force } => {
            retention.validate()?;
            let entries = engine.list_artifacts()?;
            let plan = retention::plan(&entries, &retention, Utc::now());
            let doomed = plan.doomed();

            let policy = format!(
                "{}, {}",
                retention
                    .max_count
                    .map(|n| format!("keep {} chain(s)", n))
                    .unwrap_or_else(|| "no count limit".to_string()),
                retention
                    .max_age
                    .map(|age| format!("max age {} day(s)", age.num_days()))
                    .unwrap_or_else(|| "no age limit".to_string()),
            );

            if doomed.is_empty() {
                println!("No backups to prune.");
                println!("Current retention policy: {}", policy);
                println!("You have {} backup chain(s).", plan.kept.len());
                return Ok(());
            }

            println!("Prune Summary");
            println!("=============");
            println!("Retention policy: {}", policy);
            println!(
                "Chains: {} kept, {} expired",
                plan.kept.len(),
                plan.expired.len()
            );
            if !plan.orphans.is_empty() {
                println!("Orphaned incrementals: {}", plan.orphans.len());
            }
            println!("To be deleted: {} artifact(s)", doomed.len());
            for id in &doomed {
                println!("  {}", id);
            }
            println!();

            if !force {
                println!("To delete old backups, run again with --force flag:");
                println!("  chat-archive backup prune --force");
                return Ok(());
            }

            let report = engine.apply_retention(&retention)?;
            print_retention_report(&report);
            check_retention_report(&report)?;
        }

        BackupCommands::Restore { backup, output } => {
            let id = resolve_artifact_id(&mut engine, &backup)?;

            println!("Restoring from backup {}...", id);
            let result = engine.restore_to_file(&id, &output)?;

            println!("Restore complete!");
            println!("{}", result.summary());
            if let Some(date) = result.backup_date {
                println!("Backup date: {}", date.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            println!("Written to: {}", output.display());
        }
    }

    Ok(())
}

/// Create one backup, then prune if the settings ask for it
fn create_backup(
    engine: &mut BackupEngine<SqliteSource>,
    settings: &Settings,
    requested: ArtifactKind,
    no_prune: bool,
) -> ArchiveResult<()> {
    let retention = settings.backup.retention.to_config();

    println!("Creating {} backup...", requested.prefix());
    let (artifact, report) = if settings.backup.auto_prune && !no_prune {
        let (artifact, report) = engine.create_backup_with_retention(requested, &retention)?;
        (artifact, Some(report))
    } else {
        let artifact = match requested {
            ArtifactKind::Full => engine.create_full()?,
            ArtifactKind::Incremental => engine.create_incremental()?,
        };
        (artifact, None)
    };

    if artifact.kind != requested {
        println!("No healthy baseline found; created a full backup instead.");
    }
    println!("Backup created: {}", artifact.id);
    println!(
        "Records: {}   Size: {}",
        artifact.record_count,
        format_size(artifact.size_bytes)
    );
    if let Some(baseline) = &artifact.baseline {
        println!("Baseline: {}", baseline);
    }
    println!(
        "Location: {}",
        engine.backup_dir().join(&artifact.file_name).display()
    );

    if let Some(report) = report {
        print_retention_report(&report);
        check_retention_report(&report)?;
    }
    Ok(())
}

fn print_retention_report(report: &RetentionReport) {
    if report.deleted.is_empty() && report.failed.is_empty() {
        return;
    }
    println!("Deleted {} old backup(s).", report.deleted.len());
    for failure in &report.failed {
        println!("  Could not delete {}: {}", failure.artifact, failure.reason);
    }
}

/// A retention pass with failures is reported as an error for the exit code
fn check_retention_report(report: &RetentionReport) -> ArchiveResult<()> {
    match report.failed.first() {
        Some(failure) => Err(failure.to_error()),
        None => Ok(()),
    }
}

/// Resolve a backup identifier to an artifact id
fn resolve_artifact_id(
    engine: &mut BackupEngine<SqliteSource>,
    backup: &str,
) -> ArchiveResult<ArtifactId> {
    // Handle "latest" keyword
    if backup.eq_ignore_ascii_case("latest") {
        return engine
            .latest()?
            .map(|entry| entry.id().clone())
            .ok_or_else(|| ArchiveError::NotFound {
                entity_type: "Backup",
                identifier: "latest".to_string(),
            });
    }

    // Accept a path to an artifact file as well as a bare id
    let name = std::path::Path::new(backup)
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| backup.to_string());

    name.parse::<ArtifactId>().map_err(|_| ArchiveError::NotFound {
        entity_type: "Backup",
        identifier: backup.to_string(),
    })
}

/// Format a duration in human-readable form
fn format_duration(duration: chrono::Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);

    if total_seconds < 60 {
        return format!("{}s", total_seconds);
    }

    let minutes = total_seconds / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h", hours);
    }

    let days = hours / 24;
    if days < 30 {
        return format!("{}d", days);
    }

    format!("{}mo", days / 30)
}

/// Format a file size in human-readable form
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
