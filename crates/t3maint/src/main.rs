use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use t3maint_core::config::{load_config, load_site_languages};
use t3maint_core::consolidate::{
    ConsolidateOptions, ConsolidateReport, Verbosity, consolidate_target, open_cms_connection,
};
use t3maint_core::files::{
    DeleteFilesOptions, MoveOptions, delete_stored_files, mark_missing_files, move_stored_file,
};
use t3maint_core::logprune::{LogPruneOptions, prune_log};
use t3maint_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, ensure_database_present, init_layout,
    inspect_runtime, normalize_for_display, resolve_paths,
};
use t3maint_core::tca::load_schema_targets;

#[derive(Debug, Parser)]
#[command(
    name = "t3maint",
    version,
    about = "Maintenance commands for a CMS installation: URL consolidation, file registry and log cleanup"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH", help = "Installation database")]
    db: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH", help = "Field-definition schema dump")]
    tca: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    db: Option<PathBuf>,
    config: Option<PathBuf>,
    tca: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            db: cli.db.clone(),
            config: cli.config.clone(),
            tca: cli.tca.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init(InitArgs),
    Status(StatusArgs),
    #[command(about = "Rewrite external URLs in rich-text fields into t3:// references")]
    Consolidate(ConsolidateArgs),
    File(FileArgs),
    Log(LogArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Args)]
struct StatusArgs {
    #[arg(long, help = "Emit status as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct ConsolidateArgs {
    #[arg(help = "Site identifier under config/sites/")]
    site: String,
    #[arg(short = 't', long, value_name = "TABLE")]
    table: Option<String>,
    #[arg(short = 'f', long, value_name = "FIELD")]
    field: Option<String>,
    #[arg(short = 'a', long = "all", help = "Scan every link field found in the schema")]
    all: bool,
    #[arg(short = 'd', long, value_name = "DOMAIN")]
    domain: String,
    #[arg(
        short = 'p',
        long,
        value_name = "PATH",
        default_value = "fileadmin",
        help = "Storage path segment matched inside URLs"
    )]
    path: String,
    #[arg(short = 'l', long = "list-targets", help = "List resolved targets and exit")]
    list_targets: bool,
    #[arg(short = 'n', long = "no-interaction", help = "Skip the confirmation prompt")]
    no_interaction: bool,
    #[arg(long)]
    dry_run: bool,
    #[arg(short = 'v', action = clap::ArgAction::Count, help = "Per-record tracing (-v) and unresolved diagnostics (-vv)")]
    verbose: u8,
}

#[derive(Debug, Args)]
struct FileArgs {
    #[command(subcommand)]
    command: FileSubcommand,
}

#[derive(Debug, Subcommand)]
enum FileSubcommand {
    #[command(about = "Move/rename a stored file on disk and in the registry")]
    Move {
        source: String,
        target: String,
        #[arg(long)]
        dry_run: bool,
    },
    #[command(about = "Delete registry rows by pattern and/or missing flag")]
    Delete {
        #[arg(long, value_name = "LIKE")]
        pattern: Option<String>,
        #[arg(long, help = "Delete rows flagged missing")]
        missing: bool,
        #[arg(long, help = "Never remove files from disk")]
        keep_disk: bool,
        #[arg(long)]
        dry_run: bool,
    },
    #[command(name = "mark-missing", about = "Reconcile the registry's missing flag with the storage directory")]
    MarkMissing {
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Debug, Args)]
struct LogArgs {
    #[command(subcommand)]
    command: LogSubcommand,
}

#[derive(Debug, Subcommand)]
enum LogSubcommand {
    #[command(about = "Delete audit-log rows older than the retention window")]
    Prune {
        #[arg(long, value_name = "DAYS")]
        days: u64,
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Status(args)) => run_status(&runtime, args),
        Some(Commands::Consolidate(args)) => run_consolidate(&runtime, args),
        Some(Commands::File(FileArgs { command })) => match command {
            FileSubcommand::Move {
                source,
                target,
                dry_run,
            } => run_file_move(&runtime, source, target, dry_run),
            FileSubcommand::Delete {
                pattern,
                missing,
                keep_disk,
                dry_run,
            } => run_file_delete(&runtime, pattern, missing, keep_disk, dry_run),
            FileSubcommand::MarkMissing { dry_run } => run_file_mark_missing(&runtime, dry_run),
        },
        Some(Commands::Log(LogArgs { command })) => match command {
            LogSubcommand::Prune { days, dry_run } => run_log_prune(&runtime, days, dry_run),
        },
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(&paths, args.force)?;

    println!("Initialized t3maint runtime layout");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("state_dir: {}", normalize_for_display(&paths.state_dir));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_status(runtime: &RuntimeOptions, args: StatusArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("runtime status");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("project_root_exists: {}", format_flag(status.project_root_exists));
    println!("state_dir_exists: {}", format_flag(status.state_dir_exists));
    println!("config_exists: {}", format_flag(status.config_exists));
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    println!("sites_dir_exists: {}", format_flag(status.sites_dir_exists));
    println!("tca_exists: {}", format_flag(status.tca_exists));
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_consolidate(runtime: &RuntimeOptions, args: ConsolidateArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    ensure_database_present(&paths)?;
    let verbosity = Verbosity::from_count(args.verbose);

    let targets: Vec<(String, String)> = match (&args.table, &args.field, args.all) {
        (Some(table), Some(field), false) => vec![(table.clone(), field.clone())],
        (None, None, true) => {
            let schema = load_schema_targets(&paths.tca_path)?;
            println!("discovered_targets: {}", schema.targets.len());
            if !schema.skipped_tables.is_empty() {
                println!("skipped_tables: {}", schema.skipped_tables.len());
                if verbosity >= Verbosity::Verbose {
                    for table in &schema.skipped_tables {
                        println!("  - {table} (no link field)");
                    }
                }
            }
            schema.targets.into_iter().collect()
        }
        _ => bail!("pass either -t <table> together with -f <field>, or -a for whole-schema mode"),
    };

    if args.list_targets {
        for (table, field) in &targets {
            println!("target: {table}.{field}");
        }
        return Ok(());
    }

    // A site must exist before any rewriting: language disambiguation is
    // meaningless without it.
    let languages = load_site_languages(&paths.sites_dir, &args.site)?;

    if args.dry_run {
        println!("mode: dry-run (no changes will be persisted)");
    } else if !args.no_interaction && !confirm_proceed(&targets)? {
        println!("aborted");
        return Ok(());
    }

    let connection = open_cms_connection(&paths.db_path)?;
    let mut total_processed = 0usize;
    let mut total_matches = 0usize;
    let mut total_replaced = 0usize;

    for (table, field) in targets {
        let report = consolidate_target(
            &connection,
            &languages,
            &ConsolidateOptions {
                table,
                field,
                domain: args.domain.clone(),
                path: args.path.clone(),
                dry_run: args.dry_run,
                verbosity,
            },
        )?;
        print_consolidate_report(&report);
        total_processed += report.stats.records_processed;
        total_matches += report.stats.total_matches;
        total_replaced += report.stats.total_replaced;
    }

    println!("total.records_processed: {total_processed}");
    println!("total.matches: {total_matches}");
    println!("total.replaced: {total_replaced}");
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn print_consolidate_report(report: &ConsolidateReport) {
    println!("[{}.{}]", report.table, report.field);
    println!("  dry_run: {}", report.dry_run);
    println!("  records_processed: {}", report.stats.records_processed);
    println!("  matches: {}", report.stats.total_matches);
    println!("  replaced: {}", report.stats.total_replaced);
    println!("  records_updated: {}", report.records_updated);
    if report.update_failures > 0 {
        println!("  update_failures: {}", report.update_failures);
    }
    if report.skipped_raw_html > 0 {
        println!("  skipped_raw_html: {}", report.skipped_raw_html);
    }
    if report.stats.total_matches == 0 {
        println!("  note: no matches found, consider checking the field manually");
    }
}

fn run_file_move(
    runtime: &RuntimeOptions,
    source: String,
    target: String,
    dry_run: bool,
) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    ensure_database_present(&paths)?;
    let storage_dir = resolve_storage_dir(&paths)?;
    let connection = open_cms_connection(&paths.db_path)?;

    let report = move_stored_file(
        &connection,
        &storage_dir,
        &MoveOptions {
            source,
            target,
            dry_run,
        },
    )?;

    println!("file move");
    println!("uid: {}", report.uid);
    println!("source: {}", report.source);
    println!("target: {}", report.target);
    println!("moved_disk_file: {}", report.moved_disk_file);
    println!("dry_run: {}", report.dry_run);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_file_delete(
    runtime: &RuntimeOptions,
    pattern: Option<String>,
    missing: bool,
    keep_disk: bool,
    dry_run: bool,
) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    ensure_database_present(&paths)?;
    let storage_dir = resolve_storage_dir(&paths)?;
    let connection = open_cms_connection(&paths.db_path)?;

    let report = delete_stored_files(
        &connection,
        &storage_dir,
        &DeleteFilesOptions {
            pattern,
            missing,
            keep_disk,
            dry_run,
        },
    )?;

    println!("file delete");
    println!("matched_rows: {}", report.matched_rows);
    println!("deleted_rows: {}", report.deleted_rows);
    println!("removed_disk_files: {}", report.removed_disk_files);
    println!("dry_run: {}", report.dry_run);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_file_mark_missing(runtime: &RuntimeOptions, dry_run: bool) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    ensure_database_present(&paths)?;
    let storage_dir = resolve_storage_dir(&paths)?;
    let connection = open_cms_connection(&paths.db_path)?;

    let report = mark_missing_files(&connection, &storage_dir, dry_run)?;

    println!("file mark-missing");
    println!("storage_dir: {}", normalize_for_display(&storage_dir));
    println!("disk_files: {}", report.disk_files);
    println!("flagged: {}", report.flagged);
    println!("cleared: {}", report.cleared);
    println!("dry_run: {}", report.dry_run);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_log_prune(runtime: &RuntimeOptions, days: u64, dry_run: bool) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    ensure_database_present(&paths)?;
    let connection = open_cms_connection(&paths.db_path)?;

    let report = prune_log(&connection, &LogPruneOptions { days, dry_run })?;

    println!("log prune");
    println!("cutoff_unix: {}", report.cutoff_unix);
    println!("matched_rows: {}", report.matched_rows);
    println!("deleted_rows: {}", report.deleted_rows);
    println!("dry_run: {}", report.dry_run);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn confirm_proceed(targets: &[(String, String)]) -> Result<bool> {
    println!("About to rewrite matching URLs in:");
    for (table, field) in targets {
        println!("  - {table}.{field}");
    }
    print!("Proceed? [y/N] ");
    io::stdout().flush().ok();
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("failed to read confirmation")?;
    let answer = line.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}

fn resolve_storage_dir(paths: &ResolvedPaths) -> Result<PathBuf> {
    let config = load_config(&paths.config_path)?;
    Ok(paths.project_root.join(config.storage_root()))
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        db: runtime.db.clone(),
        config: runtime.config.clone(),
        tca: runtime.tca.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
