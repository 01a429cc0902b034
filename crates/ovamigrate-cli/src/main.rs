//! ovamigrate CLI - Move exported OVF disks into a hypervisor staging area.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use ovamigrate_core::selection::{confirm, select_vms};
use ovamigrate_core::{
    discover, ApiClient, BatchSummary, CopyProgress, ImportMode, ImportPolicy, MigrationConfig,
    Migrator, SelectionMode,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Migrate exported OVF bundles into a hypervisor's staging area.
#[derive(Parser)]
#[command(name = "ovamigrate")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy disks, tag descriptors and optionally import the selected VMs.
    Migrate {
        /// Comma-separated VM names. Prompts with a menu when omitted.
        #[arg(long)]
        vms: Option<String>,

        /// Log every action without touching any file.
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Import every staged VM without asking.
        #[arg(long)]
        import: bool,

        /// API base URL.
        #[arg(long, env = "OVAMIGRATE_API")]
        api: Option<String>,

        /// API user name.
        #[arg(long, env = "OVAMIGRATE_USER")]
        user: Option<String>,

        /// API password.
        #[arg(long, env = "OVAMIGRATE_PASS", hide_env_values = true)]
        pass: Option<String>,

        /// Share URI prefix the hypervisor reads staging directories from.
        #[arg(long)]
        share: Option<String>,

        /// Suppress progress output.
        #[arg(short, long)]
        quiet: bool,

        #[command(flatten)]
        locations: Locations,
    },

    /// List the VMs that can be migrated.
    List {
        #[command(flatten)]
        locations: Locations,
    },

    /// Show the copy plan of one VM without touching anything.
    Plan {
        /// VM name.
        vm: String,

        #[command(flatten)]
        locations: Locations,
    },
}

/// Where configuration and VM directories are found.
#[derive(Args)]
struct Locations {
    /// Configuration file. Defaults apply when it does not exist.
    #[arg(long, default_value = "ovamigrate.toml", env = "OVAMIGRATE_CONFIG")]
    config: PathBuf,

    /// Directory holding one export directory per VM.
    #[arg(long)]
    export_root: Option<PathBuf>,

    /// Directory holding one staging directory per VM.
    #[arg(long)]
    staging_root: Option<PathBuf>,
}

impl Locations {
    fn load(&self) -> Result<MigrationConfig> {
        let mut config = MigrationConfig::load(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))?;
        if let Some(root) = &self.export_root {
            config.export_root = root.clone();
        }
        if let Some(root) = &self.staging_root {
            config.staging_root = root.clone();
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate {
            vms,
            dry_run,
            import,
            api,
            user,
            pass,
            share,
            quiet,
            locations,
        } => {
            let mut config = locations.load()?;
            config.dry_run |= dry_run;
            if let Some(api) = api {
                config.api.base_url = api;
            }
            if let Some(user) = user {
                config.api.username = user;
            }
            if let Some(pass) = pass {
                config.api.password = pass;
            }
            if let Some(share) = share {
                config.api.share_prefix = share;
            }
            init_tracing(cli.verbose, &config);
            run_migrate(config, SelectionMode::from_list(vms.as_deref()), import, quiet)?;
        }
        Commands::List { locations } => {
            let config = locations.load()?;
            init_tracing(cli.verbose, &config);
            for vm in discover(&config)? {
                println!("{}", vm);
            }
        }
        Commands::Plan { vm, locations } => {
            let config = locations.load()?;
            init_tracing(cli.verbose, &config);
            show_plan(config, &vm)?;
        }
    }

    Ok(())
}

/// Filter from `RUST_LOG`, else the config file, else debug when verbose.
fn init_tracing(verbose: bool, config: &MigrationConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("ovamigrate=debug,ovamigrate_core=debug")
        } else {
            EnvFilter::try_new(&config.logging.level)
                .unwrap_or_else(|_| EnvFilter::new("ovamigrate=info,ovamigrate_core=info"))
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn run_migrate(
    config: MigrationConfig,
    selection: SelectionMode,
    auto_import: bool,
    quiet: bool,
) -> Result<()> {
    let stdin = io::stdin();
    let vms = select_vms(&config, selection, &mut stdin.lock(), &mut io::stdout())?;
    if vms.is_empty() {
        tracing::info!("nothing selected, exiting");
        return Ok(());
    }

    if config.dry_run {
        println!("Dry run: nothing will be copied, tagged or imported.");
        println!();
    }

    // Set up progress tracking
    let progress_bar: Option<Arc<Mutex<ProgressBar>>> = if quiet {
        None
    } else {
        let pb = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} {msg} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")?
            .progress_chars("#>-");
        pb.set_style(style);
        Some(Arc::new(Mutex::new(pb)))
    };

    let callback: Option<ovamigrate_core::ProgressCallback> =
        progress_bar.clone().map(|pb_arc| -> ovamigrate_core::ProgressCallback {
            Box::new(move |progress: CopyProgress| {
                if let Ok(pb) = pb_arc.lock() {
                    pb.set_length(progress.bytes_total);
                    pb.set_position(progress.bytes_copied);
                    pb.set_message(format!(
                        "disk {}/{}",
                        progress.pair_index + 1,
                        progress.pair_count
                    ));
                }
            })
        });

    let client = ApiClient::new(config.api.clone())?;
    let ask_bar = progress_bar.clone();
    let mut policy = match ImportMode::resolve(config.dry_run, auto_import) {
        ImportMode::Skip => ImportPolicy::skip(),
        ImportMode::Auto => ImportPolicy::auto(&client),
        ImportMode::Prompt => ImportPolicy::prompt(&client, move |vm: &str| {
            let ask = || {
                let stdin = io::stdin();
                let question = format!("Import VM '{}' via API?", vm);
                confirm(&question, &mut stdin.lock(), &mut io::stdout())
            };
            let answer = match ask_bar.as_ref().and_then(|pb| pb.lock().ok()) {
                Some(pb) => pb.suspend(ask),
                None => ask(),
            };
            answer.unwrap_or_else(|e| {
                tracing::warn!(vm = %vm, error = %e, "could not read answer, skipping import");
                false
            })
        }),
    };

    let migrator = Migrator::new(config);
    let summary = migrator.migrate_batch(&vms, &mut policy, callback.as_ref());

    if let Some(pb_arc) = progress_bar {
        if let Ok(pb) = pb_arc.lock() {
            pb.finish_and_clear();
        }
    }

    print_summary(&summary, migrator.config().dry_run);
    io::stdout().flush()?;
    Ok(())
}

fn print_summary(summary: &BatchSummary, dry_run: bool) {
    println!();
    println!("Summary");
    println!("-------");
    for report in &summary.reports {
        let bytes: u64 = report.disks.iter().filter_map(|d| d.bytes).sum();
        let mismatch = if report.plan.is_mismatched() {
            format!(
                " (mismatch: {} source, {} destination)",
                report.plan.source_count, report.plan.destination_count
            )
        } else {
            String::new()
        };
        if dry_run {
            println!("  {}: {} disk(s) planned{}", report.layout.name, report.plan.len(), mismatch);
        } else {
            println!(
                "  {}: {} disk(s), {}{}",
                report.layout.name,
                report.disks.len(),
                format_bytes(bytes),
                mismatch
            );
        }
        if let Some(receipt) = &report.import {
            println!(
                "      imported: task {} uuid {}",
                receipt.task_tag, receipt.created_uuid
            );
        }
    }
    for (vm, error) in &summary.failures {
        println!("  {}: FAILED: {}", vm, error);
    }
    println!();
    println!(
        "{} succeeded, {} failed",
        summary.reports.len(),
        summary.failures.len()
    );
}

fn show_plan(config: MigrationConfig, vm: &str) -> Result<()> {
    let migrator = Migrator::new(config);
    let (ovf, plan) = migrator
        .plan_vm(vm)
        .with_context(|| format!("failed to plan {}", vm))?;

    println!("VM:        {}", vm);
    println!("OVF:       {}", ovf.display());
    println!(
        "Disks:     {} source, {} destination",
        plan.source_count, plan.destination_count
    );
    println!();

    if plan.is_empty() {
        println!("Nothing to copy.");
    }
    for (i, pair) in plan.pairs.iter().enumerate() {
        let size = std::fs::metadata(&pair.source)
            .map(|m| format_bytes(m.len()))
            .unwrap_or_else(|_| "missing".to_string());
        println!(
            "  {}. {} -> {} ({})",
            i + 1,
            pair.source.display(),
            pair.destination.display(),
            size
        );
    }
    if plan.is_mismatched() {
        println!();
        println!("Warning: disk counts differ; only the first {} pair(s) are copied.", plan.len());
    }

    Ok(())
}

/// Format bytes as human-readable string.
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
