use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use filer_lib::interaction::ConsoleInteraction;
use filer_lib::logging::{init_tracing, LogManager};
use filer_lib::path_validation::validate_path;
use filer_lib::volumes::root_disk_name;
use filer_lib::{AppState, FilerConfig, NoViews};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "filer-cli")]
#[command(about = "Trash and desktop volume management", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Answer every confirmation with yes
    #[arg(short = 'y', long, global = true)]
    yes: bool,

    /// Program used to play feedback sounds
    #[arg(long, global = true)]
    sound_command: Option<String>,

    /// Print the notification history (with error codes) as JSON on exit
    #[arg(long, global = true)]
    history: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Move files to the Trash; mount points are ejected instead
    Trash {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Permanently delete everything in the Trash
    Empty,
    /// List the Trash contents
    List {
        #[arg(long)]
        json: bool,
    },
    /// Print the Trash directory
    Path,
    /// Print the desktop name of the root volume
    DiskName,
    /// Keep desktop volume links in sync until interrupted
    Watch,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("warn");
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => FilerConfig::load(path)?,
        None => FilerConfig::default(),
    };
    if cli.sound_command.is_some() {
        config.sound_command = cli.sound_command.clone();
    }

    let log = Arc::new(LogManager::default());
    let ui = Arc::new(
        ConsoleInteraction::new(log.clone(), cli.yes)
            .with_sound_player(config.sound_command.clone(), config.sound_dir.clone()),
    );
    let state = AppState::new(config, ui, Arc::new(NoViews));

    match cli.command {
        Commands::Trash { paths } => {
            for path in &paths {
                validate_path(path).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
            }
            let report = state.trash.move_to_trash(&paths).await;
            if report.aborted {
                println!("Cancelled.");
            } else {
                println!(
                    "🗑  moved: {}, ejected: {}, deleted: {}, skipped: {}, failed: {}",
                    report.moved, report.unmounted, report.deleted, report.skipped, report.failed
                );
            }
        }
        Commands::Empty => {
            if !state.trash.empty_trash().await {
                std::process::exit(1);
            }
        }
        Commands::List { json } => {
            let entries = state.trash.entries().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("✅ Trash is empty");
            } else {
                let size = state.trash.total_size().await?;
                println!("{:<10} NAME", "KIND");
                println!("{}", "-".repeat(40));
                for entry in &entries {
                    println!("{:<10} {}", format!("{:?}", entry.kind).to_lowercase(), entry.name);
                }
                println!();
                println!("{} item(s), {:.2} MB", entries.len(), size as f64 / 1_048_576.0);
            }
        }
        Commands::Path => {
            println!("{}", state.trash.trash_path().display());
        }
        Commands::DiskName => {
            let name = root_disk_name(&state.config, state.mounts.as_ref(), state.runner.as_ref()).await;
            println!("{name}");
        }
        Commands::Watch => {
            let reconciler = state.volume_reconciler().await?;
            println!("💾 Watching {}", reconciler.media_root().display());

            let (tx, rx) = tokio::sync::mpsc::channel(1);
            let _watcher = reconciler.watch(tx)?;

            let cancel = CancellationToken::new();
            let stopper = cancel.clone();
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                stopper.cancel();
            });

            reconciler.run(rx, cancel).await;
        }
    }

    if cli.history {
        println!("{}", serde_json::to_string_pretty(&log.get_logs(None))?);
    }
    if log.count("critical") > 0 {
        std::process::exit(1);
    }
    Ok(())
}
