use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use overlayd::store::StateCodec;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "state-tool")]
#[command(about = "Inspect the persisted overlay state document")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print every overlay recorded in a state document
    Dump {
        #[arg(long)]
        file: PathBuf,
    },
    /// Validate a state document and report totals
    Check {
        #[arg(long)]
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Dump { file } => dump(file),
        Command::Check { file } => check(file),
    }
}

fn dump(file: PathBuf) -> Result<()> {
    let snapshot = StateCodec::new(&file)
        .load()
        .with_context(|| format!("cannot read {}", file.display()))?;

    let mut user_ids: Vec<i32> = snapshot.keys().copied().collect();
    user_ids.sort_unstable();
    for user_id in user_ids {
        println!("user {}", user_id);
        let targets = &snapshot[&user_id];
        let mut target_names: Vec<&String> = targets.keys().collect();
        target_names.sort();
        for name in target_names {
            println!("  target {}", name);
            for overlay in &targets[name] {
                println!(
                    "    {} [{}] {}",
                    overlay.package_name, overlay.state, overlay.base_code_path
                );
            }
        }
    }
    Ok(())
}

fn check(file: PathBuf) -> Result<()> {
    let snapshot = StateCodec::new(&file)
        .load()
        .with_context(|| format!("cannot read {}", file.display()))?;

    let users = snapshot.len();
    let targets: usize = snapshot.values().map(|targets| targets.len()).sum();
    let overlays: usize = snapshot
        .values()
        .flat_map(|targets| targets.values())
        .map(|list| list.len())
        .sum();
    let enabled = snapshot
        .values()
        .flat_map(|targets| targets.values())
        .flatten()
        .filter(|overlay| overlay.is_enabled())
        .count();

    println!(
        "{}: {} users, {} targets, {} overlays ({} enabled)",
        file.display(),
        users,
        targets,
        overlays,
        enabled
    );
    Ok(())
}
