use anyhow::Context;
use clap::{command, Parser};
use common::logging::CommonLogger;
use dawn_analyzer::{CircularDependencyChecker, StampList};
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct CLI {
    /// TOML file with [[stamp]] host/dependency entries
    #[arg(short, long)]
    input: PathBuf,

    /// Report each cycle once instead of once per host reaching it
    #[arg(short, long)]
    unique: bool,

    /// Only print cycles, no progress logging
    #[arg(short, long)]
    quiet: bool,
}

fn run(cli: &CLI) -> anyhow::Result<Vec<Vec<String>>> {
    let content = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("Failed to read {}", cli.input.display()))?;
    let list = StampList::from_toml_str(&content)
        .with_context(|| format!("Failed to parse {}", cli.input.display()))?;
    log::info!("Loaded {} stamps", list.stamps.len());

    let checker = CircularDependencyChecker::new(&list.stamps);
    log::info!("Checking {} hosts", checker.host_count());
    Ok(if cli.unique {
        checker.unique_cycles()
    } else {
        checker.check()
    })
}

fn main() {
    let cli = CLI::parse();
    CommonLogger::init(if cli.quiet {
        log::LevelFilter::Error
    } else {
        log::LevelFilter::Debug
    });

    let cycles = run(&cli).unwrap_or_else(|err| {
        log::error!("{:#}", err);
        std::process::exit(2);
    });

    if cycles.is_empty() {
        log::info!("No circular dependencies found");
        return;
    }
    for cycle in &cycles {
        println!("{}", cycle.join(" -> "));
    }
    log::warn!("Found {} circular dependencies", cycles.len());
    std::process::exit(1);
}
