//! Runs transaction scripts against a fresh in-memory database.
//!
//! ```text
//! schemata [--config settings.toml] [script.edn ...]
//! ```
//!
//! Each script holds one or more transactions, each a vector of forms (see
//! the `txdata` module). Without script arguments the scripts listed in the
//! settings are run, and without those a script is read from stdin. One
//! JSON report is printed per committed transaction. The first rejected
//! transaction stops the run with a non-zero exit code.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use schemata::config::Settings;
use schemata::construct::Database;
use schemata::error::{Result, SchemataError};
use schemata::txdata;

/// Runs transaction scripts against a fresh in-memory database
#[derive(Parser, Debug)]
#[command(name = "schemata")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a settings file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Transaction scripts, run in order
    scripts: Vec<String>,
}

fn run(settings: &Settings, scripts: &[String]) -> Result<()> {
    let db = Database::new();
    let mut sources: Vec<(String, String)> = Vec::new();
    if scripts.is_empty() {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .map_err(|e| SchemataError::Config(format!("reading stdin: {}", e)))?;
        sources.push((String::from("<stdin>"), text));
    } else {
        for script in scripts {
            let text = std::fs::read_to_string(script)
                .map_err(|e| SchemataError::Config(format!("reading {}: {}", script, e)))?;
            sources.push((script.clone(), text));
        }
    }
    for (name, text) in sources {
        let transactions = txdata::parse_script(&text)?;
        info!(script = %name, transactions = transactions.len(), "running script");
        for ops in transactions {
            let report = db.transact(ops)?;
            if settings.print_reports {
                let json = serde_json::to_string_pretty(&report.to_json())
                    .map_err(|e| SchemataError::Config(e.to_string()))?;
                println!("{}", json);
            }
        }
    }
    let snapshot = db.snapshot()?;
    info!(
        basis_t = snapshot.basis_t(),
        attributes = snapshot.attributes().len(),
        ledger_head = snapshot.ledger_head().unwrap_or_default(),
        "done"
    );
    Ok(())
}

fn main() -> ExitCode {
    let Args { config, mut scripts } = Args::parse();
    let settings = match Settings::load(config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if scripts.is_empty() {
        scripts = settings.scripts.clone();
    }
    match run(&settings, &scripts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "run failed");
            ExitCode::FAILURE
        }
    }
}
