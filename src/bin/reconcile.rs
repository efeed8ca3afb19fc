//! Command-line front end for the reconciler.
//!
//! Usage:
//!   reconcile run 27AAAAA0000A1Z5 --config reconciler.json
//!   reconcile schema > reconciler.schema.json
//!   reconcile inspect reports/27AAAAA0000A1Z5/GSTR-3B_merged.xlsx

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::error;
use periodic_filing_reconciler::{load_merged_return, missing_keys, Reconciler, ReconcilerConfig};

#[derive(Parser)]
#[command(name = "reconcile", about = "Merge a filer's GSTR-3B returns and compute the result points")]
struct Cli {
    /// JSON configuration file; defaults apply when omitted.
    #[arg(long, short, global = true, env = "RECONCILER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile one or more filers and write their artifacts.
    Run {
        /// Filer ids (directory names under the input root).
        #[arg(required = true)]
        filers: Vec<String>,

        /// Override the input root from the configuration.
        #[arg(long)]
        input_root: Option<PathBuf>,

        /// Override the output root from the configuration.
        #[arg(long)]
        output_root: Option<PathBuf>,

        /// Print the flat result points as JSON.
        #[arg(long)]
        print: bool,
    },
    /// Print the JSON schema of the configuration file.
    Schema,
    /// List the tables of a merged workbook.
    Inspect { artifact: PathBuf },
}

fn load_config(path: Option<&PathBuf>) -> Result<ReconcilerConfig> {
    match path {
        Some(path) => ReconcilerConfig::from_json_file(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(ReconcilerConfig::default()),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            filers,
            input_root,
            output_root,
            print,
        } => {
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(root) = input_root {
                config.input_root = root;
            }
            if let Some(root) = output_root {
                config.output_root = root;
            }
            let reconciler = Reconciler::new(config)?;

            let mut failures = 0;
            for filer in &filers {
                match reconciler.run_filer(filer) {
                    Ok(outcome) => {
                        println!("{}: {}", filer, outcome.artifact.display());
                        if print {
                            let flat = outcome.report.result_points.to_flat_map();
                            println!("{}", serde_json::to_string_pretty(&flat)?);
                        }
                    }
                    Err(e) => {
                        error!("{}: {}", filer, e);
                        failures += 1;
                    }
                }
            }
            if failures > 0 {
                anyhow::bail!("{} of {} filers failed", failures, filers.len());
            }
        }
        Command::Schema => {
            println!("{}", ReconcilerConfig::schema_as_json()?);
        }
        Command::Inspect { artifact } => {
            let merged = load_merged_return(&artifact)
                .with_context(|| format!("reading {}", artifact.display()))?;
            println!("layout: {} ({} returns)", merged.layout, merged.document_count);
            for (key, table) in &merged.tables {
                println!("  Table {:<6} {} rows x {} cols", key.section(), table.height(), table.width());
            }
            for key in missing_keys(&merged) {
                println!("  Table {:<6} missing", key.section());
            }
        }
    }

    Ok(())
}
