//! # brew_bench
//!
//! Command-line front end for the brewer test bench.
//!
//! ## Usage
//!
//! ```bash
//! # Run an operator plan with the scale and pump attached
//! brew_bench run --plan doe.csv
//!
//! # Ten random brews with bloom, brewer only
//! brew_bench --save-dir /data/ubts run --random 10 --bloom --base
//!
//! # Write a random plan without running it
//! brew_bench generate 20 --bloom
//! ```

use anyhow::{bail, Context, Result};
use brew_bench::adapters::{DeviceChannel, SerialAdapter};
use brew_bench::config::Settings;
use brew_bench::plan::TestPlan;
use brew_bench::runner::TestPlanRunner;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Automated brewer test bench
#[derive(Parser)]
#[command(name = "brew_bench")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/default.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory receiving run files and generated plans
    #[arg(short, long, value_name = "DIR")]
    save_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a test plan
    Run {
        /// Operator test plan CSV
        #[arg(long, value_name = "FILE", conflicts_with = "random")]
        plan: Option<PathBuf>,

        /// Generate this many random brews instead
        #[arg(long, value_name = "N")]
        random: Option<usize>,

        /// Include bloom parameters in generated brews
        #[arg(long)]
        bloom: bool,

        /// Brewer only: no scale or pump
        #[arg(long)]
        base: bool,
    },

    /// Generate and save a random test plan
    Generate {
        /// Number of brews
        count: usize,

        /// Include bloom parameters
        #[arg(long)]
        bloom: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(dir) = cli.save_dir {
        settings.application.save_dir = dir;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.application.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Generate { count, bloom } => {
            let plan = TestPlan::generate(count, bloom, &mut rand::thread_rng());
            let path = plan
                .save_generated(&settings.application.save_dir)
                .context("Failed to save test plan")?;
            println!("{}", path.display());
        }
        Commands::Run {
            plan,
            random,
            bloom,
            base,
        } => {
            let plan = match (plan, random) {
                (Some(path), _) => TestPlan::read_csv(&path)
                    .with_context(|| format!("Failed to read test plan {}", path.display()))?,
                (None, Some(count)) => {
                    let plan = TestPlan::generate(count, bloom, &mut rand::thread_rng());
                    plan.save_generated(&settings.application.save_dir)
                        .context("Failed to save generated test plan")?;
                    plan
                }
                (None, None) => bail!("Either --plan or --random is required"),
            };
            run_plan(&settings, &plan, base).await?;
        }
    }

    Ok(())
}

fn open(name: &str, link: &brew_bench::config::LinkConfig) -> Result<Box<dyn DeviceChannel>> {
    let adapter = SerialAdapter::open(link)
        .with_context(|| format!("Failed to open {} on {}", name, link.port))?;
    Ok(Box::new(adapter))
}

async fn run_plan(settings: &Settings, plan: &TestPlan, base: bool) -> Result<()> {
    let brewer = open("brewer", &settings.brewer.link)?;
    let scale_and_pump = if base {
        None
    } else {
        Some((
            open("scale", &settings.scale.link)?,
            open("pump", &settings.pump.link)?,
        ))
    };

    let mut runner = TestPlanRunner::from_settings(settings, brewer, scale_and_pump);
    runner.prepare().await.context("Brewer handshake failed")?;
    let report = runner.run(plan).await.context("Test plan aborted")?;

    info!(
        completed = report.completed(),
        no_brews = report.no_brews(),
        save_dir = %settings.application.save_dir.display(),
        "Done"
    );
    Ok(())
}
