//! `study` - runs one of the supervised-learning studies and prints its report.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use study_ml::config::{CancerModel, StudyConfig};
use study_ml::experiments::{and_gate, cancer, cifar, diabetes};

#[derive(Parser, Debug)]
#[command(name = "study", author, version, about = "Supervised-learning studies")]
struct Cli {
    /// TOML file with `[diabetes]`, `[cifar]`, `[and_gate]` and `[cancer]` sections
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dense regressor on the diabetes data
    Diabetes(DiabetesArgs),
    /// ResNet on CIFAR-10
    Cifar(CifarArgs),
    /// Linear SVC on the AND table
    AndGate(AndGateArgs),
    /// Random forest or decision tree on the breast cancer data
    Cancer(CancerArgs),
}

#[derive(Args, Debug)]
struct DiabetesArgs {
    /// Directory with diabetes_data_raw.csv[.gz] and diabetes_target.csv[.gz]
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    /// Seed for weight initialisation and shuffling
    #[arg(long)]
    seed: Option<u64>,

    /// Stop after this many epochs without validation improvement
    #[arg(long)]
    patience: Option<usize>,

    /// Directory to save the trained parameters to
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// Write TensorBoard scalars
    #[arg(long)]
    tensorboard: bool,
}

#[derive(Args, Debug)]
struct CifarArgs {
    /// Directory with the CIFAR-10 binary batches
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Use only the first N training images
    #[arg(long)]
    train_limit: Option<usize>,

    /// Use only the first N test images
    #[arg(long)]
    test_limit: Option<usize>,

    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    #[arg(long)]
    tensorboard: bool,
}

#[derive(Args, Debug)]
struct AndGateArgs {
    /// Inverse regularisation strength
    #[arg(long)]
    c: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct CancerArgs {
    /// CSV with the `n_samples,n_features,...` header
    #[arg(long)]
    data_path: Option<PathBuf>,

    #[arg(long, value_enum)]
    model: Option<CancerModel>,

    #[arg(long)]
    n_estimators: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Where to write the feature-importance SVG
    #[arg(long, conflicts_with = "no_plot")]
    plot: Option<PathBuf>,

    /// Skip the chart
    #[arg(long)]
    no_plot: bool,
}

fn print_report<R: Serialize + std::fmt::Display>(report: &R, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{}", report);
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::from_default_env()
                .add_directive("study_ml=info".parse()?)
                .add_directive("study=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match cli.config.as_ref() {
        Some(path) => StudyConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => StudyConfig::default(),
    };

    match cli.command {
        Commands::Diabetes(args) => {
            let cfg = &mut config.diabetes;
            if let Some(dir) = args.data_dir {
                cfg.data_dir = dir;
            }
            if let Some(epochs) = args.epochs {
                cfg.epochs = epochs;
            }
            if let Some(seed) = args.seed {
                cfg.seed = seed;
            }
            if args.patience.is_some() {
                cfg.patience = args.patience;
            }
            if args.checkpoint_dir.is_some() {
                cfg.checkpoint_dir = args.checkpoint_dir;
            }
            cfg.tensorboard |= args.tensorboard;

            info!(data_dir = %cfg.data_dir.display(), epochs = cfg.epochs, "running diabetes");
            let report = diabetes::run(cfg).context("diabetes study failed")?;
            print_report(&report, cli.json)?;
        }
        Commands::Cifar(args) => {
            let cfg = &mut config.cifar;
            if let Some(dir) = args.data_dir {
                cfg.data_dir = dir;
            }
            if let Some(epochs) = args.epochs {
                cfg.epochs = epochs;
            }
            if let Some(seed) = args.seed {
                cfg.seed = seed;
            }
            if args.train_limit.is_some() {
                cfg.train_limit = args.train_limit;
            }
            if args.test_limit.is_some() {
                cfg.test_limit = args.test_limit;
            }
            if args.checkpoint_dir.is_some() {
                cfg.checkpoint_dir = args.checkpoint_dir;
            }
            cfg.tensorboard |= args.tensorboard;

            info!(data_dir = %cfg.data_dir.display(), epochs = cfg.epochs, "running cifar");
            let report = cifar::run(cfg).context("cifar study failed")?;
            print_report(&report, cli.json)?;
        }
        Commands::AndGate(args) => {
            let cfg = &mut config.and_gate;
            if let Some(c) = args.c {
                cfg.c = c;
            }
            if let Some(seed) = args.seed {
                cfg.seed = seed;
            }

            let report = and_gate::run(cfg).context("and-gate study failed")?;
            print_report(&report, cli.json)?;
        }
        Commands::Cancer(args) => {
            let cfg = &mut config.cancer;
            if let Some(path) = args.data_path {
                cfg.data_path = path;
            }
            if let Some(model) = args.model {
                cfg.model = model;
            }
            if let Some(n) = args.n_estimators {
                cfg.n_estimators = n;
            }
            if let Some(seed) = args.seed {
                cfg.seed = seed;
            }
            if args.plot.is_some() {
                cfg.plot_path = args.plot;
            }
            if args.no_plot {
                cfg.plot_path = None;
            }

            info!(data_path = %cfg.data_path.display(), model = ?cfg.model, "running cancer");
            let report = cancer::run(cfg).context("cancer study failed")?;
            print_report(&report, cli.json)?;
        }
    }

    Ok(())
}
