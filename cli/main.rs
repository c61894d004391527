#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use ermkit::config::RunConfig;
use ermkit::factor::{
    self, AltProxGrad, FactorOutcome, FrobeniusLoss, NonNegReg, RegularizerUnsupervised,
};
use ermkit::fit::{FoldOptions, PathOptions, TrainOptions, default_lambda_grid};
use ermkit::losses::{HuberLoss, LogisticLoss, Loss, QuadLoss};
use ermkit::model::Model;
use ermkit::regularizers::{OneReg, QuadReg, Regularizer, ZeroReg};
use ermkit::source::{FeatureSpec, Table, TableSource};
use ermkit::split::TrainFrac;

#[derive(Parser)]
#[command(
    name = "ermkit",
    about = "Fit regularized linear models and low-rank factorizations to tabular data",
    long_about = "Fits regularized empirical risk minimization models with train/test splits, \
                  k-fold cross-validation, or a warm-started regularization path, and factorizes \
                  numeric matrices by alternating proximal gradient."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit once on a train/test split
    Train(TrainArgs),
    /// Run k-fold cross-validation at one lambda
    Folds(FoldsArgs),
    /// Fit a regularization path on a train/test split
    Path(PathArgs),
    /// Factorize a numeric matrix into two low-rank factors
    Factor(FactorArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum LossCli {
    Quad,
    Logistic,
    Huber,
}

#[derive(Clone, Copy, ValueEnum)]
enum RegCli {
    Zero,
    Quad,
    One,
}

#[derive(Clone, Copy, ValueEnum)]
enum FactorRegCli {
    Zero,
    Nonneg,
    One,
    Quad,
}

#[derive(Args)]
struct DataArgs {
    /// Delimited text file with a header row
    data: PathBuf,

    /// Target column (repeat for several targets)
    #[arg(long = "target", required = true, value_name = "COLUMN")]
    targets: Vec<String>,

    /// Input column (repeat for several); all non-target columns plus an intercept when omitted
    #[arg(long = "input", value_name = "COLUMN")]
    inputs: Vec<String>,

    #[arg(long, value_enum, default_value_t = LossCli::Quad)]
    loss: LossCli,

    #[arg(long, value_enum, default_value_t = RegCli::Quad)]
    reg: RegCli,

    /// TOML file with [model] settings; flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Field delimiter: a single character, or "tab"
    #[arg(long, default_value = ",")]
    delimiter: String,

    /// Seed for the split and fold generator
    #[arg(long)]
    seed: Option<u64>,

    /// Log data reads and fit summaries
    #[arg(long)]
    verbose: bool,

    /// Also write the results as TOML to this file
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

#[derive(Args)]
struct TrainArgs {
    #[command(flatten)]
    data: DataArgs,

    #[arg(long, default_value = "1e-10")]
    lambda: f64,

    /// Fraction of rows used for training
    #[arg(long)]
    train_frac: Option<f64>,
}

#[derive(Args)]
struct FoldsArgs {
    #[command(flatten)]
    data: DataArgs,

    #[arg(long, default_value = "1e-10")]
    lambda: f64,

    #[arg(long, default_value = "5")]
    nfolds: usize,
}

#[derive(Args)]
struct PathArgs {
    #[command(flatten)]
    data: DataArgs,

    /// Comma-separated lambda values, fitted in order
    #[arg(long, value_delimiter = ',')]
    lambdas: Vec<f64>,

    #[arg(long, default_value = "0.8")]
    train_frac: f64,
}

#[derive(Args)]
struct FactorArgs {
    /// Delimited text file with a header row; every column is used
    data: PathBuf,

    #[arg(long)]
    rank: Option<usize>,

    #[arg(long, value_enum, default_value_t = FactorRegCli::Zero)]
    reg: FactorRegCli,

    /// Strength of the one or quad regularizer
    #[arg(long, default_value = "0.1")]
    lambda: f64,

    #[arg(long)]
    max_iters: Option<usize>,

    #[arg(long)]
    tol: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,

    /// TOML file with [factor] settings; flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Field delimiter: a single character, or "tab"
    #[arg(long, default_value = ",")]
    delimiter: String,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Train(args) => run_train(args),
        Commands::Folds(args) => run_folds(args),
        Commands::Path(args) => run_path(args),
        Commands::Factor(args) => run_factor(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_train(args: TrainArgs) -> Result<(), Box<dyn Error>> {
    let mut model = build_model(&args.data)?;
    let options = TrainOptions {
        lambda: args.lambda,
        train_frac: args.train_frac.map(TrainFrac::Fraction),
        resplit: false,
    };
    let results = model.train(&options)?;
    println!("{results}");
    write_report(args.data.report.as_deref(), results)
}

fn run_folds(args: FoldsArgs) -> Result<(), Box<dyn Error>> {
    let mut model = build_model(&args.data)?;
    let options = FoldOptions {
        lambda: args.lambda,
        nfolds: args.nfolds,
        resplit: false,
    };
    let results = model.train_folds(&options)?;
    print!("{results}");
    write_report(args.data.report.as_deref(), results)
}

fn run_path(args: PathArgs) -> Result<(), Box<dyn Error>> {
    let mut model = build_model(&args.data)?;
    let lambdas = if args.lambdas.is_empty() {
        default_lambda_grid()
    } else {
        args.lambdas
    };
    let options = PathOptions {
        lambdas,
        train_frac: TrainFrac::Fraction(args.train_frac),
        resplit: false,
    };
    let results = model.train_path(&options)?;
    print!("{results}");
    write_report(args.data.report.as_deref(), results)
}

fn run_factor(args: FactorArgs) -> Result<(), Box<dyn Error>> {
    let mut config = load_config(args.config.as_deref())?.factor;
    if let Some(rank) = args.rank {
        config.rank = rank;
    }
    if let Some(max_iters) = args.max_iters {
        config.max_iters = max_iters;
    }
    if let Some(tol) = args.tol {
        config.tol = tol;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    config.validate()?;

    let table = Table::from_csv_path(&args.data, parse_delimiter(&args.delimiter)?)?;
    let c = table.to_matrix();
    println!(
        "Factorizing a {} x {} matrix at rank {}",
        c.nrows(),
        c.ncols(),
        config.rank
    );

    let reg: Box<dyn RegularizerUnsupervised> = match args.reg {
        FactorRegCli::Zero => Box::new(factor::ZeroReg),
        FactorRegCli::Nonneg => Box::new(NonNegReg),
        FactorRegCli::One => Box::new(factor::OneReg {
            lambda: args.lambda,
        }),
        FactorRegCli::Quad => Box::new(factor::QuadReg {
            lambda: args.lambda,
        }),
    };
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let outcome = AltProxGrad::new(FrobeniusLoss, reg, config.options()).fit(
        c.view(),
        config.rank,
        None,
        &mut rng,
    )?;
    let trajectory = outcome.trajectory();
    println!("Outcome: {}", outcome.label());
    println!("Iterations: {}", trajectory.iterations);
    println!("Final loss: {:.6e}", outcome.final_loss());
    if let FactorOutcome::MaxIterationsExceeded(_) = outcome {
        log::warn!("The factorization did not converge; consider raising --max-iters.");
    }
    Ok(())
}

fn build_model(args: &DataArgs) -> Result<Model<TableSource>, Box<dyn Error>> {
    let mut config = load_config(args.config.as_deref())?.model;
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    config.verbose |= args.verbose;
    config.embed_all = args.inputs.is_empty();

    let table = Table::from_csv_path(&args.data, parse_delimiter(&args.delimiter)?)?;
    println!(
        "Loaded {} rows and {} columns from {}",
        table.nrows(),
        table.ncols(),
        args.data.display()
    );
    let source = TableSource::new(table, args.targets.clone())?;

    let loss: Box<dyn Loss> = match args.loss {
        LossCli::Quad => Box::new(QuadLoss),
        LossCli::Logistic => Box::new(LogisticLoss),
        LossCli::Huber => Box::new(HuberLoss::default()),
    };
    let reg: Box<dyn Regularizer> = match args.reg {
        RegCli::Zero => Box::new(ZeroReg),
        RegCli::Quad => Box::new(QuadReg),
        RegCli::One => Box::new(OneReg),
    };

    let mut model = Model::new(source, loss, reg, config)?;
    if !args.inputs.is_empty() {
        model.add_feature_u(FeatureSpec::intercept())?;
        for column in &args.inputs {
            model.add_feature_u(FeatureSpec::column(column.as_str()))?;
        }
        for column in &args.targets {
            model.add_feature_v(FeatureSpec::column(column.as_str()))?;
        }
    }
    Ok(model)
}

fn load_config(path: Option<&Path>) -> Result<RunConfig, Box<dyn Error>> {
    match path {
        Some(path) => Ok(RunConfig::load(path)?),
        None => Ok(RunConfig::default()),
    }
}

fn parse_delimiter(text: &str) -> Result<u8, Box<dyn Error>> {
    match text {
        "tab" | "\\t" | "\t" => Ok(b'\t'),
        _ => match text.as_bytes() {
            [byte] if byte.is_ascii() => Ok(*byte),
            _ => Err(format!(
                "Delimiter must be a single ASCII character or \"tab\", got \"{text}\"."
            )
            .into()),
        },
    }
}

fn write_report<T: Serialize>(path: Option<&Path>, results: &T) -> Result<(), Box<dyn Error>> {
    if let Some(path) = path {
        fs::write(path, toml::to_string_pretty(results)?)?;
        println!("Wrote results to {}", path.display());
    }
    Ok(())
}
