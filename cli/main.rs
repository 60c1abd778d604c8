#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::error::Error;
use std::process;

use gsvb::data::{RegressionData, load_regression_data};
use gsvb::elbo::{ElboEstimator, MonteCarloElbo};
use gsvb::fit::CaviDriver;
use gsvb::model::{FitConfig, FitResult, FitStatus, VariationalState};

/// Input files shared by every subcommand.
#[derive(Args)]
pub struct DataArgs {
    /// Path to a tab-separated data file: a header row, then one row per observation
    pub data: String,

    /// Path to a tab-separated groups file with `feature` and `group` columns
    #[arg(long, value_name = "PATH")]
    pub groups: String,

    /// Name of the response column in the data file
    #[arg(long, default_value = "y")]
    pub response: String,

    /// Optional TOML file with [hyperparameters] and [options] tables
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,
}

#[derive(Args)]
pub struct FitArgs {
    #[command(flatten)]
    pub input: DataArgs,

    /// Previous result file to warm-start mu, s, g, tau_a and tau_b from
    #[arg(long, value_name = "PATH")]
    pub init: Option<String>,

    /// Where to write the fit result
    #[arg(long, default_value = "fit_result.toml")]
    pub output: String,

    /// Group penalty strength of the slab
    #[arg(long)]
    pub lambda: Option<f64>,

    /// Prior inclusion shape a0; the prior inclusion weight is a0 / (a0 + b0)
    #[arg(long)]
    pub a0: Option<f64>,

    /// Prior inclusion shape b0
    #[arg(long)]
    pub b0: Option<f64>,

    /// Prior Gamma shape of the residual precision
    #[arg(long)]
    pub tau_a0: Option<f64>,

    /// Prior Gamma rate of the residual precision
    #[arg(long)]
    pub tau_b0: Option<f64>,

    /// Maximum number of outer coordinate-ascent iterations
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// L1 tolerance on the per-iteration change of mu, s and g
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// Record Monte-Carlo ELBO samples during the fit
    #[arg(long)]
    pub track_elbo: bool,

    /// Sample the ELBO after every N-th iteration
    #[arg(long, value_name = "N")]
    pub track_elbo_every: Option<usize>,

    /// Monte-Carlo draws per ELBO evaluation
    #[arg(long, value_name = "N")]
    pub elbo_mc_samples: Option<usize>,

    /// Seed of the ELBO random source
    #[arg(long)]
    pub elbo_seed: Option<u64>,

    /// Show per-iteration progress
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Args)]
pub struct ElboArgs {
    #[command(flatten)]
    pub input: DataArgs,

    /// Result file whose variational state is evaluated
    #[arg(long, value_name = "PATH")]
    pub fit: String,

    /// Monte-Carlo draws; defaults to the configured elbo_mc_samples
    #[arg(long, value_name = "N")]
    pub mc_samples: Option<usize>,

    /// Seed of the random source; defaults to the configured elbo_seed
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Parser)]
#[command(
    name = "gsvb",
    version,
    about = "Variational Bayes for linear regression under a group spike-and-slab prior"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit the variational posterior by coordinate ascent
    #[command(about = "Fit the variational posterior (outputs: fit_result.toml)")]
    Fit(FitArgs),

    /// Evaluate the evidence lower bound of a saved fit
    #[command(about = "Estimate the ELBO of a saved fit")]
    Elbo(ElboArgs),
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Commands::Fit(args)) => run_fit(args),
        Some(Commands::Elbo(args)) => run_elbo(args),
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(|e| Box::new(e) as Box<dyn Error>),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_config(path: Option<&str>) -> Result<FitConfig, Box<dyn Error>> {
    match path {
        Some(path) => {
            println!("Loading configuration from: {path}");
            Ok(FitConfig::load(path)?)
        }
        None => Ok(FitConfig::default()),
    }
}

fn load_data(input: &DataArgs) -> Result<RegressionData, Box<dyn Error>> {
    println!("Loading data from: {}", input.data);
    let data = load_regression_data(&input.data, &input.groups, &input.response)?;
    println!(
        "Loaded {} observations with {} coefficients in {} groups",
        data.num_observations(),
        data.num_coefficients(),
        data.partition.num_groups()
    );
    Ok(data)
}

/// Applies command-line overrides on top of the configuration file.
fn apply_overrides(config: &mut FitConfig, args: &FitArgs) {
    let hyper = &mut config.hyperparameters;
    if let Some(v) = args.lambda {
        hyper.lambda = v;
    }
    if let Some(v) = args.a0 {
        hyper.a0 = v;
    }
    if let Some(v) = args.b0 {
        hyper.b0 = v;
    }
    if let Some(v) = args.tau_a0 {
        hyper.tau_a0 = v;
    }
    if let Some(v) = args.tau_b0 {
        hyper.tau_b0 = v;
    }

    let options = &mut config.options;
    if let Some(v) = args.max_iterations {
        options.max_iterations = v;
    }
    if let Some(v) = args.tolerance {
        options.tolerance = v;
    }
    if let Some(v) = args.track_elbo_every {
        options.track_elbo_every = v;
    }
    if let Some(v) = args.elbo_mc_samples {
        options.elbo_mc_samples = v;
    }
    if let Some(v) = args.elbo_seed {
        options.elbo_seed = v;
    }
    options.track_elbo |= args.track_elbo;
    options.verbose |= args.verbose;
}

fn run_fit(args: FitArgs) -> Result<(), Box<dyn Error>> {
    let mut config = load_config(args.input.config.as_deref())?;
    apply_overrides(&mut config, &args);
    let data = load_data(&args.input)?;

    let initial = match &args.init {
        Some(path) => {
            println!("Warm-starting from: {path}");
            FitResult::load(path)?.state
        }
        None => VariationalState::default_start(data.num_coefficients(), &config.hyperparameters),
    };

    let driver = CaviDriver::new(&data, &config.hyperparameters, &config.options);
    let result = if config.options.verbose {
        let mut bar = ProgressBar::new(config.options.max_iterations as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
            )?
            .progress_chars("=> "),
        );
        driver.with_progress(&mut bar).run(initial)?
    } else {
        driver.run(initial)?
    };

    match result.status {
        FitStatus::Converged => println!("Converged after {} iterations.", result.iterations),
        FitStatus::Exhausted => println!(
            "Stopped after {} iterations without converging.",
            result.iterations
        ),
        FitStatus::Interrupted => println!("Interrupted after {} iterations.", result.iterations),
        FitStatus::Degenerate => println!(
            "Stopped after {} iterations on a degenerate update; the last valid state was kept.",
            result.iterations
        ),
    }
    if let Some(last) = result.elbo.last() {
        println!("Final ELBO estimate: {last:.4}");
    }
    print_summary(&data, &result);

    result.save(&args.output)?;
    println!("Fit result saved to: {}", args.output);
    Ok(())
}

fn print_summary(data: &RegressionData, result: &FitResult) {
    let state = &result.state;
    println!(
        "Noise precision: E[tau] = {:.4} (tau_a = {:.4}, tau_b = {:.4})",
        state.precision().expected(),
        state.tau_a,
        state.tau_b
    );
    println!("{:<20} {:>8} {:>12} {:>12} {:>8}", "feature", "group", "mu", "s", "g");
    for j in 0..state.num_coefficients() {
        let name = data
            .feature_names
            .get(j)
            .cloned()
            .unwrap_or_else(|| format!("x{}", j + 1));
        println!(
            "{:<20} {:>8} {:>12.5} {:>12.5} {:>8.4}",
            name,
            data.partition.labels()[j],
            state.mu[j],
            state.s[j],
            state.g[j]
        );
    }
}

fn run_elbo(args: ElboArgs) -> Result<(), Box<dyn Error>> {
    let config = load_config(args.input.config.as_deref())?;
    let data = load_data(&args.input)?;
    let result = FitResult::load(&args.fit)?;

    let p = data.num_coefficients();
    if result.state.num_coefficients() != p {
        return Err(format!(
            "The fit in {} has {} coefficients but the data has {p}.",
            args.fit,
            result.state.num_coefficients()
        )
        .into());
    }

    let estimator = MonteCarloElbo::new(
        args.mc_samples.unwrap_or(config.options.elbo_mc_samples),
        args.seed.unwrap_or(config.options.elbo_seed),
    );
    let elbo = estimator.estimate(&data, &result.state, &config.hyperparameters);
    println!("ELBO estimate ({} draws): {elbo:.6}", estimator.samples);
    Ok(())
}
