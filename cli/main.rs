#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use itertools::Itertools;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use carprice::config::AppConfig;
use carprice::overview::catalog::Catalog;
use carprice::overview::{CATEGORY_COLUMNS, PriceTable};
use carprice::pipeline::{read_csv_table, write_csv_table};
use carprice::quote::format_thousands;
use carprice::{EstimateError, Estimator, VehicleRecord};

/// Rows shown before and after a batch prediction.
const BATCH_PREVIEW_ROWS: usize = 10;

#[derive(Parser)]
#[command(
    name = "carprice",
    about = "Used-car price estimates for the Saudi market",
    long_about = "Quotes a single vehicle or a CSV of vehicles against a pre-trained \
                 boosted-tree price model, and summarizes listing prices by category."
)]
struct Cli {
    /// Settings file (defaults to ./carprice.toml when present)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Model source: a URL to the raw artifact file or a local path
    #[arg(long, global = true, value_name = "URL")]
    model: Option<String>,

    /// Expected SHA-256 of the model artifact
    #[arg(long, global = true, value_name = "HEX")]
    sha256: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct QuoteArgs {
    #[arg(long)]
    make: String,

    #[arg(long = "type", value_name = "TYPE")]
    vehicle_type: String,

    /// Model year (2003 - 2022)
    #[arg(long, default_value_t = 2010)]
    year: i64,

    #[arg(long)]
    origin: String,

    #[arg(long)]
    color: String,

    #[arg(long)]
    options: String,

    /// Engine size in litres (1.0 - 9.0)
    #[arg(long, default_value_t = 5.0)]
    engine_size: f64,

    #[arg(long)]
    fuel_type: String,

    #[arg(long)]
    gear_type: String,

    /// Mileage in km (0 - 376000)
    #[arg(long, default_value_t = 0)]
    mileage: i64,

    #[arg(long)]
    region: String,

    /// Reference listings CSV; when given, labels must be values it contains
    #[arg(long, value_name = "CSV")]
    catalog: Option<PathBuf>,
}

impl QuoteArgs {
    fn record(&self) -> VehicleRecord {
        VehicleRecord {
            make: self.make.clone(),
            vehicle_type: self.vehicle_type.clone(),
            year: self.year,
            origin: self.origin.clone(),
            color: self.color.clone(),
            options: self.options.clone(),
            engine_size: self.engine_size,
            fuel_type: self.fuel_type.clone(),
            gear_type: self.gear_type.clone(),
            mileage: self.mileage,
            region: self.region.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate the price of one vehicle
    Quote(QuoteArgs),

    /// Predict prices for every row of a CSV file
    Batch {
        /// CSV with a header row and all model feature columns
        #[arg(value_name = "CSV")]
        input: PathBuf,

        /// Where to write the input plus a Prediction column
        #[arg(long, default_value = "predictions.csv")]
        output: PathBuf,
    },

    /// Summarize listing prices by category
    Overview {
        /// CSV with a Price column
        #[arg(value_name = "CSV")]
        input: PathBuf,

        /// Category column to summarize (defaults to the first one present)
        #[arg(long)]
        category: Option<String>,

        /// Directory to write avg_price_by_<category>.csv into
        #[arg(long, value_name = "DIR")]
        export: Option<PathBuf>,
    },

    /// List the selectable form values found in a reference listings CSV
    Choices {
        #[arg(value_name = "CSV")]
        catalog: PathBuf,
    },

    /// Show version information
    Version,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli {
        config,
        model,
        sha256,
        command,
    } = cli;

    let settings = || -> Result<AppConfig, EstimateError> {
        let mut settings = AppConfig::discover(config.as_deref())?;
        settings.apply_flags(model.as_deref(), sha256.as_deref());
        Ok(settings)
    };

    let result = match command {
        Some(Commands::Quote(args)) => settings().and_then(|s| run_quote(s, &args)),
        Some(Commands::Batch { input, output }) => {
            settings().and_then(|s| run_batch(s, &input, &output))
        }
        Some(Commands::Overview {
            input,
            category,
            export,
        }) => run_overview(&input, category.as_deref(), export.as_deref()),
        Some(Commands::Choices { catalog }) => run_choices(&catalog),
        Some(Commands::Version) => {
            print_version_info();
            Ok(())
        }
        None => {
            if let Err(e) = Cli::command().print_help() {
                eprintln!("Could not print help: {e}");
            }
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e.user_message());
        process::exit(1);
    }
}

fn create_spinner(message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(None, draw_target);
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Runs `work` behind a spinner. The first request also downloads the model.
fn with_spinner<R>(message: &str, work: impl FnOnce() -> R) -> R {
    let spinner = create_spinner(message);
    let result = work();
    spinner.finish_and_clear();
    result
}

fn run_quote(settings: AppConfig, args: &QuoteArgs) -> Result<(), EstimateError> {
    let record = args.record();
    if let Some(path) = &args.catalog {
        Catalog::from_csv(path)?.validate(&record)?;
    }

    let estimator = Estimator::from_config(settings)?;
    let band = with_spinner("Loading the model and estimating...", || {
        estimator.quote(&record)
    })?;
    println!("{}", band.render(&estimator.config().currency));
    Ok(())
}

fn run_batch(settings: AppConfig, input: &Path, output: &Path) -> Result<(), EstimateError> {
    let upload = read_csv_table(input)?;
    println!("Loaded {} rows from {}.", upload.height(), input.display());
    println!("{}", upload.head(Some(BATCH_PREVIEW_ROWS)));

    let estimator = Estimator::from_config(settings)?;
    let mut predicted = with_spinner("Loading the model and predicting...", || {
        estimator.predict_batch(upload)
    })?;

    // Already loaded by the batch above.
    let engine = estimator.engine()?;
    println!("Model: {}", engine.describe());
    println!(
        "Feature order: {}",
        estimator.spec().feature_order().iter().join(", ")
    );
    if let Some(kind) = engine.kind() {
        println!("Prediction path: {kind:?}");
    }
    println!("{}", predicted.head(Some(BATCH_PREVIEW_ROWS)));

    write_csv_table(&mut predicted, output)?;
    println!("Predictions written to {}.", output.display());
    Ok(())
}

fn run_overview(
    input: &Path,
    category: Option<&str>,
    export: Option<&Path>,
) -> Result<(), EstimateError> {
    let table = PriceTable::from_csv(input)?;
    println!(
        "Loaded {} with {} rows.",
        input.display(),
        format_thousands(table.frame().height() as f64)
    );
    if table.dropped_rows() > 0 {
        println!(
            "{} rows have an invalid Price and were ignored.",
            format_thousands(table.dropped_rows() as f64)
        );
    }

    let available = table.available_categories();
    if available.is_empty() {
        println!(
            "No standard category columns found. Add one of: {}",
            CATEGORY_COLUMNS.join(", ")
        );
    } else {
        println!("Category columns detected: {}", available.join(", "));
    }

    println!("\nPreview");
    println!("{}", table.preview());

    let stats = table.quick_stats()?;
    let shown = |value: Option<f64>| value.map_or_else(|| "n/a".to_string(), format_thousands);
    println!("\nQuick stats");
    println!("  Rows:         {}", format_thousands(stats.rows as f64));
    println!("  Mean Price:   {}", shown(stats.mean));
    println!("  Median Price: {}", shown(stats.median));
    println!("  Std Price:    {}", format_thousands(stats.std));

    let Some(selected) = category.or_else(|| available.first().copied()) else {
        return Ok(());
    };
    let summary = table.summarize(selected)?;
    if summary.is_truncated() {
        println!(
            "\n{selected} has {} categories; only the top {} by average Price are charted.",
            format_thousands(summary.levels() as f64),
            carprice::overview::CHART_LIMIT
        );
    }
    println!("\nAverage Price by {selected}");
    println!("{}", summary.chart_rows());
    println!("\nTop {selected} by Count");
    println!("{}", summary.top_counts());

    if let Some(dir) = export {
        let path = summary.export(dir)?;
        println!("Averages written to {}.", path.display());
    }
    Ok(())
}

fn run_choices(path: &Path) -> Result<(), EstimateError> {
    let catalog = Catalog::from_csv(path)?;

    println!("Make -> Type");
    for (make, types) in &catalog.types_by_make {
        println!("  {make}: {}", types.iter().join(", "));
    }
    println!("Origin -> Region");
    for (origin, regions) in &catalog.regions_by_origin {
        println!("  {origin}: {}", regions.iter().join(", "));
    }
    for (label, values) in [
        ("Gear_Type", &catalog.gear_types),
        ("Options", &catalog.options),
        ("Color", &catalog.colors),
        ("Fuel_Type", &catalog.fuel_types),
    ] {
        println!("{label}: {}", values.iter().join(", "));
    }
    Ok(())
}

fn print_version_info() {
    println!("carprice {}", env!("CARGO_PKG_VERSION"));
    match option_env!("CARPRICE_RELEASE_TAG") {
        Some(tag) => println!("Release: {tag}"),
        None => println!("Release: development build"),
    }
    println!(
        "Categorical pool support: {}",
        if cfg!(feature = "categorical-pool") {
            "enabled"
        } else {
            "disabled"
        }
    );
}
