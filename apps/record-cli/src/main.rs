use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::sync::Arc;
use tracing::info;

use record_motor::TwoThetaGeometry;
use record_runtime::{self as rt, DriverRegistry, MetricsHub, RecordList, RuntimeConfig};

#[derive(Parser, Debug)]
#[command(
    name = "rec",
    version,
    about = "Record database runtime CLI",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered drivers
    Drivers,
    /// Print the field table of a driver
    Fields {
        /// Driver name, e.g. soft_motor or double_variable
        driver: String,
    },
    /// Validate every registered driver table
    Validate,
    /// Load record descriptions, open them and print them back
    Load {
        /// Description line (repeatable)
        #[arg(long = "desc")]
        descriptions: Vec<String>,
        /// Database file with one description per line
        #[arg(long)]
        file: Option<String>,
        /// Runtime config YAML
        #[arg(long)]
        config: Option<String>,
        /// Print records as JSON
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
        /// Print each record's structure report
        #[arg(long, action = ArgAction::SetTrue)]
        report: bool,
        /// Print Prometheus metrics after loading
        #[arg(long, action = ArgAction::SetTrue)]
        metrics: bool,
    },
    /// Evaluate the two-theta height transform
    TwoTheta {
        /// Arm angle in degrees
        #[arg(long, conflicts_with = "height")]
        angle: Option<f64>,
        /// Carriage height in millimetres
        #[arg(long)]
        height: Option<f64>,
    },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Drivers => drivers(),
        Commands::Fields { driver } => fields(&driver),
        Commands::Validate => validate(),
        Commands::Load {
            descriptions,
            file,
            config,
            json,
            report,
            metrics,
        } => load(
            &descriptions,
            file.as_deref(),
            config.as_deref(),
            json,
            report,
            metrics,
        ),
        Commands::TwoTheta { angle, height } => two_theta(angle, height),
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn registry() -> Result<DriverRegistry> {
    let mut registry = DriverRegistry::new();
    record_variable::register_inline_variables(&mut registry)
        .context("registering variable drivers")?;
    record_motor::register_motor_drivers(&mut registry).context("registering motor drivers")?;
    Ok(registry)
}

fn drivers() -> Result<()> {
    let registry = registry()?;
    for entry in registry.drivers() {
        let superclass = registry.superclass_name(entry.triple.superclass).unwrap_or("?");
        let class = registry.class_name(entry.triple.class).unwrap_or("?");
        println!(
            "{}\t{superclass}/{class}\t{}\tfields={}",
            entry.name,
            entry.triple,
            entry.num_fields()
        );
    }
    Ok(())
}

fn fields(driver: &str) -> Result<()> {
    let registry = registry()?;
    let entry = registry
        .lookup_by_name(driver)
        .ok_or_else(|| anyhow::anyhow!("unknown driver: {driver}"))?;
    for (index, field) in entry.fields.iter().enumerate() {
        println!("{index:3}  {field}");
    }
    Ok(())
}

fn validate() -> Result<()> {
    let registry = registry()?;
    registry.validate_all()?;
    println!("ok: {} drivers", registry.len());
    Ok(())
}

fn load(
    descriptions: &[String],
    file: Option<&str>,
    config: Option<&str>,
    json: bool,
    report: bool,
    metrics: bool,
) -> Result<()> {
    let config = match config {
        Some(path) => rt::load_config_file(path)?,
        None => RuntimeConfig::default(),
    };
    let mut lines = descriptions.to_vec();
    if let Some(path) = file {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        lines.extend(text.lines().map(str::to_string));
    }
    if lines.is_empty() {
        return Err(anyhow::anyhow!("provide --desc <line> or --file <path>"));
    }

    let creation = config.creation_flags();
    let hardware = config.init_hardware_flags();
    let mut list = RecordList::with_config(Arc::new(registry()?), config);
    if metrics {
        list.set_metrics(MetricsHub::new().map_err(anyhow::Error::msg)?);
    }
    let handles = list.load_descriptions(lines.iter().map(String::as_str), creation)?;
    list.initialize_hardware(hardware)?;
    info!(records = handles.len(), "database ready");

    if json {
        let records = handles
            .iter()
            .map(|&h| list.to_json(h))
            .collect::<rt::Result<Vec<_>>>()?;
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        for &h in &handles {
            if report {
                let mut text = String::new();
                list.print_structure(h, &mut text)?;
                println!("{text}");
            } else {
                println!("{}", list.create_description_from_record(h)?);
            }
        }
    }
    if let Some(hub) = list.metrics() {
        print!("{}", hub.encode_text());
    }
    Ok(())
}

fn two_theta(angle: Option<f64>, height: Option<f64>) -> Result<()> {
    let geometry = TwoThetaGeometry::default();
    match (angle, height) {
        (Some(angle), None) => println!("{:.6}", geometry.height(angle)),
        (None, Some(height)) => println!("{:.6}", geometry.two_theta(height)?),
        _ => return Err(anyhow::anyhow!("provide --angle <deg> or --height <mm>")),
    }
    Ok(())
}
