//! Operator CLI for Starlink dish telemetry.
//!
//! Provides one-shot commands for reading the dish and managing the
//! dashboard settings file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use dishwatch::collect::grpcurl::DEFAULT_DISH_ADDR;
use dishwatch::collect::ip::DEFAULT_PUBLIC_IP_URL;
use dishwatch::collect::{AddressResolver, Dish, GrpcurlDish, LocalAddress, PublicAddress};
use dishwatch::poller::UPTIME_FIELD;
use dishwatch::settings::DEFAULT_MAX_DATA_POINTS;
use dishwatch::store::unix_now;
use dishwatch::{ObstructionMap, Series, SettingsFile, Value, downsample, unroll};

/// dishwatch — Starlink dish telemetry CLI.
#[derive(Parser)]
#[command(name = "dishwatch", version, about)]
struct Cli {
    /// Dish gRPC address (host:port).
    #[arg(long, global = true, env = "STARLINK_URI", default_value = DEFAULT_DISH_ADDR)]
    dish_addr: String,

    /// grpcurl executable.
    #[arg(long, global = true, default_value = "grpcurl")]
    grpcurl: String,

    /// Timeout for a single grpcurl call in seconds.
    #[arg(long, global = true, default_value = "10")]
    timeout_secs: u64,

    /// Path to the settings file.
    #[arg(long, global = true, env = "DISHWATCH_SETTINGS", default_value = "dishwatch.toml")]
    settings: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Print the current dish status.
    Status,

    /// Fetch the dish history ring, unrolled into chronological order.
    History {
        /// Maximum number of rows to print.
        #[arg(long, default_value_t = DEFAULT_MAX_DATA_POINTS)]
        max_points: u64,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Fetch the sky obstruction map.
    ObstructionMap {
        /// Output format.
        #[arg(long, default_value = "ascii")]
        format: MapFormat,
    },

    /// Print the local address toward the dish and the public address.
    Ip {
        /// Plain-text service answering with the caller's address.
        #[arg(long, default_value = DEFAULT_PUBLIC_IP_URL)]
        public_url: String,
    },

    /// Show or change the dashboard settings.
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

/// Settings subcommands.
#[derive(Subcommand)]
enum SettingsAction {
    /// Print the persisted settings.
    Show,
    /// Flip whether the scheduled speedtest runs.
    ToggleSpeedtest,
}

/// Output format for history rows.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// Column-oriented JSON object.
    Json,
}

/// Output format for the obstruction map.
#[derive(Clone, ValueEnum)]
enum MapFormat {
    /// One character per cell.
    Ascii,
    /// The decoded map as JSON.
    Json,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let dish = GrpcurlDish::new(cli.dish_addr.clone())
        .with_program(cli.grpcurl.clone())
        .with_timeout(Duration::from_secs(cli.timeout_secs));

    let result = match cli.command {
        Commands::Status => cmd_status(&dish).await,
        Commands::History { max_points, format } => cmd_history(&dish, max_points, &format).await,
        Commands::ObstructionMap { format } => cmd_obstruction_map(&dish, &format).await,
        Commands::Ip { public_url } => {
            let public = PublicAddress::new(public_url).with_timeout(Duration::from_secs(cli.timeout_secs));
            cmd_ip(&cli.dish_addr, &public).await
        }
        Commands::Settings { action } => cmd_settings(&cli.settings, &action),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `dishwatch status`.
async fn cmd_status(dish: &GrpcurlDish) -> Result<(), Box<dyn std::error::Error>> {
    let row = dish.fetch_status().await?;

    let mut output = serde_json::Map::new();
    output.insert("timestamp".to_string(), serde_json::json!(row.timestamp));
    for (name, value) in &row.fields {
        output.insert(name.clone(), serde_json::to_value(value)?);
    }

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Implements `dishwatch history`.
async fn cmd_history(
    dish: &GrpcurlDish,
    max_points: u64,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    // Uptime only sharpens the unroll; history is still usable without it.
    let uptime = match dish.fetch_status().await {
        Ok(row) => row.get(UPTIME_FIELD).and_then(uptime_secs),
        Err(e) => {
            eprintln!("warning: status unavailable, uptime unknown: {e}");
            None
        }
    };

    let snapshot = dish.fetch_history().await?;
    let series = unroll(&snapshot, uptime, unix_now())?;
    let max_points = i64::try_from(max_points).unwrap_or(i64::MAX);
    let series = downsample(&series, max_points)?;

    match format {
        OutputFormat::Csv => {
            println!(
                "# current={}, buffer={}, rows={}",
                snapshot.current,
                snapshot.buffer_len()?,
                series.len()
            );
            print_csv(&series);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&series)?),
    }

    Ok(())
}

/// Implements `dishwatch obstruction-map`.
async fn cmd_obstruction_map(dish: &GrpcurlDish, format: &MapFormat) -> Result<(), Box<dyn std::error::Error>> {
    let map = dish.fetch_obstruction_map().await?;

    match format {
        MapFormat::Ascii => {
            println!(
                "# {}x{}, {:.1}% observed",
                map.num_rows,
                map.num_cols,
                map.coverage() * 100.0
            );
            for line in render_map(&map) {
                println!("{line}");
            }
        }
        MapFormat::Json => println!("{}", serde_json::to_string_pretty(&map)?),
    }

    Ok(())
}

/// Implements `dishwatch ip`.
async fn cmd_ip(dish_addr: &str, public: &PublicAddress) -> Result<(), Box<dyn std::error::Error>> {
    let local = LocalAddress::new(dish_addr).local_ip();
    println!("local:  {}", local.as_deref().unwrap_or("unknown"));

    let public = public.fetch().await?;
    println!("public: {public}");
    Ok(())
}

/// Implements `dishwatch settings`.
fn cmd_settings(path: &Path, action: &SettingsAction) -> Result<(), Box<dyn std::error::Error>> {
    let settings = SettingsFile::load_or_create(path)?;

    match action {
        SettingsAction::Show => {
            let current = settings.get();
            println!("Settings: {}", path.display());
            println!("  speedtest_enabled: {}", current.speedtest_enabled);
            println!("  max_data_points:   {}", current.max_data_points);
            println!("  history_secs:      {}", current.history_secs);
        }
        SettingsAction::ToggleSpeedtest => {
            let enabled = settings.toggle_speedtest()?;
            println!(
                "Scheduled speedtest {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
    }

    Ok(())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // checked finite and non-negative
fn uptime_secs(value: &Value) -> Option<u64> {
    let secs = value.to_number()?;
    (secs.is_finite() && secs >= 0.0).then(|| secs as u64)
}

/// Renders the map one line per row: blank where unobserved, `.` clear,
/// `+` partly obstructed, `#` obstructed.
fn render_map(map: &ObstructionMap) -> Vec<String> {
    map.rows()
        .map(|row| {
            row.iter()
                .map(|cell| match cell {
                    None => ' ',
                    Some(q) if *q >= 0.9 => '.',
                    Some(q) if *q >= 0.5 => '+',
                    Some(_) => '#',
                })
                .collect()
        })
        .collect()
}

fn print_csv(series: &Series) {
    let names: Vec<&str> = series.field_names().collect();
    println!("index,timestamp,{}", names.join(","));

    for (position, (index, timestamp)) in series.indices().iter().zip(series.timestamps()).enumerate() {
        let cells: Vec<String> = names
            .iter()
            .map(|name| csv_cell(series.value(position, name)))
            .collect();
        println!("{index},{timestamp},{}", cells.join(","));
    }
}

/// Formats a value as a CSV cell, quoting where needed.
fn csv_cell(value: &Value) -> String {
    let raw = match value {
        Value::Null => return String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Text(s) => s.clone(),
        Value::Structured(json) => json.to_string(),
    };

    if raw.contains([',', '"', '\n']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw
    }
}
