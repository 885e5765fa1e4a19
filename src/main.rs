use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use cloudgraph::client::http::format_api_error;
use cloudgraph::client::{ClientRegistry, HttpFactory, Params, ReplayFactory, TransportFactory};
use cloudgraph::config::Config;
use cloudgraph::query::Exclude;
use cloudgraph::resource::timeseries::DEFAULT_PERIOD_SECONDS;
use cloudgraph::resource::{
    alarm_history, builtin_catalog, HistoryRequest, ListRequest, Resource, Session,
    StatisticsRequest,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Version injected at compile time via CLOUDGRAPH_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("CLOUDGRAPH_VERSION") {
    Some(v) => v,
    None => "dev",
};

/// Query a cloud account as a graph of related resources
#[derive(Parser, Debug)]
#[command(name = "cloudgraph", version, about, long_about = None)]
struct Args {
    /// Region to query
    #[arg(short, long, global = true)]
    region: Option<String>,

    /// Control-plane gateway endpoint
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Replay responses from a YAML fixture file instead of calling an endpoint
    #[arg(long, global = true)]
    fixtures: Option<PathBuf>,

    /// Batch size for chunked describe calls
    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json", global = true)]
    output: OutputFormat,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List known resource kinds
    Kinds,
    /// Show the account id of the configured credentials
    Account,
    /// Fetch exactly one resource by identity
    Get {
        kind: String,
        /// Identity fields as key=value
        #[arg(value_name = "KEY=VALUE")]
        identity: Vec<String>,
        /// Relation paths to load, e.g. launch_configuration__security_groups
        #[arg(long = "with-related")]
        with_related: Vec<String>,
    },
    /// List every resource of a kind
    List {
        kind: String,
        /// Listing parameters as key=value
        #[arg(value_name = "KEY=VALUE")]
        params: Vec<String>,
        #[arg(long = "with-related")]
        with_related: Vec<String>,
    },
    /// List resources matching path__operation=value conditions
    Filter {
        kind: String,
        /// Conditions and listing parameters as key=value
        #[arg(value_name = "KEY=VALUE")]
        conditions: Vec<String>,
        /// Conditions whose matches are dropped
        #[arg(long, value_name = "KEY=VALUE")]
        exclude: Vec<String>,
    },
    /// Metric samples for one resource
    Stats {
        kind: String,
        /// Identity fields as key=value
        #[arg(value_name = "KEY=VALUE")]
        identity: Vec<String>,
        /// Metric name, e.g. CPUUtilization
        #[arg(long)]
        metric: String,
        /// Window length in hours, ending now
        #[arg(long, default_value_t = 3)]
        hours: i64,
        /// Seconds between samples
        #[arg(long, default_value_t = DEFAULT_PERIOD_SECONDS)]
        period: u32,
        /// Statistics to request (default Average)
        #[arg(long = "statistic")]
        statistics: Vec<String>,
    },
    /// Alarm state changes and actions, newest first
    AlarmHistory {
        /// Restrict to one alarm
        #[arg(long)]
        alarm: Option<String>,
        /// Window length in hours, ending now
        #[arg(long, default_value_t = 24)]
        hours: i64,
        /// ConfigurationUpdate, StateUpdate or Action
        #[arg(long)]
        item_type: Option<String>,
    },
    /// Show or change the saved configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the saved configuration
    Show,
    /// Save the default region
    SetRegion { region: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file {}: {}", log_path.display(), e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("cloudgraph {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("cloudgraph").join("cloudgraph.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".cloudgraph").join("cloudgraph.log");
    }
    PathBuf::from("cloudgraph.log")
}

/// Parse `key=value`; values are JSON when they parse as JSON, else strings
fn parse_pairs(pairs: &[String]) -> Result<Params> {
    let mut params = Params::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("Expected KEY=VALUE, got {}", pair))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        params.insert(key.to_string(), value);
    }
    Ok(params)
}

fn build_session(args: &Args, config: &Config) -> Result<Session> {
    let region = config.effective_region(args.region.as_deref());
    let fixtures = args.fixtures.clone().or_else(|| config.fixtures.clone());
    let endpoint = args.endpoint.clone().or_else(|| config.endpoint.clone());

    let factory: Arc<dyn TransportFactory> = match (fixtures, endpoint) {
        (Some(path), _) => Arc::new(ReplayFactory::from_path(&path)?),
        (None, Some(endpoint)) => Arc::new(HttpFactory::new(&endpoint)?),
        (None, None) => anyhow::bail!(
            "No endpoint configured. Use --endpoint, --fixtures or set one in {}",
            Config::config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "the config file".to_string())
        ),
    };

    tracing::info!("Using region: {}", region);

    let registry = ClientRegistry::from_factory(factory, &region, config.pool());
    Ok(Session::builder(registry)
        .chunk_size(config.effective_chunk_size(args.chunk_size))
        .build())
}

fn print_value<T: serde::Serialize>(format: OutputFormat, value: &T) -> Result<()> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
    };
    println!("{}", rendered);
    Ok(())
}

/// Window of `hours` ending now
fn window(hours: i64) -> Result<(chrono::DateTime<Utc>, chrono::DateTime<Utc>)> {
    let length = Duration::try_hours(hours)
        .with_context(|| format!("{} hours is out of range", hours))?;
    let end = Utc::now();
    Ok((end - length, end))
}

async fn run(args: Args) -> Result<()> {
    let mut config = Config::load();

    match &args.command {
        Command::Kinds => {
            let kinds: Vec<&str> = builtin_catalog().names().collect();
            print_value(args.output, &kinds)
        }
        Command::Config { action } => match action {
            ConfigAction::Show => print_value(args.output, &config),
            ConfigAction::SetRegion { region } => {
                config.set_region(region)?;
                println!("Default region set to {}", region);
                Ok(())
            }
        },
        Command::Account => {
            let session = build_session(&args, &config)?;
            let account = session.registry().account().await?;
            println!("{}", account);
            Ok(())
        }
        Command::Get {
            kind,
            identity,
            with_related,
        } => {
            let session = build_session(&args, &config)?;
            let resource = session
                .resources(kind)?
                .get_with_related(parse_pairs(identity)?, with_related.as_slice())
                .await?;
            print_value(args.output, &resource)
        }
        Command::List {
            kind,
            params,
            with_related,
        } => {
            let session = build_session(&args, &config)?;
            let request = with_related
                .iter()
                .fold(ListRequest::new().params(parse_pairs(params)?), |r, path| {
                    r.with_related(path.as_str())
                });
            let resources = session.resources(kind)?.list(request).await?;
            print_value(args.output, &resources)
        }
        Command::Filter {
            kind,
            conditions,
            exclude,
        } => {
            let session = build_session(&args, &config)?;
            let mut resources: Vec<Resource> = session
                .resources(kind)?
                .filter(parse_pairs(conditions)?)
                .await?;
            if !exclude.is_empty() {
                let exclude = Exclude::parse(parse_pairs(exclude)?)?;
                resources = exclude.run(&session, resources).await?;
            }
            print_value(args.output, &resources)
        }
        Command::Stats {
            kind,
            identity,
            metric,
            hours,
            period,
            statistics,
        } => {
            let session = build_session(&args, &config)?;
            let resource = session.resources(kind)?.get(parse_pairs(identity)?).await?;
            let (start, end) = window(*hours)?;
            let request = statistics.iter().fold(
                StatisticsRequest::new(metric.as_str())
                    .window(start, end)
                    .period_seconds(*period),
                |r, statistic| r.statistic(statistic.as_str()),
            );
            let samples = resource.statistics(&session, &request).await?;
            print_value(args.output, &samples)
        }
        Command::AlarmHistory {
            alarm,
            hours,
            item_type,
        } => {
            let session = build_session(&args, &config)?;
            let (start, end) = window(*hours)?;
            let mut request = HistoryRequest::new(start, end);
            request.alarm_name = alarm.clone();
            request.item_type = item_type.clone();
            let history = alarm_history(&session, &request).await?;
            print_value(args.output, &history)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    if let Err(err) = run(args).await {
        let message = match err.downcast_ref::<cloudgraph::Error>() {
            Some(cloudgraph::Error::Transport(inner)) => format_api_error(inner),
            _ => format!("{:#}", err),
        };
        tracing::error!("{}", message);
        eprintln!("Error: {}", message);
        std::process::exit(1);
    }

    Ok(())
}
