//! mpegts-stream: MPEG-TS over UDP stream monitor.
//!
//! Receives transport streams on UDP, cuts them into chunk files, extracts
//! KLV telemetry and commits every chunk as a child record of a per-stream
//! parent record.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

mod catalog;
mod config;
mod database;
mod logging;
mod metacard;
mod monitor;
mod rollover;
mod ts_analyzer;
mod web;

use catalog::sqlite::SqliteCatalog;
use catalog::CatalogHandle;
use config::{PropertyMap, StreamMonitorConfig};
use monitor::MonitorRegistry;

/// Database handle type.
pub type DatabaseHandle = Arc<tokio::sync::Mutex<database::Database>>;

const DEFAULT_CONFIG_FILE: &str = "mpegts-stream.toml";
const DEFAULT_DATABASE: &str = "mpegts-stream.db";
const DEFAULT_CHUNK_DIR: &str = "chunks";
const DEFAULT_CONTENT_DIR: &str = "content";
const DEFAULT_WEB_LISTEN: &str = "127.0.0.1:8090";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_RETENTION_DAYS: u64 = 7;

/// mpegts-stream - MPEG-TS over UDP stream monitor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Path to the database file
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Directory for chunks being written
    #[arg(long)]
    chunk_dir: Option<PathBuf>,

    /// Directory where committed chunk content is stored
    #[arg(long)]
    content_dir: Option<PathBuf>,

    /// Address for the web API to listen on
    #[arg(long)]
    web_listen: Option<SocketAddr>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory where log files are stored
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Number of days to keep log files
    #[arg(long)]
    log_retention_days: Option<u64>,
}

/// Configuration file format.
#[derive(Debug, serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    database: DatabaseSection,
    #[serde(default)]
    storage: StorageSection,
    #[serde(default)]
    logging: LoggingSection,
    /// One property map per monitored stream.
    #[serde(default)]
    stream: Vec<PropertyMap>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct ServerSection {
    web_listen: Option<String>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct DatabaseSection {
    path: Option<String>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct StorageSection {
    chunk_dir: Option<String>,
    content_dir: Option<String>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct LoggingSection {
    log_dir: Option<String>,
    retention_days: Option<u64>,
    level: Option<String>,
}

fn load_config(path: &PathBuf) -> Result<ConfigFile, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Command line value, else file value, else default.
fn pick_path(arg: Option<PathBuf>, file: Option<String>, default: &str) -> PathBuf {
    arg.or_else(|| file.map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(default))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Explicit path > auto-detect > defaults
    let config_path = args.config.clone().or_else(|| {
        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        default_path.exists().then_some(default_path)
    });

    let file_config = match &config_path {
        Some(path) => match load_config(path) {
            Ok(c) => {
                eprintln!("Loaded config from: {}", path.display());
                c
            }
            Err(e) => {
                eprintln!("Failed to load config file {}: {}", path.display(), e);
                return Err(e);
            }
        },
        None => ConfigFile::default(),
    };

    let log_dir = pick_path(args.log_dir, file_config.logging.log_dir, DEFAULT_LOG_DIR);
    let log_retention_days = args
        .log_retention_days
        .or(file_config.logging.retention_days)
        .unwrap_or(DEFAULT_LOG_RETENTION_DAYS);
    let log_level = file_config.logging.level.as_deref().unwrap_or("info");
    logging::init_logging(&log_dir, log_retention_days, log_level, args.verbose)
        .expect("Failed to initialize logging");

    use log::{error, info, warn};

    let web_listen_addr = match args.web_listen {
        Some(addr) => addr,
        None => file_config
            .server
            .web_listen
            .as_deref()
            .unwrap_or(DEFAULT_WEB_LISTEN)
            .parse()?,
    };
    let db_path = pick_path(args.database, file_config.database.path, DEFAULT_DATABASE);
    let chunk_dir = pick_path(
        args.chunk_dir,
        file_config.storage.chunk_dir,
        DEFAULT_CHUNK_DIR,
    );
    let content_dir = pick_path(
        args.content_dir,
        file_config.storage.content_dir,
        DEFAULT_CONTENT_DIR,
    );

    info!("Opening database: {:?}", db_path);
    let db = match database::Database::open(&db_path) {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open database: {}", e);
            return Err(e.into());
        }
    };
    let db: DatabaseHandle = Arc::new(tokio::sync::Mutex::new(db));

    std::fs::create_dir_all(&chunk_dir)?;
    std::fs::create_dir_all(&content_dir)?;
    info!("Chunk directory: {}", chunk_dir.display());
    info!("Content directory: {}", content_dir.display());

    let catalog: CatalogHandle = Arc::new(SqliteCatalog::new(Arc::clone(&db), content_dir));
    let registry = Arc::new(MonitorRegistry::new(catalog, chunk_dir));

    for properties in &file_config.stream {
        let config = match StreamMonitorConfig::from_properties(properties) {
            Ok(config) => config,
            Err(e) => {
                error!("Ignoring stream configuration: {}", e);
                continue;
            }
        };
        let title = config.title.clone();
        match registry.add(config).await {
            Ok(_) => info!("[Stream {}] Configured", title),
            Err(e) => error!("[Stream {}] Not configured: {}", title, e),
        }
    }

    let started = registry.start_configured().await;
    info!(
        "{} stream(s) configured, {} started",
        file_config.stream.len(),
        started
    );

    let web_db = Arc::clone(&db);
    let web_registry = Arc::clone(&registry);
    tokio::spawn(async move {
        if let Err(e) = web::start_web_server(web_listen_addr, web_db, web_registry).await {
            error!("Web server error: {}", e);
        }
    });

    info!("mpegts-stream running, press Ctrl+C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutting down");
    registry.stop_all().await;
    Ok(())
}
