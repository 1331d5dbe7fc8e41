use agw_client::alert::{spawn_alert_bridge, LogNotifier};
use agw_client::api::{AnalysisSource, ApiClient};
use agw_client::channel::{ChannelConfig, PushChannel};
use agw_client::monitor::{MonitorConfig, TerrainMonitor};
use agw_client::session::Session;
use agw_core::wire::EventCategory;
use agw_core::TerrainDraft;
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;
use url::Url;

const DEFAULT_SERVER_URL: &str = "http://localhost:5001";

#[derive(Parser, Debug)]
#[command(name = "agw-dash")]
#[command(about = "AgroWatch terminal dashboard", long_about = None)]
struct Args {
    /// Service base URL (env: AGW_SERVER_URL)
    #[arg(long, default_value = "")]
    server: String,
    /// Socket endpoint override (env: AGW_SOCKET_URL)
    #[arg(long, default_value = "")]
    socket_url: String,
    /// Session token file (env: AGW_TOKEN_PATH)
    #[arg(long, default_value = "")]
    token_path: String,
    /// Log directory; empty logs to stdout only (env: AGW_LOG_DIR)
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch all terrains live: push updates, reconciled snapshots, alerts
    Run {
        /// Full resync period in seconds, 0 disables
        #[arg(long, default_value_t = 300)]
        resync_secs: u64,
        /// Forward weather alerts to the notifier
        #[arg(long, default_value_t = false)]
        notify_alerts: bool,
    },
    /// Log in and persist the session token
    Login {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Manage terrains
    Terrains {
        #[command(subcommand)]
        action: TerrainCommands,
    },
    /// Aggregate terrain statistics
    Stats,
}

#[derive(Subcommand, Debug)]
enum TerrainCommands {
    List,
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        latitude: f64,
        #[arg(long)]
        longitude: f64,
        #[arg(long)]
        crop_type: Option<String>,
        #[arg(long)]
        area_hectares: Option<f64>,
        #[arg(long)]
        notes: Option<String>,
    },
    Remove {
        id: String,
    },
}

#[derive(Clone, Debug)]
struct Config {
    server_url: Url,
    socket_url: Url,
    token_path: PathBuf,
    log_dir: String,
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    let _log_guard = init_logging(&config);

    let session = Arc::new(Session::load(config.token_path.clone())?);
    let api = Arc::new(ApiClient::new(config.server_url.clone(), session.clone())?);

    match args.command {
        Commands::Run {
            resync_secs,
            notify_alerts,
        } => run_dashboard(&config, session, api, resync_secs, notify_alerts).await,
        Commands::Login { username, password } => {
            api.login(&username, &password).await?;
            println!("Logged in as {username}");
            Ok(())
        }
        Commands::Terrains { action } => match action {
            TerrainCommands::List => {
                let terrains = api.terrains().await?;
                if terrains.is_empty() {
                    println!("No terrains registered yet");
                }
                for terrain in terrains {
                    println!(
                        "{}  {}  ({:.4}, {:.4})  {}",
                        terrain.id,
                        terrain.name,
                        terrain.latitude,
                        terrain.longitude,
                        terrain.crop_type.as_deref().unwrap_or("-"),
                    );
                }
                Ok(())
            }
            TerrainCommands::Add {
                name,
                latitude,
                longitude,
                crop_type,
                area_hectares,
                notes,
            } => {
                let draft = TerrainDraft {
                    name,
                    latitude,
                    longitude,
                    crop_type,
                    area_hectares,
                    notes,
                };
                let terrain = api.create_terrain(&draft).await?;
                println!("Created terrain {} ({})", terrain.name, terrain.id);
                Ok(())
            }
            TerrainCommands::Remove { id } => {
                api.delete_terrain(&id).await?;
                println!("Removed terrain {id}");
                Ok(())
            }
        },
        Commands::Stats => {
            let stats = api.terrain_stats().await?;
            println!(
                "{} terrains, {:.1} ha total",
                stats.total_terrains, stats.total_area_hectares
            );
            for (crop, count) in &stats.crops {
                println!("  {crop}: {count}");
            }
            Ok(())
        }
    }
}

async fn run_dashboard(
    config: &Config,
    session: Arc<Session>,
    api: Arc<ApiClient>,
    resync_secs: u64,
    notify_alerts: bool,
) -> Result<()> {
    if !session.is_authenticated() {
        bail!("not logged in; run `agw-dash login` first");
    }

    let terrains = api.terrains().await.context("listing terrains")?;
    if terrains.is_empty() {
        warn!(event = "no_terrains");
        println!("No terrains registered; add one with `agw-dash terrains add`");
        return Ok(());
    }
    info!(event = "dashboard_start", terrains = terrains.len(), server = %config.server_url);

    let channel = PushChannel::connect(ChannelConfig::new(config.socket_url.clone()));

    let mut state_rx = channel.state();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow();
            info!(event = "channel_state", state = %state);
        }
    });

    let _alert_bridge = if notify_alerts {
        Some(spawn_alert_bridge(
            channel.events(EventCategory::Alert),
            Arc::new(LogNotifier),
        ))
    } else {
        None
    };

    let monitor_config = MonitorConfig {
        resync_interval: match resync_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        },
    };

    let source: Arc<dyn AnalysisSource> = api.clone();
    let mut monitors = Vec::with_capacity(terrains.len());
    for terrain in &terrains {
        channel.subscribe_terrain(&terrain.id);
        let monitor = TerrainMonitor::spawn(
            terrain.id.clone(),
            source.clone(),
            channel.events(EventCategory::Agro),
            monitor_config.clone(),
        );

        let name = terrain.name.clone();
        let mut monitor_rx = monitor.state();
        tokio::spawn(async move {
            while monitor_rx.changed().await.is_ok() {
                let state = monitor_rx.borrow().clone();
                if state.fetching {
                    continue;
                }
                if let Some(message) = &state.error {
                    warn!(event = "terrain_error", terrain = %name, error = %message);
                    continue;
                }
                let Some(snapshot) = &state.snapshot else {
                    continue;
                };
                let temperature = snapshot
                    .weather
                    .as_ref()
                    .map(|weather| format!("{:.1}C", weather.temperature))
                    .unwrap_or_else(|| "-".to_string());
                let advisory = snapshot
                    .suggestions
                    .as_ref()
                    .map(|advice| format!("{} ({} suggestions)", advice.priority, advice.suggestions.len()))
                    .unwrap_or_else(|| "-".to_string());
                info!(event = "terrain_update", terrain = %name, weather = %temperature, advisory = %advisory);
            }
        });

        monitors.push(monitor);
    }

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!(event = "dashboard_stop");

    for monitor in monitors {
        channel.unsubscribe_terrain(monitor.terrain_id());
        monitor.stop().await;
    }
    channel.close().await;
    Ok(())
}

fn load_config(args: &Args) -> Result<Config> {
    let server = resolve_value(&args.server, "AGW_SERVER_URL", DEFAULT_SERVER_URL);
    let server_url = Url::parse(&server).with_context(|| format!("invalid server url: {server}"))?;
    let socket = resolve_value(&args.socket_url, "AGW_SOCKET_URL", "");
    let socket_url = if socket.is_empty() {
        derive_socket_url(&server_url)?
    } else {
        Url::parse(&socket).with_context(|| format!("invalid socket url: {socket}"))?
    };
    let token_path = resolve_value(&args.token_path, "AGW_TOKEN_PATH", "");
    let token_path = if token_path.is_empty() {
        Session::default_path()
    } else {
        PathBuf::from(token_path)
    };
    let log_dir = resolve_value(&args.log_dir, "AGW_LOG_DIR", "");
    let debug = args.debug || env_true("AGW_DEBUG");
    Ok(Config {
        server_url,
        socket_url,
        token_path,
        log_dir,
        debug,
    })
}

fn resolve_value(flag: &str, env_key: &str, default: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = std::env::var(env_key) {
        if !value.trim().is_empty() {
            return value;
        }
    }
    default.to_string()
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

fn derive_socket_url(server: &Url) -> Result<Url> {
    let mut url = server.clone();
    let scheme = match server.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => return Ok(url),
        other => bail!("cannot derive socket url from scheme {other}"),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("cannot derive socket url from {server}"))?;
    url.set_path("/ws");
    Ok(url)
}

fn init_logging(config: &Config) -> Option<LogGuard> {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("AGW_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = match open_log_file(&config.log_dir) {
        Ok(log_guard) => log_guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = writer.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(writer)
}

struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

struct MultiWriter {
    stdout: io::Stdout,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>) -> Self {
        Self {
            stdout: io::stdout(),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        if let Some(file) = &self.file {
            let mut file = file.lock().expect("log file lock poisoned");
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        if let Some(file) = &self.file {
            let mut file = file.lock().expect("log file lock poisoned");
            let _ = file.flush();
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("agw-dash.log");
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}
