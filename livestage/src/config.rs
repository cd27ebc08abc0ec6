use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use serde::Deserialize;
use stagecore::{Lifecycle, ModerationFilter};

/// Longest configurable event, one year.
const MAX_DURATION_MINUTES: i64 = 525_600;

/// Live events with moderated chat.
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// Override bind address (host:port).
    #[arg(long, global = true)]
    pub bind: Option<String>,
    /// Override server port.
    #[arg(long, global = true)]
    pub port: Option<u16>,
    /// Enable or disable logging (true/false).
    #[arg(long, global = true)]
    pub logging: Option<bool>,
    /// Path to configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Directory holding the database and secrets.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Apply lifecycle transitions to due events.
    Sweep {
        /// Keep running, sweeping on the configured interval.
        #[arg(long)]
        watch: bool,
    },
    /// Manage principals.
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    /// Register a user.
    Add {
        username: String,
        #[arg(long, default_value = "")]
        display_name: String,
        #[arg(long)]
        staff: bool,
    },
    /// Print a bearer token for a user.
    Token {
        username: String,
        /// Validity in hours.
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
}

/// Runtime configuration resolved from file, env and CLI.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind: String,
    /// Base directory for the database and the token secret.
    pub data_dir: PathBuf,
    /// Whether verbose logging is enabled.
    pub logging_enabled: bool,
    /// Length of an event once live, in minutes.
    pub event_duration_minutes: i64,
    /// Seconds between in-process sweeps; 0 disables them.
    pub sweep_interval_secs: u64,
    /// Terms rejected in chat messages.
    pub denylist: Vec<String>,
    /// Explicit token secret; otherwise one is generated under `data_dir`.
    pub jwt_secret: Option<String>,
}

impl Config {
    /// Defaults rooted at `data_dir`, for embedding and tests.
    pub fn with_data_dir(bind: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            bind: bind.into(),
            data_dir: data_dir.into(),
            logging_enabled: default_logging(),
            event_duration_minutes: default_duration(),
            sweep_interval_secs: default_sweep_interval(),
            denylist: default_denylist(),
            jwt_secret: None,
        }
    }
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    logging: FileLogging,
    #[serde(default)]
    lifecycle: FileLifecycle,
    #[serde(default)]
    moderation: FileModeration,
    #[serde(default)]
    auth: FileAuth,
}

#[derive(Deserialize)]
struct FileServer {
    #[serde(default = "default_port")]
    port: u16,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

#[derive(Deserialize)]
struct FileLifecycle {
    #[serde(default = "default_duration")]
    duration_minutes: i64,
    #[serde(default = "default_sweep_interval")]
    sweep_interval_secs: u64,
}

#[derive(Deserialize)]
struct FileModeration {
    #[serde(default = "default_denylist")]
    denylist: Vec<String>,
}

#[derive(Deserialize, Default)]
struct FileAuth {
    #[serde(default)]
    jwt_secret: Option<String>,
}

fn default_port() -> u16 {
    8787
}

fn default_logging() -> bool {
    true
}

fn default_duration() -> i64 {
    60
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_denylist() -> Vec<String> {
    ["puta", "mierda", "idiota"].map(String::from).to_vec()
}

impl Default for FileServer {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

impl Default for FileLifecycle {
    fn default() -> Self {
        Self {
            duration_minutes: default_duration(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for FileModeration {
    fn default() -> Self {
        Self {
            denylist: default_denylist(),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("LIVESTAGE_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/livestage.toml"));

        let file_cfg = match fs::read(&config_path) {
            Ok(bytes) => {
                let contents = String::from_utf8_lossy(&bytes);
                toml::from_str::<FileConfig>(&contents).context("invalid config file")?
            }
            Err(_) => FileConfig::default(),
        };

        let mut port = file_cfg.server.port;
        let mut logging = file_cfg.logging.enabled;
        let mut duration = file_cfg.lifecycle.duration_minutes;
        let mut sweep_interval = file_cfg.lifecycle.sweep_interval_secs;
        let mut jwt_secret = file_cfg.auth.jwt_secret;

        // environment overrides
        if let Some(p) = env_parsed("LIVESTAGE_PORT") {
            port = p;
        }
        if let Some(l) = env_parsed("LIVESTAGE_LOGGING") {
            logging = l;
        }
        if let Some(d) = env_parsed("LIVESTAGE_EVENT_DURATION_MINUTES") {
            duration = d;
        }
        if let Some(s) = env_parsed("LIVESTAGE_SWEEP_INTERVAL_SECS") {
            sweep_interval = s;
        }
        if let Ok(s) = std::env::var("LIVESTAGE_JWT_SECRET") {
            jwt_secret = Some(s);
        }

        // CLI overrides
        if let Some(p) = cli.port {
            port = p;
        }
        if let Some(l) = cli.logging {
            logging = l;
        }

        if !(1024..=65535).contains(&port) {
            anyhow::bail!("invalid_port");
        }
        if !(1..=MAX_DURATION_MINUTES).contains(&duration) {
            anyhow::bail!("invalid_event_duration");
        }

        let bind = if let Some(b) = &cli.bind {
            b.clone()
        } else if let Ok(b) = std::env::var("BIND") {
            b
        } else {
            format!("127.0.0.1:{}", port)
        };

        let data_dir = cli
            .data_dir
            .clone()
            .or_else(|| std::env::var("DATA_DIR").ok().map(PathBuf::from))
            .unwrap_or_else(default_data_dir);

        Ok(Self {
            bind,
            data_dir,
            logging_enabled: logging,
            event_duration_minutes: duration,
            sweep_interval_secs: sweep_interval,
            denylist: file_cfg.moderation.denylist,
            jwt_secret: jwt_secret.filter(|s| !s.is_empty()),
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("livestage.db")
    }

    pub fn secret_path(&self) -> PathBuf {
        self.data_dir.join("jwt_secret")
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::new(time::Duration::minutes(self.event_duration_minutes))
    }

    pub fn moderation(&self) -> ModerationFilter {
        ModerationFilter::new(&self.denylist)
    }
}

/// Determine the default data directory.
pub fn default_data_dir() -> PathBuf {
    ProjectDirs::from("org", "livestage", "livestage")
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./livestage_data"))
}
