use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Command line and file configuration for the server.
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "wirechat-server", version, about = "wirechat coordination server")]
pub struct Config {
    /// TCP port the server listens on
    #[arg(long, env = "WIRECHAT_PORT", default_value = "4080")]
    pub port: u16,

    /// Address to bind
    #[arg(long, env = "WIRECHAT_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// TOML config file location
    #[arg(long, default_value = "./wirechat.toml")]
    pub config: String,

    /// Emit JSON log lines instead of the pretty format
    #[arg(long, env = "WIRECHAT_JSON_LOGS")]
    pub json_logs: bool,

    /// Print a commented TOML template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, JWT key, media files)
    #[arg(long, env = "WIRECHAT_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Media storage configuration (loaded from [media] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub media: Option<MediaConfig>,
}

/// Configuration for the local media store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Maximum upload size in megabytes per file (default: 25)
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size_mb: u32,

    /// Public URL prefix under which stored media is served (default: "/media")
    #[serde(default = "default_media_base_url")]
    pub base_url: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_upload_size_mb: 25,
            base_url: "/media".to_string(),
        }
    }
}

fn default_max_upload_size() -> u32 {
    25
}

fn default_media_base_url() -> String {
    "/media".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4080,
            bind_address: "0.0.0.0".to_string(),
            config: "./wirechat.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            media: None,
        }
    }
}

impl Config {
    /// Each layer overrides the one below it:
    /// built-in defaults, then the TOML file, then WIRECHAT_* env vars,
    /// then CLI flags.
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("WIRECHAT_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// The template printed by `--generate-config`.
pub fn generate_config_template() -> String {
    r#"# wirechat Coordination Server Configuration
# Place this file at ./wirechat.toml or specify with --config <path>
# All settings can be overridden via environment variables (WIRECHAT_PORT, etc.)
# or on the command line (--port, ...)

# Server port (default: 4080)
# port = 4080

# Address to bind (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Emit JSON log lines instead of the pretty format
# json_logs = false

# Data directory for SQLite database, JWT signing key and media files
# data_dir = "./data"

# ---- Media Storage ----
# [media]

# Maximum upload size in megabytes per file (default: 25)
# max_upload_size_mb = 25

# Public URL prefix under which stored media is served (default: "/media")
# base_url = "/media"
"#
    .to_string()
}
