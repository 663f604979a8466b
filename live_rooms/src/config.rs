use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use serde::Deserialize;

/// Command line options.
#[derive(Parser, Debug, Default)]
#[command(name = "live_rooms", about = "Live-stream chat room server")]
pub struct Cli {
    /// Override bind address (host:port).
    #[arg(long)]
    pub bind: Option<String>,
    /// Override server port.
    #[arg(long)]
    pub port: Option<u16>,
    /// Enable or disable logging (true/false).
    #[arg(long)]
    pub logging: Option<bool>,
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Directory holding the database.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

/// Tunables for room behaviour.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RoomSettings {
    pub max_participants: usize,
    pub max_message_chars: usize,
    /// Messages sent to a client when it joins.
    pub history_limit: usize,
    /// Upper bound for room listings.
    pub rooms_list_limit: usize,
    pub typing_debounce_ms: u64,
    /// How long an ended room stays registered before eviction.
    pub ended_retention_secs: u64,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            max_participants: 100,
            max_message_chars: 1000,
            history_limit: 50,
            rooms_list_limit: 50,
            typing_debounce_ms: 1000,
            ended_retention_secs: 600,
        }
    }
}

/// Runtime configuration resolved from file, env and CLI.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind: String,
    /// Base directory for the database.
    pub data_dir: PathBuf,
    pub logging_enabled: bool,
    pub rooms: RoomSettings,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    logging: FileLogging,
    #[serde(default)]
    rooms: RoomSettings,
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

fn default_port() -> u16 {
    8787
}

fn default_logging() -> bool {
    true
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

impl Config {
    /// Resolve configuration. CLI beats env, env beats file, file beats defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut port = default_port();
        let mut logging = default_logging();
        let mut rooms = RoomSettings::default();

        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("LIVE_ROOMS_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/live_rooms.toml"));

        if let Ok(bytes) = fs::read(&config_path) {
            let contents = String::from_utf8_lossy(&bytes);
            let file_cfg: FileConfig = toml::from_str(&contents)
                .with_context(|| format!("invalid config file {}", config_path.display()))?;
            port = file_cfg.server.port;
            logging = file_cfg.logging.enabled;
            rooms = file_cfg.rooms;
        }

        if let Ok(p) = std::env::var("LIVE_ROOMS_PORT") {
            if let Ok(p) = p.parse::<u16>() {
                port = p;
            }
        }
        if let Ok(l) = std::env::var("LIVE_ROOMS_LOGGING") {
            if let Ok(l) = l.parse::<bool>() {
                logging = l;
            }
        }

        if let Some(p) = cli.port {
            port = p;
        }
        if let Some(l) = cli.logging {
            logging = l;
        }

        if !(1024..=65535).contains(&port) {
            anyhow::bail!("invalid_port");
        }
        if rooms.max_participants == 0 {
            anyhow::bail!("rooms.max_participants must be at least 1");
        }
        if rooms.max_message_chars == 0 {
            anyhow::bail!("rooms.max_message_chars must be at least 1");
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
            rooms,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("live_rooms.db")
    }
}

/// Platform data directory, or a local fallback.
pub fn default_data_dir() -> PathBuf {
    ProjectDirs::from("", "", "live_rooms")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./live_rooms_data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    fn clear_env() {
        for key in ["LIVE_ROOMS_PORT", "LIVE_ROOMS_LOGGING", "BIND", "DATA_DIR"] {
            std::env::remove_var(key);
        }
    }

    fn with_file(contents: &str) -> (tempfile::TempDir, Cli) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, contents).unwrap();
        let cli = Cli {
            config: Some(path),
            ..Default::default()
        };
        (dir, cli)
    }

    #[test]
    #[serial]
    fn valid_config_parses() {
        clear_env();
        let (_dir, cli) = with_file(
            "[server]\nport=5555\n[logging]\nenabled=false\n[rooms]\nmax_participants=2\n",
        );
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:5555");
        assert!(!cfg.logging_enabled);
        assert_eq!(cfg.rooms.max_participants, 2);
        assert_eq!(cfg.rooms.max_message_chars, 1000);
    }

    #[test]
    #[serial]
    fn invalid_port_fails() {
        clear_env();
        let (_dir, cli) = with_file("[server]\nport=80\n");
        assert!(Config::load(&cli).is_err());
    }

    #[test]
    #[serial]
    fn zero_capacity_fails() {
        clear_env();
        let (_dir, cli) = with_file("[rooms]\nmax_participants=0\n");
        assert!(Config::load(&cli).is_err());
    }

    #[test]
    #[serial]
    fn missing_keys_defaults() {
        clear_env();
        let (_dir, cli) = with_file("");
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:8787");
        assert!(cfg.logging_enabled);
        assert_eq!(cfg.rooms, RoomSettings::default());
    }

    #[test]
    #[serial]
    fn precedence_cli_env_file() {
        clear_env();
        let (_dir, mut cli) = with_file("[server]\nport=1111\n");
        std::env::set_var("LIVE_ROOMS_PORT", "2222");
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:2222");
        cli.port = Some(3333);
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:3333");
        std::env::remove_var("LIVE_ROOMS_PORT");
    }

    #[test]
    #[serial]
    fn data_dir_resolution() {
        clear_env();
        let (_dir, mut cli) = with_file("");
        std::env::set_var("DATA_DIR", "/tmp/from-env");
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.db_path(), PathBuf::from("/tmp/from-env/live_rooms.db"));
        cli.data_dir = Some(PathBuf::from("/tmp/from-cli"));
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/from-cli"));
        std::env::remove_var("DATA_DIR");
    }

    #[test]
    #[serial]
    fn bind_override() {
        clear_env();
        let (_dir, cli) = with_file("");
        std::env::set_var("BIND", "0.0.0.0:9000");
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.bind, "0.0.0.0:9000");
        std::env::remove_var("BIND");
    }
}
