use std::default::Default;
use std::env;
use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Layer the configuration sources: built-in defaults, `config/default`,
/// `config/{run mode}`, `config/local`, then the environment.
pub fn load() -> Result<Settings, ConfigError> {
    let run_mode = env::var(RUN_MODE_ENV).unwrap_or_else(|_| "development".into());
    Config::builder()
        .add_source(File::with_name(DEFAULT_CFG_PATH).required(false))
        .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
        .add_source(File::with_name(LOCAL_CFG_PATH).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?
        .try_deserialize()
}

const DEFAULT_CFG_PATH: &str = "config/default";
const LOCAL_CFG_PATH: &str = "config/local";
const RUN_MODE_ENV: &str = "CARDSWARM_RUN_MODE";
const ENV_PREFIX: &str = "cardswarm";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub logging: Logging,
    pub runtime: Runtime,
    pub player: Player,
    pub identity: Identity,
    pub catalog: Catalog,
    pub simulation: Simulation,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: "info".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Runtime {
    /// Each node is a single task, so one thread is usually plenty.
    pub threaded: bool,
    pub worker_threads: usize,
    pub thread_name: String,
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime {
            threaded: false,
            worker_threads: num_cpus::get_physical(),
            thread_name: "cardswarm-worker".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Player {
    pub username: String,
    /// Start out hosting the game.
    pub host: bool,
    /// Peers with the same key play together.
    pub game_key: String,
}

impl Default for Player {
    fn default() -> Self {
        Player {
            username: "anonymous".into(),
            host: false,
            game_key: "lobby".into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Identity {
    /// Where to keep the signing key. Without one, every run is a new peer.
    pub key_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Catalog {
    /// JSON card catalog; the numbered placeholder deck is used without one.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Simulation {
    /// Bots joining the host.
    pub peers: usize,
    /// Stop after the host has seen this many rounds won.
    pub rounds: usize,
}

impl Default for Simulation {
    fn default() -> Self {
        Simulation {
            peers: 3,
            rounds: 5,
        }
    }
}
