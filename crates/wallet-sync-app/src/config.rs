// Configuration loading and parsing (config/wallet-sync.toml).

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::chain::{Chain, Endpoints};

pub const CONFIG_FILE: &str = "wallet-sync.toml";

const BUILTIN_DEFAULTS: &str = include_str!("../defaults/wallet-sync.toml");

const COMMITMENTS: &[&str] = &["processed", "confirmed", "finalized"];

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    /// Chain used when none has been chosen yet (or the stored one is unknown).
    pub default_chain: Chain,
    pub bridge_port: u16,
    pub db_path: String,
    pub commitment: String,
    /// Per-chain endpoint overrides, keyed by chain.
    pub endpoint_overrides: HashMap<Chain, Endpoints>,
}

impl Config {
    /// Endpoints for `chain`, with any configured override applied.
    pub fn endpoints(&self, chain: Chain) -> Endpoints {
        self.endpoint_overrides
            .get(&chain)
            .cloned()
            .unwrap_or_else(|| chain.default_endpoints())
    }
}

// ---------------------------------------------------------------------------
// wallet-sync.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    chain: ChainSection,
    bridge: BridgeSection,
    #[serde(default)]
    database: DatabaseSection,
    #[serde(default)]
    rpc: RpcSection,
}

#[derive(Debug, Clone, Deserialize)]
struct ChainSection {
    default: String,
}

#[derive(Debug, Clone, Deserialize)]
struct BridgeSection {
    port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DatabaseSection {
    path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RpcSection {
    #[serde(default = "default_commitment")]
    commitment: String,
    /// `[rpc.endpoints."solana:devnet"]` tables.
    #[serde(default)]
    endpoints: HashMap<String, EndpointOverride>,
}

impl Default for RpcSection {
    fn default() -> Self {
        RpcSection {
            commitment: default_commitment(),
            endpoints: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct EndpointOverride {
    http: String,
    ws: String,
}

fn default_commitment() -> String {
    "confirmed".to_string()
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/wallet-sync.toml` relative to `base_dir`.
///
/// Does not copy defaults; `load_config()` does that first.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&path)?;
    parse_config(&text, &path)
}

/// Parse and validate config text. `path` is only used in error messages.
pub fn parse_config(text: &str, path: &Path) -> Result<Config, ConfigError> {
    let file: ConfigFile = toml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let default_chain = parse_chain("chain.default", &file.chain.default)?;

    let mut endpoint_overrides = HashMap::new();
    for (id, endpoint) in file.rpc.endpoints {
        let chain = parse_chain(&format!("rpc.endpoints.\"{id}\""), &id)?;
        endpoint_overrides.insert(
            chain,
            Endpoints {
                http: endpoint.http,
                ws: endpoint.ws,
            },
        );
    }

    let db_path = file.database.path.unwrap_or_else(default_db_path);

    let config = Config {
        default_chain,
        bridge_port: file.bridge.port,
        db_path,
        commitment: file.rpc.commitment,
        endpoint_overrides,
    };

    validate(&config)?;

    Ok(config)
}

/// Create `config/wallet-sync.toml` if it is not there yet, copying
/// `defaults/wallet-sync.toml` when present and writing the built-in defaults
/// otherwise. Returns the created path, or `None` if nothing was created.
pub fn ensure_config_files(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let source = base_dir.join("defaults").join(CONFIG_FILE);
    let config_dir = base_dir.join("config");
    let target = config_dir.join(CONFIG_FILE);

    if target.exists() {
        return Ok(None);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create {}: {e}", config_dir.display()),
    })?;

    if source.exists() {
        std::fs::copy(&source, &target).map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to copy {}: {e}", source.display()),
        })?;
    } else {
        std::fs::write(&target, BUILTIN_DEFAULTS).map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to write {}: {e}", target.display()),
        })?;
    }

    Ok(Some(target))
}

/// Loads config relative to the current working directory, copying the
/// shipped defaults first if needed.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn parse_chain(field: &str, value: &str) -> Result<Chain, ConfigError> {
    Chain::parse(value).ok_or_else(|| ConfigError::ValidationError {
        field: field.to_string(),
        message: format!("unknown chain `{value}`"),
    })
}

/// `<data dir>/wallet-sync.db` per platform conventions, or the working
/// directory if no home directory can be determined.
fn default_db_path() -> String {
    directories::ProjectDirs::from("", "", "wallet-sync")
        .map(|dirs| dirs.data_dir().join("wallet-sync.db"))
        .unwrap_or_else(|| PathBuf::from("wallet-sync.db"))
        .to_string_lossy()
        .into_owned()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.bridge_port == 0 {
        return Err(ConfigError::ValidationError {
            field: "bridge.port".into(),
            message: "must be greater than 0".into(),
        });
    }

    if !COMMITMENTS.contains(&config.commitment.as_str()) {
        return Err(ConfigError::ValidationError {
            field: "rpc.commitment".into(),
            message: format!(
                "must be one of {}, got `{}`",
                COMMITMENTS.join(", "),
                config.commitment
            ),
        });
    }

    if config.db_path.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "database.path".into(),
            message: "must not be empty".into(),
        });
    }

    for (chain, endpoints) in &config.endpoint_overrides {
        if !endpoints.http.starts_with("http://") && !endpoints.http.starts_with("https://") {
            return Err(ConfigError::ValidationError {
                field: format!("rpc.endpoints.\"{}\".http", chain.id()),
                message: format!("must be an http(s) URL, got `{}`", endpoints.http),
            });
        }
        if !endpoints.ws.starts_with("ws://") && !endpoints.ws.starts_with("wss://") {
            return Err(ConfigError::ValidationError {
                field: format!("rpc.endpoints.\"{}\".ws", chain.id()),
                message: format!("must be a ws(s) URL, got `{}`", endpoints.ws),
            });
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
