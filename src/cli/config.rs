//! Bridge configuration file handling
//!
//! Operator settings live in a TOML file (default
//! `~/.local/share/ethmatrix/config.toml`). The same file caches the Matrix
//! identity bound to each Ethereum account under `[matrix.user."<account>"]`,
//! so restarts reuse the access token instead of logging in again.

use ethmatrix::bridge::BridgeSettings;
use ethmatrix::chain::Address;
use ethmatrix::identity::{IdentityStore, StoreError};
use ethmatrix::matrix::ChatIdentity;
use ethmatrix::verifier::VerificationMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ETH_ENDPOINT: &str = "http://127.0.0.1:8545";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 5000;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub matrix: MatrixConfig,

    #[serde(default)]
    pub eth: EthConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Homeserver, rooms and listener tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixConfig {
    /// Homeserver base URL
    pub server: String,

    /// Room aliases joined at startup
    #[serde(default)]
    pub rooms: Vec<String>,

    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,

    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// 0 disables the typing heartbeat
    #[serde(default = "default_typing_interval_secs")]
    pub typing_interval_secs: u64,

    #[serde(default)]
    pub verification: VerificationMode,

    #[serde(default = "default_true")]
    pub auto_join_invites: bool,

    /// Cached identities keyed by lowercase account address
    #[serde(default)]
    pub user: BTreeMap<String, ChatIdentity>,
}

/// Ethereum node settings
#[derive(Clone, Serialize, Deserialize)]
pub struct EthConfig {
    #[serde(default = "default_eth_endpoint")]
    pub endpoint: String,

    /// Account to use; prompted for when unset
    pub account: Option<String>,

    pub password: Option<String>,

    pub password_file: Option<PathBuf>,

    /// Ask for the unlock password on the terminal
    #[serde(default)]
    pub prompt_password: bool,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl fmt::Debug for EthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EthConfig")
            .field("endpoint", &self.endpoint)
            .field("account", &self.account)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("password_file", &self.password_file)
            .field("prompt_password", &self.prompt_password)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Local HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (overridden by RUST_LOG)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

fn default_sync_timeout_ms() -> u64 {
    30_000
}

fn default_max_backoff_secs() -> u64 {
    3600
}

fn default_typing_interval_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_eth_endpoint() -> String {
    DEFAULT_ETH_ENDPOINT.to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for EthConfig {
    fn default() -> Self {
        Self {
            endpoint: default_eth_endpoint(),
            account: None,
            password: None,
            password_file: None,
            prompt_password: false,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            file: None,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

        let config: BridgeConfig = toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    ///
    /// Writes a sibling temp file first and renames it over `path`, so a crash
    /// never leaves a truncated config behind.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| StoreError::Serialization(e.to_string()))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, path)?;

        Ok(())
    }

    /// Cached identity for `account`, whatever case the key was written in
    pub fn identity(&self, account: &Address) -> Option<&ChatIdentity> {
        self.matrix
            .user
            .iter()
            .find(|(key, _)| Address::parse(key).is_ok_and(|a| &a == account))
            .map(|(_, identity)| identity)
    }

    pub fn set_identity(&mut self, account: &Address, identity: ChatIdentity) {
        self.matrix
            .user
            .retain(|key, _| !Address::parse(key).is_ok_and(|a| &a == account));
        self.matrix
            .user
            .insert(account.as_str().to_string(), identity);
    }

    /// Runtime settings for the bridge
    pub fn settings(&self) -> BridgeSettings {
        let m = &self.matrix;
        BridgeSettings {
            rooms: m.rooms.clone(),
            sync_timeout: Duration::from_millis(m.sync_timeout_ms),
            max_backoff: Duration::from_secs(m.max_backoff_secs),
            typing_interval: (m.typing_interval_secs > 0)
                .then(|| Duration::from_secs(m.typing_interval_secs)),
            verification: m.verification,
            auto_join_invites: m.auto_join_invites,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.eth.request_timeout_secs)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Generate default configuration content as a string with comments
    pub fn generate_default_toml() -> String {
        format!(
            r##"# ethmatrix configuration
#
# Bridges a Matrix homeserver with an Ethereum node: messages are signed with
# an Ethereum account and verified against the sender's Matrix identity.

[matrix]
# Homeserver base URL
server = "https://matrix.example.org"

# Room aliases joined at startup
rooms = ["#ethmatrix:example.org"]

# Long-poll timeout for /sync (milliseconds)
sync_timeout_ms = 30000

# Cap for the retry delay after failed syncs (seconds)
max_backoff_secs = 3600

# Typing heartbeat interval in seconds (0 disables it)
typing_interval_secs = 5

# Inbound verification: "display-name" (message and display name signed by
# the same account) or "sender-id" (legacy, message signature only)
verification = "display-name"

# Join rooms the bridge user is invited to
auto_join_invites = true

# Identities bound to accounts are cached below AUTOMATICALLY:
# [matrix.user."0x..."]
# user_id = "@0x...:example.org"
# access_token = "..."
# home_server = "example.org"

[eth]
# JSON-RPC endpoint of the Ethereum node
endpoint = "{endpoint}"

# Account to sign with (prompted for when unset)
# account = "0x..."

# Unlock password, in order of precedence:
#   --password-file, password_file, ETHMATRIX_ETH_PASSWORD, password,
#   terminal prompt when prompt_password = true
# Without one, the node asks for approval on every signature.
# password_file = "/run/secrets/eth-password"
prompt_password = false

# Signing may wait for operator approval on the node (seconds)
request_timeout_secs = 120

[server]
# Local HTTP listener for POST /send and GET /block
host = "{host}"
port = {port}

[logging]
# Log level: trace, debug, info, warn, error
level = "{level}"

# Log file path (optional, logs to stderr if not specified)
# file = "/var/log/ethmatrix/ethmatrix.log"
"##,
            endpoint = DEFAULT_ETH_ENDPOINT,
            host = DEFAULT_HOST,
            port = DEFAULT_PORT,
            level = DEFAULT_LOG_LEVEL,
        )
    }

    /// Write the commented default configuration file
    pub fn create_default(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        fs::write(config_path, Self::generate_default_toml()).map_err(|e| {
            format!(
                "Failed to write config file '{}': {}",
                config_path.display(),
                e
            )
        })?;

        Ok(())
    }
}

/// Config file acting as the identity store
pub struct ConfigFile {
    path: PathBuf,
    config: BridgeConfig,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            path: path.to_path_buf(),
            config: BridgeConfig::load(path)?,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

impl IdentityStore for ConfigFile {
    fn load(&self, account: &Address) -> Option<ChatIdentity> {
        self.config.identity(account).cloned()
    }

    fn save(&mut self, account: &Address, identity: &ChatIdentity) -> Result<(), StoreError> {
        self.config.set_identity(account, identity.clone());
        self.config.save(&self.path)
    }
}

/// Get the default config file path
pub fn default_config_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ethmatrix")
        .join("config.toml")
}
