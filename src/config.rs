use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for Stevedore
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Root directory for working copies and the repository store
    pub data_directory: String,

    /// Repository store file (defaults to `<data_directory>/repos.json`)
    #[serde(default)]
    pub store_file: Option<String>,

    /// Registry used when the store file is first created
    #[serde(default = "default_registry_url")]
    pub registry_url: String,

    /// Image build and publish settings
    #[serde(default)]
    pub build: BuildConfig,

    /// Git transport settings
    #[serde(default)]
    pub git: GitConfig,

    /// Daemon configuration
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Status/admin HTTP listener
    #[serde(default)]
    pub server: ServerConfig,

    /// Build notification settings
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Image build configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BuildConfig {
    /// Build tool invocation; `-t <image> -f <descriptor> .` is appended
    #[serde(default = "default_build_command")]
    pub command: Vec<String>,

    /// Publish tool invocation; the image name is appended
    #[serde(default = "default_publish_command")]
    pub publish_command: Vec<String>,

    /// Optional preparation step run in the working copy before building
    #[serde(default)]
    pub prepare_command: Vec<String>,

    /// How deep to look for Dockerfiles below the repository root
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Timeout for each build/publish command in seconds (0 disables)
    #[serde(default)]
    pub timeout: u64,
}

/// Git configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitConfig {
    /// Disable TLS certificate verification for git (trusted network only)
    #[serde(default = "default_true")]
    pub ssl_no_verify: bool,

    /// Remote branch to fast-forward to; the upstream tracking branch if unset
    #[serde(default)]
    pub branch: Option<String>,

    /// Timeout for git operations in seconds (0 disables)
    #[serde(default)]
    pub timeout: u64,
}

/// Daemon configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DaemonConfig {
    /// Poll interval
    #[serde(default = "default_interval")]
    pub interval: String, // "30s"

    /// PID file location
    #[serde(default = "default_pid_file")]
    pub pid_file: String,

    /// Log file location
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// HTTP listener configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Notification configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NotificationConfig {
    /// Notification sink
    #[serde(default = "default_channel")]
    pub channel: String, // "none", "log", "slack"

    /// Incoming webhook URL for Slack
    #[serde(default)]
    pub slack_webhook_url: Option<String>,

    /// Override the webhook's default channel
    #[serde(default)]
    pub slack_channel: Option<String>,

    #[serde(default = "default_username")]
    pub username: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "compact"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_registry_url() -> String {
    "gcr.io/my-project".to_string()
}
fn default_build_command() -> Vec<String> {
    vec!["docker".to_string(), "build".to_string()]
}
fn default_publish_command() -> Vec<String> {
    vec![
        "gcloud".to_string(),
        "docker".to_string(),
        "--".to_string(),
        "push".to_string(),
    ]
}
fn default_max_depth() -> usize {
    4
}
fn default_interval() -> String {
    "30s".to_string()
}
fn default_pid_file() -> String {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        format!("{}/stevedore.pid", runtime_dir)
    } else {
        "/tmp/stevedore.pid".to_string()
    }
}

fn default_log_file() -> String {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        format!("{}/stevedore/daemon.log", data_home)
    } else if let Ok(home) = std::env::var("HOME") {
        format!("{}/.local/share/stevedore/daemon.log", home)
    } else {
        "/tmp/stevedore-daemon.log".to_string()
    }
}
fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_channel() -> String {
    "log".to_string()
}
fn default_username() -> String {
    "stevedore".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

// Default implementations
impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: default_build_command(),
            publish_command: default_publish_command(),
            prepare_command: Vec::new(),
            max_depth: default_max_depth(),
            timeout: 0,
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            ssl_no_verify: default_true(),
            branch: None,
            timeout: 0,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            pid_file: default_pid_file(),
            log_file: default_log_file(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            bind_address: default_bind_address(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            slack_webhook_url: None,
            slack_channel: None,
            username: default_username(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_true(),
        }
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let mut config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;
            config.expand_paths()?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("stevedore").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.data_directory = shellexpand::full(&self.data_directory)
            .context("Failed to expand data_directory path")?
            .into_owned();

        if let Some(store_file) = &self.store_file {
            self.store_file = Some(
                shellexpand::full(store_file)
                    .context("Failed to expand store_file path")?
                    .into_owned(),
            );
        }

        self.daemon.pid_file = shellexpand::full(&self.daemon.pid_file)
            .context("Failed to expand pid_file path")?
            .into_owned();

        self.daemon.log_file = shellexpand::full(&self.daemon.log_file)
            .context("Failed to expand log_file path")?
            .into_owned();

        Ok(())
    }

    /// Path of the repository store file
    pub fn store_path(&self) -> PathBuf {
        match &self.store_file {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(&self.data_directory).join("repos.json"),
        }
    }

    /// Directory that holds one working copy per tracked repository
    pub fn builds_directory(&self) -> PathBuf {
        PathBuf::from(&self.data_directory).join("builds")
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build.timeout)
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git.timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_directory: "${HOME}/.local/share/stevedore".to_string(),
            store_file: None,
            registry_url: default_registry_url(),
            build: BuildConfig::default(),
            git: GitConfig::default(),
            daemon: DaemonConfig::default(),
            server: ServerConfig::default(),
            notifications: NotificationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
