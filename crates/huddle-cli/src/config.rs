//! Console configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (`--config <path>`, or the first of the search paths)
//! - Environment variables (`HUDDLE__*`, nested with `__`)

use anyhow::{Context, Result};
use huddle_bus::qos::{MESSAGE_PROFILE, USER_PROFILE};
use huddle_bus::QosLibrary;
use huddle_core::session::{DEFAULT_MESSAGE_TOPIC, DEFAULT_USER_TOPIC};
use huddle_core::{SessionConfig, DEFAULT_HISTORY_CAPACITY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Paths tried in order when no explicit config file is given.
const CONFIG_PATHS: [&str; 3] = [
    "huddle.toml",
    "/etc/huddle/huddle.toml",
    "~/.config/huddle/huddle.toml",
];

/// Console configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bus domain all local sessions join.
    #[serde(default)]
    pub domain_id: u32,

    /// Optional TOML QoS library replacing the builtin one.
    #[serde(default)]
    pub qos_file: Option<String>,

    /// Session settings.
    #[serde(default)]
    pub session: SessionSection,

    /// Durable history journal.
    #[serde(default)]
    pub journal: JournalConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    /// Monitor wait bound in milliseconds.
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_ms: u64,

    /// In-memory history capacity per session.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Announce presence on join.
    #[serde(default = "default_true")]
    pub auto_announce: bool,

    #[serde(default = "default_user_topic")]
    pub user_topic: String,

    #[serde(default = "default_message_topic")]
    pub message_topic: String,

    #[serde(default = "default_user_profile")]
    pub user_profile: String,

    #[serde(default = "default_message_profile")]
    pub message_profile: String,
}

/// Journal configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    /// Keep a journal per user.
    #[serde(default)]
    pub enabled: bool,

    /// Directory holding `<username>.journal` files.
    #[serde(default = "default_journal_path")]
    pub path: String,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Exporter port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_wait_timeout() -> u64 {
    1_000
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_true() -> bool {
    true
}

fn default_user_topic() -> String {
    DEFAULT_USER_TOPIC.to_string()
}

fn default_message_topic() -> String {
    DEFAULT_MESSAGE_TOPIC.to_string()
}

fn default_user_profile() -> String {
    USER_PROFILE.to_string()
}

fn default_message_profile() -> String {
    MESSAGE_PROFILE.to_string()
}

fn default_journal_path() -> String {
    "~/.local/share/huddle".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            domain_id: 0,
            qos_file: None,
            session: SessionSection::default(),
            journal: JournalConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            wait_timeout_ms: default_wait_timeout(),
            history_capacity: default_history_capacity(),
            auto_announce: true,
            user_topic: default_user_topic(),
            message_topic: default_message_topic(),
            user_profile: default_user_profile(),
            message_profile: default_message_profile(),
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_journal_path(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from `explicit`, or the first existing search
    /// path, layered with `HUDDLE__*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a value has the wrong type.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let file = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => find_config_file(),
        };

        let mut builder = config::Config::builder();
        if let Some(path) = &file {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(
                config::File::from(path.as_path())
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix("HUDDLE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .context("Failed to load configuration")?;
        settings
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Session settings for a new controller.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        let s = &self.session;
        SessionConfig {
            user_topic: s.user_topic.clone(),
            message_topic: s.message_topic.clone(),
            user_profile: s.user_profile.clone(),
            message_profile: s.message_profile.clone(),
            wait_timeout: Duration::from_millis(s.wait_timeout_ms),
            history_capacity: s.history_capacity,
            auto_announce: s.auto_announce,
        }
    }

    /// The QoS library for the domain. An unreadable file falls back to the
    /// builtin library.
    #[must_use]
    pub fn qos_library(&self) -> QosLibrary {
        let Some(file) = &self.qos_file else {
            return QosLibrary::builtin();
        };
        let path = shellexpand::tilde(file);
        match QosLibrary::from_file(path.as_ref()) {
            Ok(library) => {
                info!(path = %path, library = %library.name, "Loaded QoS library");
                library
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Unreadable QoS file, running degraded on the builtin library");
                QosLibrary::builtin()
            }
        }
    }

    /// Journal file for `username`, if journaling is enabled.
    #[must_use]
    pub fn journal_file(&self, username: &str) -> Option<PathBuf> {
        if !self.journal.enabled {
            return None;
        }
        let dir = shellexpand::tilde(&self.journal.path);
        Some(Path::new(dir.as_ref()).join(format!("{username}.journal")))
    }
}

fn find_config_file() -> Option<PathBuf> {
    CONFIG_PATHS
        .iter()
        .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
        .find(|path| path.exists())
}
