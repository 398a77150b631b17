//! Daemon configuration management

use anyhow::{Context, Result, anyhow};
use driver::NodeClass;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub daemon: DaemonSettings,
    /// Node naming and minor range
    #[serde(default)]
    pub node: NodeSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSettings {
    pub log_level: String,
    /// Directory where node sockets are created
    #[serde(default = "DaemonSettings::default_socket_dir")]
    pub socket_dir: PathBuf,
}

impl DaemonSettings {
    fn default_socket_dir() -> PathBuf {
        if let Some(runtime_dir) = dirs::runtime_dir() {
            runtime_dir.join("tinbridge")
        } else {
            PathBuf::from("/tmp/tinbridge")
        }
    }
}

/// Node naming and minor range configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Node name pattern; `%d` is replaced with the minor number
    #[serde(default = "NodeSettings::default_name_pattern")]
    pub name_pattern: String,
    /// First minor number handed out
    #[serde(default = "NodeSettings::default_minor_base")]
    pub minor_base: u32,
    /// Number of minors in the range
    #[serde(default = "NodeSettings::default_minor_count")]
    pub minor_count: u32,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            name_pattern: Self::default_name_pattern(),
            minor_base: Self::default_minor_base(),
            minor_count: Self::default_minor_count(),
        }
    }
}

impl NodeSettings {
    fn default_name_pattern() -> String {
        driver::NODE_NAME_PATTERN.to_string()
    }

    fn default_minor_base() -> u32 {
        driver::NODE_MINOR_BASE
    }

    fn default_minor_count() -> u32 {
        driver::NODE_MINOR_COUNT
    }

    /// Node class described by these settings
    pub fn node_class(&self) -> NodeClass {
        NodeClass {
            name: self.name_pattern.clone(),
            minor_base: self.minor_base,
            minor_count: self.minor_count,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            daemon: DaemonSettings {
                log_level: "info".to_string(),
                socket_dir: DaemonSettings::default_socket_dir(),
            },
            node: NodeSettings::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/tinbridge/tinbridged.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: DaemonConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("tinbridge").join("tinbridged.toml")
        } else {
            PathBuf::from(".config/tinbridge/tinbridged.toml")
        }
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.daemon.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.daemon.log_level,
                valid_levels.join(", ")
            ));
        }

        // The pattern must format the minor or every node collides on one name
        if !self.node.name_pattern.contains("%d") {
            return Err(anyhow!(
                "Invalid node name pattern '{}', must contain '%d'",
                self.node.name_pattern
            ));
        }

        if self.node.minor_count == 0 {
            return Err(anyhow!("node.minor_count must be at least 1"));
        }

        if self.node.minor_base.checked_add(self.node.minor_count).is_none() {
            return Err(anyhow!(
                "Node minor range {}+{} overflows",
                self.node.minor_base,
                self.node.minor_count
            ));
        }

        Ok(())
    }
}
