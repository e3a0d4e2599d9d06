use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How the child server process is launched.
///
/// Arguments may contain the placeholders `{memory}` and `{binary}`, which are
/// substituted with the requested heap size and the server binary path right
/// before the process is spawned.
///
/// # Examples
///
/// ```
/// use server_warden::config::LaunchConfig;
/// use std::collections::HashMap;
///
/// let launch = LaunchConfig {
///     command: "java".to_string(),
///     args: vec!["-Xmx{memory}".to_string(), "-jar".to_string(), "{binary}".to_string()],
///     env: HashMap::new(),
/// };
/// assert_eq!(
///     launch.render_args("4G", "/srv/server.jar"),
///     vec!["-Xmx4G", "-jar", "/srv/server.jar"]
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Program to execute. This can be an absolute path or a command available in the PATH.
    pub command: String,

    /// Command-line arguments, with placeholders.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables to set when launching the server.
    /// These will be combined with the current environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl LaunchConfig {
    /// Returns the argument list with `{memory}` and `{binary}` substituted.
    pub fn render_args(&self, memory: &str, binary: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace("{memory}", memory).replace("{binary}", binary))
            .collect()
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            command: "java".to_string(),
            args: vec![
                "-Xmx{memory}".to_string(),
                "-Xms{memory}".to_string(),
                "-jar".to_string(),
                "{binary}".to_string(),
                "nogui".to_string(),
            ],
            env: HashMap::new(),
        }
    }
}

/// Main configuration for Server Warden.
///
/// Every field has a default, so an empty JSON object is a valid configuration
/// describing the conventional `/minecraft` + `/backups` layout.
///
/// # JSON Schema
///
/// ```json
/// {
///   "serverDir": "/minecraft",
///   "backupDir": "/backups",
///   "memory": "2G",
///   "launch": {
///     "command": "java",
///     "args": ["-Xmx{memory}", "-Xms{memory}", "-jar", "{binary}", "nogui"]
///   },
///   "stopTimeoutSecs": 30,
///   "backupRetention": 10
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Working directory of the child; holds the binary, properties and worlds.
    pub server_dir: PathBuf,
    /// Directory holding world backup archives.
    pub backup_dir: PathBuf,
    /// File name of the server binary inside `server_dir`.
    pub binary_name: String,
    /// File name of the properties file inside `server_dir`.
    pub properties_file: String,
    /// License acceptance marker created on first start.
    pub license_file: String,
    /// Contents written to the license marker.
    pub license_contents: String,
    /// File whose presence marks a directory as a world.
    pub world_marker: String,
    /// Properties key naming the active world.
    pub active_world_key: String,
    /// Active world assumed when the key is absent.
    pub default_world: String,
    /// Heap size handed to the launch template.
    pub memory: String,
    /// Launch template.
    pub launch: LaunchConfig,
    /// Console command requesting a graceful shutdown.
    pub stop_command: String,
    /// How long `stop` waits for a natural exit before killing.
    pub stop_timeout_secs: u64,
    /// Upper bound on waiting for a killed child to be reaped.
    pub kill_grace_millis: u64,
    /// Pause between stop and start during a restart.
    pub restart_delay_millis: u64,
    /// Number of console lines kept in memory.
    pub console_capacity: usize,
    /// Number of world backups kept.
    pub backup_retention: usize,
    /// Number of properties-file backups kept.
    pub properties_backup_retention: usize,
    /// CPU sampling window used by health reports.
    pub health_sample_millis: u64,
    /// Largest accepted upload, in bytes.
    pub max_upload_bytes: u64,
    /// Optional directory for rotating log files (binary only).
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_dir: PathBuf::from("/minecraft"),
            backup_dir: PathBuf::from("/backups"),
            binary_name: "server.jar".to_string(),
            properties_file: "server.properties".to_string(),
            license_file: "eula.txt".to_string(),
            license_contents: "eula=true\n".to_string(),
            world_marker: "level.dat".to_string(),
            active_world_key: "level-name".to_string(),
            default_world: "world".to_string(),
            memory: "2G".to_string(),
            launch: LaunchConfig::default(),
            stop_command: "stop".to_string(),
            stop_timeout_secs: 30,
            kill_grace_millis: 5_000,
            restart_delay_millis: 2_000,
            console_capacity: 1_000,
            backup_retention: 10,
            properties_backup_retention: 5,
            health_sample_millis: 200,
            max_upload_bytes: 500 * 1024 * 1024,
            log_dir: None,
        }
    }
}

impl Config {
    /// Loads a configuration from a file path.
    ///
    /// Files ending in `.yaml` or `.yml` are parsed as YAML, everything else
    /// as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The file cannot be read
    /// * The file contents are not valid JSON/YAML
    /// * The document does not conform to the expected schema
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigParse(format!("Failed to read config file: {}", e)))?;

        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );
        if is_yaml {
            serde_yaml::from_str(&content)
                .map_err(|e| Error::ConfigParse(format!("Failed to parse YAML config: {}", e)))
        } else {
            Self::parse_from_str(&content)
        }
    }

    /// Parses a configuration from a JSON string.
    pub fn parse_from_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON config: {}", e)))
    }

    /// Applies `MC_MEMORY`, `WARDEN_SERVER_DIR` and `WARDEN_BACKUP_DIR` from
    /// the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(memory) = lookup("MC_MEMORY").filter(|v| !v.trim().is_empty()) {
            tracing::debug!(memory = %memory, "Memory overridden from environment");
            self.memory = memory.trim().to_string();
        }
        if let Some(dir) = lookup("WARDEN_SERVER_DIR").filter(|v| !v.is_empty()) {
            self.server_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("WARDEN_BACKUP_DIR").filter(|v| !v.is_empty()) {
            self.backup_dir = PathBuf::from(dir);
        }
    }

    /// Full path of the server binary.
    pub fn binary_path(&self) -> PathBuf {
        self.server_dir.join(&self.binary_name)
    }

    /// Full path of the properties file.
    pub fn properties_path(&self) -> PathBuf {
        self.server_dir.join(&self.properties_file)
    }

    /// Full path of the license acceptance marker.
    pub fn license_path(&self) -> PathBuf {
        self.server_dir.join(&self.license_file)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_millis)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_millis)
    }

    pub fn health_sample(&self) -> Duration {
        Duration::from_millis(self.health_sample_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config = Config::parse_from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.binary_path(), PathBuf::from("/minecraft/server.jar"));
        assert_eq!(config.stop_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides_from(|key| match key {
            "MC_MEMORY" => Some(" 4G ".to_string()),
            "WARDEN_BACKUP_DIR" => Some("/data/backups".to_string()),
            _ => None,
        });
        assert_eq!(config.memory, "4G");
        assert_eq!(config.backup_dir, PathBuf::from("/data/backups"));
        assert_eq!(config.server_dir, PathBuf::from("/minecraft"));
    }
}
