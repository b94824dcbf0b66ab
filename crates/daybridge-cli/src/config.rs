//! Node configuration – reads/writes `~/.daybridge/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use daybridge_middleware::node::NodeConfig;
use daybridge_middleware::relay::RelayConfig;
use serde::{Deserialize, Serialize};

/// Persisted node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Name reported in logs and heartbeats.
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Address the transport binds to.
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Idle time between polling cycles, in milliseconds.
    #[serde(default = "default_spin_interval_ms")]
    pub spin_interval_ms: u64,

    /// Relay capacity before the oldest message is dropped. `0` = unbounded.
    #[serde(default)]
    pub relay_capacity: usize,

    /// Topics subscribed at startup.
    #[serde(default = "default_subscribe")]
    pub subscribe: Vec<String>,

    /// Topic the heartbeat is published on. Empty disables the heartbeat.
    #[serde(default = "default_echo_topic")]
    pub echo_topic: String,
}

fn default_node_name() -> String {
    "harrogate".to_string()
}
fn default_address() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8374
}
fn default_spin_interval_ms() -> u64 {
    1
}
fn default_echo_topic() -> String {
    "daybridge/heartbeat".to_string()
}
fn default_subscribe() -> Vec<String> {
    vec![default_echo_topic()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            address: default_address(),
            port: default_port(),
            spin_interval_ms: default_spin_interval_ms(),
            relay_capacity: 0,
            subscribe: default_subscribe(),
            echo_topic: default_echo_topic(),
        }
    }
}

impl Config {
    /// Parameters for [`daybridge_middleware::Node::new`].
    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            name: self.node_name.clone(),
            address: self.address.clone(),
            port: self.port,
            spin_interval: Duration::from_millis(self.spin_interval_ms),
            relay: RelayConfig {
                capacity: Some(self.relay_capacity),
            },
        }
    }
}

/// Return the path to `~/.daybridge/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".daybridge").join("config.toml")
}

/// Load the config, falling back to defaults when the file is absent.
/// Environment overrides are applied in both cases.
pub fn load() -> Result<Config, String> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path. `None` if the file does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `DAYBRIDGE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `DAYBRIDGE_ADDRESS` | `address` |
/// | `DAYBRIDGE_PORT` | `port` |
/// | `DAYBRIDGE_NODE_NAME` | `node_name` |
///
/// Empty or unparsable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("DAYBRIDGE_ADDRESS")
        && !v.is_empty()
    {
        cfg.address = v;
    }
    if let Ok(v) = std::env::var("DAYBRIDGE_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.port = port;
    }
    if let Ok(v) = std::env::var("DAYBRIDGE_NODE_NAME")
        && !v.is_empty()
    {
        cfg.node_name = v;
    }
}

/// Save the config to disk, creating `~/.daybridge/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_node_defaults() {
        let node = Config::default().node_config();
        let expected = NodeConfig {
            relay: RelayConfig { capacity: Some(0) },
            ..NodeConfig::default()
        };
        assert_eq!(node, expected);
    }

    #[test]
    fn roundtrip_custom_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config {
            node_name: "bench".to_string(),
            port: 9100,
            relay_capacity: 64,
            subscribe: vec!["sensor/temp".to_string(), "sensor/rpm".to_string()],
            ..Config::default()
        };
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: Config = toml::from_str("port = 9001\n").expect("parse");
        assert_eq!(cfg.port, 9001);
        assert_eq!(cfg.node_name, "harrogate");
        assert_eq!(cfg.subscribe, vec!["daybridge/heartbeat".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "port = \"not a number\"").expect("write");
        let err = load_from(&path).unwrap_err();
        assert!(err.starts_with("Failed to parse config"));
    }

    #[test]
    fn config_path_points_to_daybridge_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".daybridge"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    // All env-var cases share one test so they cannot race each other.
    #[test]
    fn apply_env_overrides_sets_and_ignores() {
        // SAFETY: no other test reads these variables.
        unsafe {
            std::env::set_var("DAYBRIDGE_ADDRESS", "0.0.0.0");
            std::env::set_var("DAYBRIDGE_PORT", "9999");
            std::env::set_var("DAYBRIDGE_NODE_NAME", "rig-7");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.address, "0.0.0.0");
        assert_eq!(cfg.port, 9999);
        assert_eq!(cfg.node_name, "rig-7");

        // SAFETY: as above.
        unsafe { std::env::set_var("DAYBRIDGE_PORT", "not-a-port") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.port, 8374);

        // SAFETY: as above.
        unsafe {
            std::env::remove_var("DAYBRIDGE_ADDRESS");
            std::env::remove_var("DAYBRIDGE_PORT");
            std::env::remove_var("DAYBRIDGE_NODE_NAME");
        }
    }
}
