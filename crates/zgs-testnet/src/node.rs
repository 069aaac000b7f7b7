//! Node identity, directories and configuration.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};
use crate::ports::NodePorts;

/// Per-node configuration: option name to value. Keys absent from an
/// override map inherit the group's defaults.
pub type ConfigMap = BTreeMap<String, toml::Value>;

/// Which group a node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Blockchain,
    Storage,
    Kv,
}

impl NodeKind {
    /// Directory prefix under the run's root directory.
    pub fn dir_prefix(&self) -> &'static str {
        match self {
            Self::Blockchain => "blockchain_node",
            Self::Storage => "zgs_node",
            Self::Kv => "zgs_kv",
        }
    }
}

/// How a node receives its configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStyle {
    /// A `config.toml` in the data directory, passed as `--config config.toml`.
    TomlFile,
    /// One `--key value` command-line flag per entry.
    Flags,
}

/// Static description of one node. Fixed once its process has been started.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub kind: NodeKind,
    /// Position within its group.
    pub index: usize,
    pub binary: PathBuf,
    pub ports: NodePorts,
    pub data_dir: PathBuf,
    /// Effective configuration: group defaults with the overrides applied.
    pub config: ConfigMap,
}

impl NodeSpec {
    /// Build a spec whose data directory is `<root>/<prefix><index>`.
    pub fn new(
        kind: NodeKind,
        index: usize,
        binary: impl Into<PathBuf>,
        ports: NodePorts,
        root_dir: &Path,
    ) -> Self {
        Self {
            kind,
            index,
            binary: binary.into(),
            ports,
            data_dir: root_dir.join(format!("{}{}", kind.dir_prefix(), index)),
            config: ConfigMap::new(),
        }
    }

    /// Apply `defaults`, then `overrides` on top.
    pub fn with_config(mut self, defaults: ConfigMap, overrides: Option<&ConfigMap>) -> Self {
        self.config = defaults;
        if let Some(overrides) = overrides {
            self.config
                .extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        self
    }

    /// Unique name, e.g. `zgs_node_1`.
    pub fn name(&self) -> String {
        format!("{}_{}", self.kind.dir_prefix(), self.index)
    }

    /// HTTP JSON-RPC URL, e.g. `http://127.0.0.1:11000`.
    pub fn rpc_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.ports.rpc)
    }

    pub fn rpc_address(&self) -> String {
        format!("127.0.0.1:{}", self.ports.rpc)
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    /// Create the data directory, verify it is writable, and write the
    /// configuration file when the node is configured through one.
    pub fn prepare(&self, style: ConfigStyle) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        ensure_writable(&self.data_dir)?;

        if style == ConfigStyle::TomlFile {
            fs::write(self.config_path(), render_toml(&self.config)?)?;
        }
        Ok(())
    }

    /// Command-line arguments that carry the configuration for `style`.
    pub fn config_args(&self, style: ConfigStyle) -> Vec<String> {
        match style {
            ConfigStyle::TomlFile => vec!["--config".to_string(), "config.toml".to_string()],
            ConfigStyle::Flags => render_flags(&self.config),
        }
    }
}

fn ensure_writable(dir: &Path) -> Result<()> {
    tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        HarnessError::Config(format!("data directory {} is not writable: {e}", dir.display()))
    })?;
    Ok(())
}

/// Serialize a configuration map as a TOML document.
pub fn render_toml(config: &ConfigMap) -> Result<String> {
    toml::to_string(config).map_err(|e| HarnessError::Config(format!("cannot render config: {e}")))
}

/// Render a configuration map as `--key value` flags.
///
/// `true` becomes a bare `--key`, `false` becomes `--key=false`, arrays are
/// comma-joined.
pub fn render_flags(config: &ConfigMap) -> Vec<String> {
    let mut args = Vec::with_capacity(config.len() * 2);
    for (key, value) in config {
        match value {
            toml::Value::Boolean(true) => args.push(format!("--{key}")),
            toml::Value::Boolean(false) => args.push(format!("--{key}=false")),
            other => {
                args.push(format!("--{key}"));
                args.push(flag_value(other));
            }
        }
    }
    args
}

fn flag_value(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Array(items) => items.iter().map(flag_value).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports() -> NodePorts {
        NodePorts {
            rpc: 11000,
            p2p: 11001,
        }
    }

    #[test]
    fn test_names_and_paths() {
        let spec = NodeSpec::new(NodeKind::Storage, 2, "/bin/zgs_node", ports(), Path::new("/tmp/run"));
        assert_eq!(spec.name(), "zgs_node_2");
        assert_eq!(spec.data_dir, Path::new("/tmp/run/zgs_node2"));
        assert_eq!(spec.rpc_url(), "http://127.0.0.1:11000");
        assert_eq!(spec.config_path(), Path::new("/tmp/run/zgs_node2/config.toml"));
    }

    #[test]
    fn test_overrides_win_and_unset_keys_inherit() {
        let defaults = ConfigMap::from([
            ("db_dir".to_string(), toml::Value::from("db")),
            ("log_level".to_string(), toml::Value::from("info")),
        ]);
        let overrides = ConfigMap::from([("log_level".to_string(), toml::Value::from("debug"))]);

        let spec = NodeSpec::new(NodeKind::Kv, 0, "zgs_kv", ports(), Path::new("/tmp"))
            .with_config(defaults, Some(&overrides));

        assert_eq!(spec.config["db_dir"].as_str(), Some("db"));
        assert_eq!(spec.config["log_level"].as_str(), Some("debug"));
    }

    #[test]
    fn test_render_flags() {
        let config = ConfigMap::from([
            ("dev".to_string(), toml::Value::Boolean(true)),
            ("http.port".to_string(), toml::Value::Integer(8545)),
            ("http.api".to_string(), toml::Value::from(vec!["eth", "net"])),
            ("nodiscover".to_string(), toml::Value::Boolean(false)),
        ]);

        assert_eq!(
            render_flags(&config),
            vec!["--dev", "--http.api", "eth,net", "--http.port", "8545", "--nodiscover=false"]
        );
    }

    #[test]
    fn test_prepare_writes_toml() {
        let root = tempfile::tempdir().unwrap();
        let spec = NodeSpec::new(NodeKind::Storage, 0, "zgs_node", ports(), root.path())
            .with_config(
                ConfigMap::from([
                    ("rpc_listen_address".to_string(), toml::Value::from("127.0.0.1:11000")),
                    ("network_libp2p_port".to_string(), toml::Value::Integer(11001)),
                ]),
                None,
            );

        spec.prepare(ConfigStyle::TomlFile).unwrap();

        let written: ConfigMap =
            toml::from_str(&std::fs::read_to_string(spec.config_path()).unwrap()).unwrap();
        assert_eq!(written, spec.config);
        assert_eq!(spec.config_args(ConfigStyle::TomlFile), vec!["--config", "config.toml"]);
    }
}
