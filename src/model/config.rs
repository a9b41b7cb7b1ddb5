use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dependency::Runtime;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub dependencies: DependenciesConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    pub catalog_path: String,
    pub client_config_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DependenciesConfig {
    pub poll_interval_secs: u64,
    pub node: RuntimeConfig,
    pub uv: RuntimeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    pub binary: String,
    /// Argv run by `setup`; receives the managed directory as `MAGNET_INSTALL_DIR`.
    #[serde(default)]
    pub installer: Vec<String>,
    /// Managed install location, checked in addition to `PATH`.
    #[serde(default)]
    pub install_dir: String,
}

impl RuntimeConfig {
    pub fn install_dir(&self) -> Option<PathBuf> {
        let configured = self.install_dir.trim();
        if configured.is_empty() {
            return None;
        }
        Some(expand_tilde(Path::new(configured)))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
}

const DEFAULTS: &str = include_str!("../../config/default.toml");

impl AppConfig {
    /// Load configuration with layering: defaults → user config.
    pub fn load() -> Result<Self> {
        let user = match user_config_path() {
            Some(path) if path.exists() => Some(
                fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
            ),
            _ => None,
        };

        Self::from_layers(DEFAULTS, user.as_deref())
    }

    #[cfg(test)]
    pub fn defaults() -> Self {
        Self::from_layers(DEFAULTS, None).unwrap_or_else(|err| panic!("default config: {err}"))
    }

    pub fn from_layers(defaults: &str, user: Option<&str>) -> Result<Self> {
        let mut merged: toml::Table = toml::from_str(defaults).context("parsing default config")?;
        if let Some(user) = user {
            let overlay: toml::Table = toml::from_str(user).context("parsing user config")?;
            merge_tables(&mut merged, overlay);
        }

        let config: AppConfig = toml::Value::Table(merged)
            .try_into()
            .context("invalid configuration")?;
        Ok(config)
    }

    pub fn catalog_path(&self) -> PathBuf {
        expand_tilde(Path::new(&self.general.catalog_path))
    }

    pub fn client_config_path(&self) -> PathBuf {
        let configured = self.general.client_config_path.trim();
        if !configured.is_empty() {
            return expand_tilde(Path::new(configured));
        }

        directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Claude")
            .join("claude_desktop_config.json")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.dependencies.poll_interval_secs.max(1))
    }

    pub fn runtime(&self, runtime: Runtime) -> &RuntimeConfig {
        match runtime {
            Runtime::Node => &self.dependencies.node,
            Runtime::Uv => &self.dependencies.uv,
        }
    }
}

pub fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "magnet")
}

fn user_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Tables merge key by key; any other value in `overlay` replaces the base.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        let incoming = match value {
            toml::Value::Table(incoming) => incoming,
            other => {
                base.insert(key, other);
                continue;
            }
        };

        if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
            merge_tables(existing, incoming);
            continue;
        }
        base.insert(key, toml::Value::Table(incoming));
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if !text.starts_with('~') {
        return path.to_path_buf();
    }

    if let Some(base_dirs) = directories::BaseDirs::new() {
        let home = base_dirs.home_dir().to_string_lossy();
        return PathBuf::from(text.replacen('~', &home, 1));
    }

    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let config = AppConfig::from_layers(DEFAULTS, None).expect("defaults are valid");
        assert_eq!(config.poll_interval(), Duration::from_secs(60));
        assert_eq!(config.runtime(Runtime::Node).binary, "node");
        for runtime in [Runtime::Node, Runtime::Uv] {
            let runtime = config.runtime(runtime);
            assert!(!runtime.installer.is_empty());
            assert!(runtime.install_dir().is_some());
        }
        assert_eq!(config.logging.filter, "magnet=info");
    }

    #[test]
    fn user_layer_merges_nested_tables() {
        let user = r#"
            [dependencies]
            poll_interval_secs = 5

            [dependencies.node]
            installer = ["brew", "install", "node"]
        "#;
        let config = AppConfig::from_layers(DEFAULTS, Some(user)).expect("merged config");

        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.dependencies.node.binary, "node");
        assert_eq!(
            config.dependencies.node.installer,
            vec!["brew", "install", "node"]
        );
        assert_eq!(config.dependencies.uv.binary, "uv");
    }

    #[test]
    fn explicit_client_config_path_wins() {
        let user = r#"
            [general]
            client_config_path = "/tmp/clients/config.json"
        "#;
        let config = AppConfig::from_layers(DEFAULTS, Some(user)).expect("merged config");

        assert_eq!(
            config.client_config_path(),
            PathBuf::from("/tmp/clients/config.json")
        );
    }

    #[test]
    fn empty_install_dir_means_unmanaged() {
        let user = r#"
            [dependencies.uv]
            install_dir = ""
        "#;
        let config = AppConfig::from_layers(DEFAULTS, Some(user)).expect("merged config");

        assert!(config.runtime(Runtime::Uv).install_dir().is_none());
        assert!(config.runtime(Runtime::Node).install_dir().is_some());
    }

    #[test]
    fn invalid_user_config_is_rejected() {
        let user = "[dependencies]\npoll_interval_secs = \"soon\"";
        let result = AppConfig::from_layers(DEFAULTS, Some(user));
        assert!(result.is_err());
    }
}
