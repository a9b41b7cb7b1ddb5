use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Backend, BackendError, DependencyPresence, ListScope};
use crate::dependency::Runtime;
use crate::model::catalog::{ArgumentSpec, CatalogItem, ItemId, parse_publish_date};
use crate::model::config::{AppConfig, RuntimeConfig};

const COMMAND_CREATOR: &str = "magnet";
const INSTALL_DIR_VAR: &str = "MAGNET_INSTALL_DIR";

/// One entry of the downloaded server catalog.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogEntry {
    id: ItemId,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    creator: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    logo_url: String,
    #[serde(default)]
    rating: u8,
    #[serde(default)]
    publish_date: String,
    command_info: CommandInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandInfo {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    guide: String,
    #[serde(default)]
    input_arg: ArgumentSpec,
}

/// A server entry in the client's config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientServer {
    #[serde(default)]
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    command_creator: String,
    #[serde(default)]
    input_arg: ArgumentSpec,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ClientConfig {
    #[serde(rename = "mcpServers", default)]
    mcp_servers: BTreeMap<String, ClientServer>,
    #[serde(flatten)]
    other_fields: serde_json::Map<String, serde_json::Value>,
}

/// Executor backed by the catalog file and the client's config file.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    catalog_path: PathBuf,
    client_config_path: PathBuf,
    node: RuntimeConfig,
    uv: RuntimeConfig,
}

impl LocalBackend {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            catalog_path: config.catalog_path(),
            client_config_path: config.client_config_path(),
            node: config.runtime(Runtime::Node).clone(),
            uv: config.runtime(Runtime::Uv).clone(),
        }
    }

    fn runtime(&self, runtime: Runtime) -> &RuntimeConfig {
        match runtime {
            Runtime::Node => &self.node,
            Runtime::Uv => &self.uv,
        }
    }

    /// Directory under the managed install location holding the runtime
    /// binary, if it has been installed there.
    fn managed_bin_dir(&self, runtime: Runtime) -> Option<PathBuf> {
        let config = self.runtime(runtime);
        let root = config.install_dir()?;
        [root.join("bin"), root]
            .into_iter()
            .find(|dir| dir.join(&config.binary).is_file())
    }

    fn is_present(&self, runtime: Runtime) -> bool {
        which::which(&self.runtime(runtime).binary).is_ok()
            || self.managed_bin_dir(runtime).is_some()
    }

    /// Points a launch command at the managed runtime when the system has none.
    fn resolve_launch(&self, command: &mut String, env: &mut BTreeMap<String, String>) {
        let Some(runtime) = launch_runtime(command.as_str()) else {
            return;
        };
        if which::which(&self.runtime(runtime).binary).is_ok() {
            return;
        }
        let Some(bin_dir) = self.managed_bin_dir(runtime) else {
            return;
        };

        let managed = bin_dir.join(command.as_str());
        if managed.is_file() {
            *command = managed.to_string_lossy().into_owned();
        }
        let inherited = std::env::var_os("PATH").unwrap_or_default();
        let search = std::iter::once(bin_dir.clone()).chain(std::env::split_paths(&inherited));
        match std::env::join_paths(search) {
            Ok(path) => {
                env.insert("PATH".to_string(), path.to_string_lossy().into_owned());
            }
            Err(err) => debug!("PATH not extended with {}: {err}", bin_dir.display()),
        }
    }

    async fn read_catalog(&self) -> Result<Vec<CatalogEntry>, BackendError> {
        let raw = tokio::fs::read_to_string(&self.catalog_path).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn find_entry(&self, id: &ItemId) -> Result<CatalogEntry, BackendError> {
        self.read_catalog()
            .await?
            .into_iter()
            .find(|entry| &entry.id == id)
            .ok_or_else(|| BackendError::UnknownItem(id.clone()))
    }

    async fn read_client_config(&self) -> Result<ClientConfig, BackendError> {
        match tokio::fs::read_to_string(&self.client_config_path).await {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(
                    "client config {} not found, starting empty",
                    self.client_config_path.display()
                );
                Ok(ClientConfig::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn write_client_config(&self, config: &ClientConfig) -> Result<(), BackendError> {
        let raw = serde_json::to_string_pretty(config)?;
        write_atomically(&self.client_config_path, raw.as_bytes()).await
    }

    async fn upsert(
        &self,
        id: &ItemId,
        overrides: Option<(&BTreeMap<String, String>, &[String])>,
    ) -> Result<(), BackendError> {
        let entry = self.find_entry(id).await?;
        let info = entry.command_info;
        let mut config = self.read_client_config().await?;
        let saved = config.mcp_servers.get(id.as_str());

        // Saved values win over catalog defaults; edits win over both.
        let mut env = saved.map(|server| server.env.clone()).unwrap_or_default();
        for (key, default) in info.env {
            env.entry(key).or_insert(default);
        }
        let mut values = saved
            .map(|server| server.input_arg.value.clone())
            .unwrap_or_default();
        if let Some((edits, edited_values)) = overrides {
            env.extend(edits.iter().map(|(k, v)| (k.clone(), v.clone())));
            values = edited_values.to_vec();
        }

        let mut args = info.args;
        let mut input_arg = info.input_arg;
        if input_arg.is_declared() {
            args.extend(values.iter().cloned());
            input_arg.value = values;
        }

        let mut command = info.command;
        self.resolve_launch(&mut command, &mut env);

        config.mcp_servers.insert(
            id.0.clone(),
            ClientServer {
                command,
                args,
                env,
                command_creator: COMMAND_CREATOR.to_string(),
                input_arg,
            },
        );
        self.write_client_config(&config).await
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn list_items(&self, scope: ListScope) -> Result<Vec<CatalogItem>, BackendError> {
        let entries = self.read_catalog().await?;
        let installed = self.read_client_config().await?.mcp_servers;

        let items = entries
            .into_iter()
            .map(|entry| {
                let client = installed.get(entry.id.as_str());
                let info = entry.command_info;
                let mut input_arg = info.input_arg;
                input_arg.value = client
                    .map(|server| server.input_arg.value.clone())
                    .unwrap_or_default();
                // Only declared keys are shown, carrying their saved values.
                let env = info
                    .env
                    .into_iter()
                    .map(|(key, default)| {
                        let value = client
                            .and_then(|server| server.env.get(&key).cloned())
                            .unwrap_or(default);
                        (key, value)
                    })
                    .collect();

                CatalogItem {
                    publish_date: parse_publish_date(&entry.publish_date),
                    is_installed: client.is_some(),
                    env,
                    guide: info.guide,
                    input_arg: Some(input_arg),
                    id: entry.id,
                    title: entry.title,
                    description: entry.description,
                    creator: entry.creator,
                    logo_url: entry.logo_url,
                    rating: entry.rating,
                    tags: entry.tags,
                }
            })
            .filter(|item| scope == ListScope::All || item.is_installed)
            .collect();

        Ok(items)
    }

    async fn install_item(&self, id: &ItemId) -> Result<(), BackendError> {
        self.upsert(id, None).await?;
        info!("installed {id}");
        Ok(())
    }

    async fn uninstall_item(&self, id: &ItemId) -> Result<(), BackendError> {
        let mut config = self.read_client_config().await?;
        if config.mcp_servers.remove(id.as_str()).is_none() {
            debug!("{id} was not installed");
            return Ok(());
        }

        self.write_client_config(&config).await?;
        info!("uninstalled {id}");
        Ok(())
    }

    async fn configure_item(
        &self,
        id: &ItemId,
        env: &BTreeMap<String, String>,
        args: &[String],
    ) -> Result<(), BackendError> {
        self.upsert(id, Some((env, args))).await?;
        info!("configured {id}");
        Ok(())
    }

    async fn check_dependencies(&self) -> Result<DependencyPresence, BackendError> {
        Ok(DependencyPresence {
            node: self.is_present(Runtime::Node),
            uv: self.is_present(Runtime::Uv),
        })
    }

    async fn check_resources(&self) -> Result<bool, BackendError> {
        match self.read_catalog().await {
            Ok(_) => Ok(true),
            Err(BackendError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn install_runtime(&self, runtime: Runtime) -> Result<(), BackendError> {
        let config = self.runtime(runtime);
        let Some((program, rest)) = config.installer.split_first() else {
            return Err(BackendError::NoInstaller(runtime));
        };

        info!("running installer for {runtime}: {program}");
        let mut installer = tokio::process::Command::new(program);
        installer.args(rest);
        if let Some(dir) = config.install_dir() {
            tokio::fs::create_dir_all(&dir).await?;
            installer.env(INSTALL_DIR_VAR, &dir);
        }
        let output = installer.output().await?;

        if !output.status.success() {
            return Err(BackendError::Command {
                command: program.clone(),
                message: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}

/// Runtime a catalog launch command needs, by the command's name.
fn launch_runtime(command: &str) -> Option<Runtime> {
    match command {
        "npx" | "npm" | "node" => Some(Runtime::Node),
        "uvx" | "uv" => Some(Runtime::Uv),
        _ => None,
    }
}

async fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), BackendError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
