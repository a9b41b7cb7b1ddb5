pub mod local;
pub mod picker;

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::dependency::Runtime;
use crate::model::catalog::{CatalogItem, ItemId};

pub use local::LocalBackend;
pub use picker::EnteredPath;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown catalog item: {0}")]
    UnknownItem(ItemId),

    #[error("no installer configured for {0}")]
    NoInstaller(Runtime),

    #[error("`{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("{0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListScope {
    All,
    Installed,
}

/// Presence of the external runtimes, as reported in one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DependencyPresence {
    pub node: bool,
    pub uv: bool,
}

/// Command surface of the out-of-process executor.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn list_items(&self, scope: ListScope) -> Result<Vec<CatalogItem>, BackendError>;

    /// Used only for items that need no configuration.
    async fn install_item(&self, id: &ItemId) -> Result<(), BackendError>;

    async fn uninstall_item(&self, id: &ItemId) -> Result<(), BackendError>;

    /// Persists configuration; doubles as a first install with configuration.
    async fn configure_item(
        &self,
        id: &ItemId,
        env: &BTreeMap<String, String>,
        args: &[String],
    ) -> Result<(), BackendError>;

    async fn check_dependencies(&self) -> Result<DependencyPresence, BackendError>;

    async fn check_resources(&self) -> Result<bool, BackendError>;

    async fn install_runtime(&self, runtime: Runtime) -> Result<(), BackendError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickMode {
    File,
    Directory,
}

/// One chooser invocation fills exactly one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathRequest {
    pub mode: PickMode,
}

impl PathRequest {
    pub fn new(mode: PickMode) -> Self {
        Self { mode }
    }
}

/// External file-system chooser. `Ok(None)` means the user cancelled.
#[async_trait]
pub trait PathPicker: Send + Sync {
    async fn pick(&self, request: PathRequest) -> Result<Option<PathBuf>, BackendError>;
}
