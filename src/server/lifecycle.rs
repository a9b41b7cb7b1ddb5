use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::collector::{ArgumentCollector, Configuration};
use crate::backend::{Backend, BackendError};
use crate::model::catalog::{CatalogItem, ItemId};
use crate::model::status::InstallStatus;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{0} is busy")]
    Busy(ItemId),

    #[error("{0} is already installed")]
    AlreadyInstalled(ItemId),

    #[error("{0} is not installed")]
    NotInstalled(ItemId),

    #[error("{0} has nothing to configure")]
    NothingToConfigure(ItemId),

    #[error("no configuration dialog is open for {0}")]
    NoDialog(ItemId),
}

/// A backend call the controller wants made on its behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemCommand {
    Install(ItemId),
    Uninstall(ItemId),
    Configure(ItemId, Configuration),
}

impl ItemCommand {
    pub fn id(&self) -> &ItemId {
        match self {
            ItemCommand::Install(id) | ItemCommand::Uninstall(id) => id,
            ItemCommand::Configure(id, _) => id,
        }
    }

    pub async fn execute(&self, backend: &dyn Backend) -> Result<(), BackendError> {
        match self {
            ItemCommand::Install(id) => backend.install_item(id).await,
            ItemCommand::Uninstall(id) => backend.uninstall_item(id).await,
            ItemCommand::Configure(id, config) => {
                backend.configure_item(id, &config.env, &config.args).await
            }
        }
    }
}

/// Outcome of an install intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStep {
    /// No configuration needed; run this command now.
    Dispatch(ItemCommand),
    /// The configuration dialog was opened instead.
    Configure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pending {
    Install,
    Configure {
        from: InstallStatus,
        saved: Configuration,
    },
    Uninstall,
}

impl Pending {
    fn action(&self) -> &'static str {
        match self {
            Pending::Install => "install",
            Pending::Configure { .. } => "configure",
            Pending::Uninstall => "uninstall",
        }
    }
}

/// Install state machine for one catalog item.
///
/// At most one command is outstanding per item: every trigger is refused
/// until the previous command has been settled.
#[derive(Debug)]
pub struct ItemLifecycle {
    item: Arc<CatalogItem>,
    status: InstallStatus,
    pending: Option<Pending>,
    dialog: Option<ArgumentCollector>,
    last_error: Option<String>,
}

impl ItemLifecycle {
    pub fn new(item: Arc<CatalogItem>) -> Self {
        let status = InstallStatus::from_snapshot(item.is_installed);
        Self {
            item,
            status,
            pending: None,
            dialog: None,
            last_error: None,
        }
    }

    pub fn item(&self) -> &CatalogItem {
        &self.item
    }

    pub fn id(&self) -> &ItemId {
        &self.item.id
    }

    pub fn status(&self) -> InstallStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// Busy, or holding unsaved dialog edits.
    pub fn in_use(&self) -> bool {
        self.is_busy() || self.dialog.is_some()
    }

    pub fn can_install(&self) -> bool {
        !self.is_busy() && self.status == InstallStatus::Install
    }

    pub fn can_uninstall(&self) -> bool {
        !self.is_busy() && self.status == InstallStatus::Installed
    }

    pub fn can_reconfigure(&self) -> bool {
        self.can_uninstall() && self.item.needs_configuration()
    }

    pub fn dialog(&self) -> Option<&ArgumentCollector> {
        self.dialog.as_ref()
    }

    pub fn dialog_mut(&mut self) -> Option<&mut ArgumentCollector> {
        self.dialog.as_mut()
    }

    pub fn request_install(&mut self) -> Result<InstallStep, LifecycleError> {
        self.ensure_idle()?;
        if self.status == InstallStatus::Installed {
            return Err(LifecycleError::AlreadyInstalled(self.id().clone()));
        }

        if self.item.needs_configuration() {
            self.open_dialog();
            return Ok(InstallStep::Configure);
        }

        self.begin(Pending::Install, InstallStatus::Installing);
        Ok(InstallStep::Dispatch(ItemCommand::Install(self.id().clone())))
    }

    /// Uninstall does not pass through `Installing`; the status flips when
    /// the command settles.
    pub fn request_uninstall(&mut self) -> Result<ItemCommand, LifecycleError> {
        self.ensure_idle()?;
        if self.status != InstallStatus::Installed {
            return Err(LifecycleError::NotInstalled(self.id().clone()));
        }

        self.dialog = None;
        self.begin(Pending::Uninstall, InstallStatus::Installed);
        Ok(ItemCommand::Uninstall(self.id().clone()))
    }

    pub fn request_reconfigure(&mut self) -> Result<(), LifecycleError> {
        self.ensure_idle()?;
        if self.status != InstallStatus::Installed {
            return Err(LifecycleError::NotInstalled(self.id().clone()));
        }
        if !self.item.needs_configuration() {
            return Err(LifecycleError::NothingToConfigure(self.id().clone()));
        }

        self.open_dialog();
        Ok(())
    }

    pub fn cancel_configuration(&mut self) {
        if self.dialog.take().is_some() {
            debug!("{}: configuration discarded", self.id());
        }
    }

    /// Commits the open dialog. Both first-time setup and reconfiguration
    /// go through here.
    pub fn save_configuration(&mut self) -> Result<ItemCommand, LifecycleError> {
        self.ensure_idle()?;
        let Some(dialog) = self.dialog.take() else {
            return Err(LifecycleError::NoDialog(self.id().clone()));
        };

        let from = self.status;
        let saved = dialog.commit();
        self.begin(
            Pending::Configure {
                from,
                saved: saved.clone(),
            },
            InstallStatus::Installing,
        );
        Ok(ItemCommand::Configure(self.id().clone(), saved))
    }

    /// Applies the result of the outstanding command. A failure returns the
    /// item to where it was before the attempt.
    pub fn settle(&mut self, outcome: Result<(), BackendError>) -> InstallStatus {
        let Some(pending) = self.pending.take() else {
            warn!("{}: settle without an outstanding command", self.id());
            return self.status;
        };

        match outcome {
            Ok(()) => {
                self.status = match pending {
                    Pending::Install => InstallStatus::Installed,
                    Pending::Configure { saved, .. } => {
                        self.adopt(saved);
                        InstallStatus::Installed
                    }
                    Pending::Uninstall => InstallStatus::Install,
                };
                self.last_error = None;
                info!("{}: {}", self.id(), self.status.label());
            }
            Err(err) => {
                self.status = match pending {
                    Pending::Install => InstallStatus::Install,
                    Pending::Configure { from, .. } => from,
                    Pending::Uninstall => InstallStatus::Installed,
                };
                warn!("{}: {} failed: {err}", self.id(), pending.action());
                self.last_error = Some(err.to_string());
            }
        }

        self.status
    }

    fn ensure_idle(&self) -> Result<(), LifecycleError> {
        if self.is_busy() {
            return Err(LifecycleError::Busy(self.id().clone()));
        }
        Ok(())
    }

    /// An already open dialog keeps its edits.
    fn open_dialog(&mut self) {
        if self.dialog.is_some() {
            debug!("{}: configuration already open", self.id());
            return;
        }
        debug!("{}: configuration opened", self.id());
        self.dialog = Some(ArgumentCollector::new(&self.item));
    }

    /// Committed values become the defaults for the next dialog.
    fn adopt(&mut self, saved: Configuration) {
        let item = Arc::make_mut(&mut self.item);
        item.env.extend(saved.env);
        if let Some(argument) = item.input_arg.as_mut().filter(|arg| arg.is_declared()) {
            argument.value = saved.args;
        }
    }

    fn begin(&mut self, pending: Pending, status: InstallStatus) {
        self.pending = Some(pending);
        self.status = status;
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Call, FakeBackend, item, item_from};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn lifecycle(value: serde_json::Value) -> ItemLifecycle {
        ItemLifecycle::new(Arc::new(item_from(value)))
    }

    async fn run(
        lifecycle: &mut ItemLifecycle,
        command: ItemCommand,
        backend: &FakeBackend,
    ) -> InstallStatus {
        let outcome = command.execute(backend).await;
        lifecycle.settle(outcome)
    }

    #[test]
    fn initial_status_follows_snapshot() {
        let fresh = lifecycle(json!({"id": "a", "title": "A"}));
        let installed = lifecycle(json!({"id": "b", "title": "B", "isInstalled": true}));

        assert_eq!(fresh.status(), InstallStatus::Install);
        assert_eq!(installed.status(), InstallStatus::Installed);
        assert!(installed.can_uninstall());
        assert!(!fresh.can_uninstall());
    }

    #[tokio::test]
    async fn plain_item_installs_immediately() {
        let backend = FakeBackend::default();
        let mut lifecycle = ItemLifecycle::new(Arc::new(item("plain")));

        let command = match lifecycle.request_install().expect("install") {
            InstallStep::Dispatch(command) => command,
            other => panic!("expected a dispatch, got {other:?}"),
        };
        assert_eq!(lifecycle.status(), InstallStatus::Installing);
        assert!(lifecycle.dialog().is_none());
        assert!(!lifecycle.can_install());

        assert_eq!(run(&mut lifecycle, command, &backend).await, InstallStatus::Installed);
        assert_eq!(backend.calls(), vec![Call::Install(ItemId::new("plain"))]);
    }

    #[test]
    fn install_is_refused_while_installing() {
        let mut lifecycle = ItemLifecycle::new(Arc::new(item("plain")));
        lifecycle.request_install().expect("first install");

        assert!(matches!(
            lifecycle.request_install(),
            Err(LifecycleError::Busy(_))
        ));
        assert!(matches!(
            lifecycle.request_uninstall(),
            Err(LifecycleError::Busy(_))
        ));
    }

    #[test]
    fn configurable_item_opens_dialog_without_backend_call() {
        let mut lifecycle = lifecycle(json!({"id": "s1", "title": "S", "env": {"API_KEY": "x"}}));

        assert_eq!(lifecycle.request_install().expect("install"), InstallStep::Configure);
        assert_eq!(lifecycle.status(), InstallStatus::Install);
        assert!(lifecycle.dialog().is_some());
        assert!(!lifecycle.is_busy());
    }

    #[test]
    fn argument_alone_requires_configuration() {
        let mut lifecycle = lifecycle(json!({
            "id": "fs",
            "title": "FS",
            "inputArg": {"name": "Root", "class": "DirectoryPath"},
        }));

        assert_eq!(lifecycle.request_install().expect("install"), InstallStep::Configure);
    }

    #[tokio::test]
    async fn configure_end_to_end() {
        let backend = FakeBackend::default();
        let mut lifecycle = lifecycle(json!({
            "id": "s1",
            "title": "S",
            "env": {"API_KEY": "x"},
            "inputArg": {"name": ""},
        }));

        lifecycle.request_install().expect("install");
        let dialog = lifecycle.dialog_mut().expect("dialog open");
        assert_eq!(dialog.env_value("API_KEY"), "x");
        dialog.set_env_value("API_KEY", "secret");
        assert!(backend.calls().is_empty());

        let command = lifecycle.save_configuration().expect("save");
        assert_eq!(lifecycle.status(), InstallStatus::Installing);
        assert!(lifecycle.dialog().is_none());

        assert_eq!(run(&mut lifecycle, command, &backend).await, InstallStatus::Installed);
        assert_eq!(
            backend.calls(),
            vec![Call::Configure {
                id: ItemId::new("s1"),
                env: BTreeMap::from([("API_KEY".to_string(), "secret".to_string())]),
                args: vec![],
            }]
        );
    }

    #[tokio::test]
    async fn reconfigure_from_installed_uses_the_same_save_path() {
        let backend = FakeBackend::default();
        let mut lifecycle = lifecycle(json!({
            "id": "s1",
            "title": "S",
            "isInstalled": true,
            "env": {"API_KEY": "x"},
        }));

        lifecycle.request_reconfigure().expect("reconfigure");
        assert_eq!(lifecycle.status(), InstallStatus::Installed);
        let command = lifecycle.save_configuration().expect("save");

        assert_eq!(run(&mut lifecycle, command, &backend).await, InstallStatus::Installed);
        assert_eq!(backend.count(|call| matches!(call, Call::Configure { .. })), 1);
    }

    #[test]
    fn reconfigure_needs_installed_item_with_settings() {
        let mut plain = lifecycle(json!({"id": "p", "title": "P", "isInstalled": true}));
        let mut fresh = lifecycle(json!({"id": "f", "title": "F", "env": {"K": ""}}));

        assert!(matches!(
            plain.request_reconfigure(),
            Err(LifecycleError::NothingToConfigure(_))
        ));
        assert!(matches!(
            fresh.request_reconfigure(),
            Err(LifecycleError::NotInstalled(_))
        ));
    }

    #[tokio::test]
    async fn uninstall_flips_back_to_install() {
        let backend = FakeBackend::default();
        let mut lifecycle = lifecycle(json!({"id": "u", "title": "U", "isInstalled": true}));

        let command = lifecycle.request_uninstall().expect("uninstall");
        assert_eq!(lifecycle.status(), InstallStatus::Installed);
        assert!(lifecycle.is_busy());

        assert_eq!(run(&mut lifecycle, command, &backend).await, InstallStatus::Install);
        assert_eq!(backend.calls(), vec![Call::Uninstall(ItemId::new("u"))]);
        assert!(matches!(
            lifecycle.request_uninstall(),
            Err(LifecycleError::NotInstalled(_))
        ));
    }

    #[tokio::test]
    async fn failed_install_returns_to_install_and_allows_retry() {
        let backend = FakeBackend::default();
        backend.fail_item_commands(true);
        let mut lifecycle = ItemLifecycle::new(Arc::new(item("flaky")));

        let InstallStep::Dispatch(command) = lifecycle.request_install().expect("install") else {
            panic!("expected a dispatch");
        };
        assert_eq!(run(&mut lifecycle, command, &backend).await, InstallStatus::Install);
        assert!(lifecycle.last_error().is_some());
        assert!(lifecycle.can_install());

        backend.fail_item_commands(false);
        let InstallStep::Dispatch(command) = lifecycle.request_install().expect("retry") else {
            panic!("expected a dispatch");
        };
        assert_eq!(run(&mut lifecycle, command, &backend).await, InstallStatus::Installed);
        assert!(lifecycle.last_error().is_none());
    }

    #[tokio::test]
    async fn failed_reconfigure_stays_installed() {
        let backend = FakeBackend::default();
        backend.fail_item_commands(true);
        let mut lifecycle = lifecycle(json!({
            "id": "s1",
            "title": "S",
            "isInstalled": true,
            "env": {"API_KEY": "x"},
        }));

        lifecycle.request_reconfigure().expect("reconfigure");
        let command = lifecycle.save_configuration().expect("save");

        assert_eq!(run(&mut lifecycle, command, &backend).await, InstallStatus::Installed);
        assert!(lifecycle.last_error().is_some());
    }

    #[tokio::test]
    async fn failed_uninstall_stays_installed() {
        let backend = FakeBackend::default();
        backend.fail_item_commands(true);
        let mut lifecycle = lifecycle(json!({"id": "u", "title": "U", "isInstalled": true}));

        let command = lifecycle.request_uninstall().expect("uninstall");

        assert_eq!(run(&mut lifecycle, command, &backend).await, InstallStatus::Installed);
        assert!(lifecycle.can_uninstall());
    }

    #[tokio::test]
    async fn reconfigure_after_save_starts_from_saved_values() {
        let backend = FakeBackend::default();
        let mut lifecycle = lifecycle(json!({
            "id": "s1",
            "title": "S",
            "env": {"API_KEY": "your-key", "REGION": "eu"},
            "inputArg": {"name": "Root", "class": "DirectoryPath"},
        }));

        lifecycle.request_install().expect("install");
        let dialog = lifecycle.dialog_mut().expect("dialog");
        dialog.set_env_value("API_KEY", "secret");
        dialog.set_env_value("REGION", "us");
        dialog.set_arg_value(0, "/data").expect("slot");
        let command = lifecycle.save_configuration().expect("save");
        assert_eq!(run(&mut lifecycle, command, &backend).await, InstallStatus::Installed);

        lifecycle.request_reconfigure().expect("reconfigure");
        let dialog = lifecycle.dialog().expect("dialog");
        assert_eq!(dialog.env_value("API_KEY"), "secret");
        assert_eq!(dialog.env_value("REGION"), "us");
        assert_eq!(dialog.slots(), vec!["/data"]);
    }

    #[tokio::test]
    async fn failed_save_keeps_previous_defaults() {
        let backend = FakeBackend::default();
        backend.fail_item_commands(true);
        let mut lifecycle = lifecycle(json!({
            "id": "s1",
            "title": "S",
            "isInstalled": true,
            "env": {"API_KEY": "old"},
        }));

        lifecycle.request_reconfigure().expect("reconfigure");
        lifecycle
            .dialog_mut()
            .expect("dialog")
            .set_env_value("API_KEY", "new");
        let command = lifecycle.save_configuration().expect("save");
        run(&mut lifecycle, command, &backend).await;

        assert_eq!(lifecycle.item().env.get("API_KEY").map(String::as_str), Some("old"));
    }

    #[test]
    fn repeated_install_keeps_the_open_dialog() {
        let mut lifecycle = lifecycle(json!({"id": "s1", "title": "S", "env": {"K": "v"}}));
        lifecycle.request_install().expect("install");
        lifecycle.dialog_mut().expect("dialog").set_env_value("K", "edited");

        assert_eq!(lifecycle.request_install().expect("again"), InstallStep::Configure);
        assert_eq!(lifecycle.dialog().expect("dialog").env_value("K"), "edited");
    }

    #[test]
    fn cancel_discards_the_dialog() {
        let mut lifecycle = lifecycle(json!({"id": "s1", "title": "S", "env": {"K": "v"}}));
        lifecycle.request_install().expect("install");
        lifecycle.dialog_mut().expect("dialog").set_env_value("K", "edited");

        lifecycle.cancel_configuration();
        assert!(matches!(
            lifecycle.save_configuration(),
            Err(LifecycleError::NoDialog(_))
        ));

        lifecycle.request_install().expect("reopen");
        assert_eq!(lifecycle.dialog().expect("dialog").env_value("K"), "v");
    }
}
