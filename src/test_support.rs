use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::backend::{Backend, BackendError, DependencyPresence, ListScope};
use crate::dependency::Runtime;
use crate::model::catalog::{CatalogItem, ItemId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListItems(ListScope),
    Install(ItemId),
    Uninstall(ItemId),
    Configure {
        id: ItemId,
        env: BTreeMap<String, String>,
        args: Vec<String>,
    },
    CheckDependencies,
    CheckResources,
    InstallRuntime(Runtime),
}

/// In-memory backend that records every call.
#[derive(Default)]
pub struct FakeBackend {
    calls: Mutex<Vec<Call>>,
    items: Mutex<Vec<CatalogItem>>,
    presence: Mutex<DependencyPresence>,
    resources: AtomicBool,
    fail_items: AtomicBool,
    fail_checks: AtomicBool,
    fail_runtime_installs: AtomicBool,
    hold_runtime_installs: AtomicBool,
    release: Notify,
}

impl FakeBackend {
    pub fn with_items(items: Vec<CatalogItem>) -> Self {
        let backend = Self::default();
        *backend.items.lock().unwrap_or_else(PoisonError::into_inner) = items;
        backend
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| predicate(call)).count()
    }

    pub fn set_presence(&self, presence: DependencyPresence) {
        *self.presence.lock().unwrap_or_else(PoisonError::into_inner) = presence;
    }

    pub fn set_resources(&self, loaded: bool) {
        self.resources.store(loaded, Ordering::SeqCst);
    }

    pub fn fail_item_commands(&self, fail: bool) {
        self.fail_items.store(fail, Ordering::SeqCst);
    }

    pub fn fail_checks(&self, fail: bool) {
        self.fail_checks.store(fail, Ordering::SeqCst);
    }

    pub fn fail_runtime_installs(&self, fail: bool) {
        self.fail_runtime_installs.store(fail, Ordering::SeqCst);
    }

    /// Runtime installs block until `release_runtime_install` is called.
    pub fn hold_runtime_installs(&self) {
        self.hold_runtime_installs.store(true, Ordering::SeqCst);
    }

    pub fn release_runtime_install(&self) {
        self.release.notify_one();
    }

    fn record(&self, call: Call) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    fn item_outcome(&self) -> Result<(), BackendError> {
        if self.fail_items.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected("executor unavailable".to_string()));
        }
        Ok(())
    }

    fn check_outcome(&self) -> Result<(), BackendError> {
        if self.fail_checks.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected("check failed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn list_items(&self, scope: ListScope) -> Result<Vec<CatalogItem>, BackendError> {
        self.record(Call::ListItems(scope));
        let items = self
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ok(items
            .into_iter()
            .filter(|item| scope == ListScope::All || item.is_installed)
            .collect())
    }

    async fn install_item(&self, id: &ItemId) -> Result<(), BackendError> {
        self.record(Call::Install(id.clone()));
        self.item_outcome()
    }

    async fn uninstall_item(&self, id: &ItemId) -> Result<(), BackendError> {
        self.record(Call::Uninstall(id.clone()));
        self.item_outcome()
    }

    async fn configure_item(
        &self,
        id: &ItemId,
        env: &BTreeMap<String, String>,
        args: &[String],
    ) -> Result<(), BackendError> {
        self.record(Call::Configure {
            id: id.clone(),
            env: env.clone(),
            args: args.to_vec(),
        });
        self.item_outcome()
    }

    async fn check_dependencies(&self) -> Result<DependencyPresence, BackendError> {
        self.record(Call::CheckDependencies);
        self.check_outcome()?;
        Ok(*self.presence.lock().unwrap_or_else(PoisonError::into_inner))
    }

    async fn check_resources(&self) -> Result<bool, BackendError> {
        self.record(Call::CheckResources);
        self.check_outcome()?;
        Ok(self.resources.load(Ordering::SeqCst))
    }

    async fn install_runtime(&self, runtime: Runtime) -> Result<(), BackendError> {
        self.record(Call::InstallRuntime(runtime));
        if self.hold_runtime_installs.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        if self.fail_runtime_installs.load(Ordering::SeqCst) {
            return Err(BackendError::Command {
                command: format!("install {runtime}"),
                message: "exit status 1".to_string(),
            });
        }

        let mut presence = self.presence.lock().unwrap_or_else(PoisonError::into_inner);
        match runtime {
            Runtime::Node => presence.node = true,
            Runtime::Uv => presence.uv = true,
        }
        Ok(())
    }
}

pub fn item(id: &str) -> CatalogItem {
    serde_json::from_value(serde_json::json!({ "id": id, "title": id }))
        .unwrap_or_else(|err| panic!("test item {id}: {err}"))
}

pub fn item_from(value: serde_json::Value) -> CatalogItem {
    serde_json::from_value(value).unwrap_or_else(|err| panic!("test item: {err}"))
}
