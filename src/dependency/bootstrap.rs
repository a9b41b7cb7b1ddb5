use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use super::{Dependency, Runtime};
use crate::backend::{Backend, BackendError};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("{0} is already being installed")]
    AlreadyInstalling(Dependency),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub present: bool,
    pub installing: bool,
}

/// Point-in-time copy of every readiness flag, for rendering.
#[derive(Debug, Clone, Default)]
pub struct DependencySnapshot {
    pub node: Readiness,
    pub uv: Readiness,
    pub resources: Readiness,
    /// Spans both presence calls of a refresh.
    pub checking: bool,
    pub last_error: Option<String>,
    /// Refreshes in flight; `checking` clears when this reaches zero.
    active_checks: usize,
}

impl DependencySnapshot {
    pub fn get(&self, dependency: Dependency) -> Readiness {
        match dependency {
            Dependency::Runtime(Runtime::Node) => self.node,
            Dependency::Runtime(Runtime::Uv) => self.uv,
            Dependency::Resources => self.resources,
        }
    }

    fn get_mut(&mut self, dependency: Dependency) -> &mut Readiness {
        match dependency {
            Dependency::Runtime(Runtime::Node) => &mut self.node,
            Dependency::Runtime(Runtime::Uv) => &mut self.uv,
            Dependency::Resources => &mut self.resources,
        }
    }

    pub fn runtime_installing(&self) -> bool {
        self.node.installing || self.uv.installing
    }

    pub fn all_ready(&self) -> bool {
        self.node.present && self.uv.present && self.resources.present
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Refreshed,
    Failed,
    SkippedInstalling,
    SkippedChecking,
}

/// Process-wide readiness of the runtimes and the server catalog.
///
/// The flags are written only through this type. A flag is never flipped
/// optimistically: presence changes only when a check reports it.
pub struct DependencyBootstrap {
    backend: Arc<dyn Backend>,
    state: Mutex<DependencySnapshot>,
}

impl DependencyBootstrap {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            state: Mutex::new(DependencySnapshot::default()),
        }
    }

    pub fn snapshot(&self) -> DependencySnapshot {
        self.state().clone()
    }

    /// Checks runtime presence, then resource presence, and applies both.
    /// A failed call leaves the flags it would have written untouched.
    pub async fn refresh(&self) -> Result<(), BackendError> {
        let _checking = CheckingFlag::raise(self);

        let presence = self.backend.check_dependencies().await;
        let resources = self.backend.check_resources().await;

        let mut state = self.state();
        let mut failure = None;
        match presence {
            Ok(presence) => {
                state.node.present = presence.node;
                state.uv.present = presence.uv;
            }
            Err(err) => {
                warn!("dependency check failed: {err}");
                failure = Some(err);
            }
        }
        match resources {
            Ok(loaded) => state.resources.present = loaded,
            Err(err) => {
                warn!("resource check failed: {err}");
                failure.get_or_insert(err);
            }
        }

        match failure {
            Some(err) => {
                state.last_error = Some(err.to_string());
                Err(err)
            }
            None => {
                state.last_error = None;
                debug!(
                    node = state.node.present,
                    uv = state.uv.present,
                    resources = state.resources.present,
                    "dependencies checked"
                );
                Ok(())
            }
        }
    }

    /// Runs the installer for a runtime and re-derives every flag afterwards.
    /// For resources there is no installer; the action is a recheck.
    pub async fn install(&self, dependency: Dependency) -> Result<(), BootstrapError> {
        let _installing = InstallingFlag::raise(self, dependency)?;

        match dependency {
            Dependency::Runtime(runtime) => {
                info!("installing {runtime}");
                if let Err(err) = self.backend.install_runtime(runtime).await {
                    warn!("installing {runtime} failed: {err}");
                    self.state().last_error = Some(err.to_string());
                    return Err(err.into());
                }
                self.refresh().await?;
            }
            Dependency::Resources => self.recheck_resources().await?,
        }

        Ok(())
    }

    /// One periodic tick. Dropped, not deferred, while a runtime installs or
    /// a refresh is already running.
    pub async fn poll_tick(&self) -> PollOutcome {
        {
            let state = self.state();
            if state.runtime_installing() {
                debug!("skipping dependency poll: install in progress");
                return PollOutcome::SkippedInstalling;
            }
            if state.checking {
                debug!("skipping dependency poll: check in progress");
                return PollOutcome::SkippedChecking;
            }
        }

        match self.refresh().await {
            Ok(()) => PollOutcome::Refreshed,
            Err(_) => PollOutcome::Failed,
        }
    }

    /// Checks immediately, then every `period` until the handle is dropped.
    pub fn spawn_poller(self: &Arc<Self>, period: Duration) -> PollerHandle {
        let bootstrap = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let outcome = bootstrap.poll_tick().await;
                debug!(?outcome, "dependency poll");
            }
        });

        PollerHandle { task }
    }

    async fn recheck_resources(&self) -> Result<(), BackendError> {
        let _checking = CheckingFlag::raise(self);
        match self.backend.check_resources().await {
            Ok(loaded) => {
                let mut state = self.state();
                state.resources.present = loaded;
                state.last_error = None;
                Ok(())
            }
            Err(err) => {
                warn!("resource check failed: {err}");
                self.state().last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, DependencySnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the periodic check task; dropping it stops polling.
pub struct PollerHandle {
    task: JoinHandle<()>,
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct InstallingFlag<'a> {
    bootstrap: &'a DependencyBootstrap,
    dependency: Dependency,
}

impl<'a> InstallingFlag<'a> {
    fn raise(
        bootstrap: &'a DependencyBootstrap,
        dependency: Dependency,
    ) -> Result<Self, BootstrapError> {
        let mut state = bootstrap.state();
        let readiness = state.get_mut(dependency);
        if readiness.installing {
            return Err(BootstrapError::AlreadyInstalling(dependency));
        }
        readiness.installing = true;

        Ok(Self {
            bootstrap,
            dependency,
        })
    }
}

impl Drop for InstallingFlag<'_> {
    fn drop(&mut self) {
        self.bootstrap.state().get_mut(self.dependency).installing = false;
    }
}

struct CheckingFlag<'a> {
    bootstrap: &'a DependencyBootstrap,
}

impl<'a> CheckingFlag<'a> {
    fn raise(bootstrap: &'a DependencyBootstrap) -> Self {
        let mut state = bootstrap.state();
        state.active_checks += 1;
        state.checking = true;
        drop(state);
        Self { bootstrap }
    }
}

impl Drop for CheckingFlag<'_> {
    fn drop(&mut self) {
        let mut state = self.bootstrap.state();
        state.active_checks = state.active_checks.saturating_sub(1);
        state.checking = state.active_checks > 0;
    }
}
