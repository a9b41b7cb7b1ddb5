use std::path::PathBuf;

use crate::backend::BackendError;
use crate::dependency::{BootstrapError, Dependency};
use crate::model::catalog::{CatalogItem, ItemId};

/// All possible messages that drive state transitions.
#[derive(Debug)]
pub enum Msg {
    // -- Input
    Input(String),

    // -- Catalog
    Reload,
    ItemsLoaded(Result<Vec<CatalogItem>, BackendError>),
    InstalledListed(Result<Vec<CatalogItem>, BackendError>),

    // -- Backend completions
    ItemSettled {
        id: ItemId,
        outcome: Result<(), BackendError>,
    },
    PathPicked {
        id: ItemId,
        slot: usize,
        outcome: Result<Option<PathBuf>, BackendError>,
    },
    DependenciesChecked(Result<(), BackendError>),
    DependencyFinished {
        dependency: Dependency,
        outcome: Result<(), BootstrapError>,
    },

    // -- System
    Quit,
}
