use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::backend::{BackendError, PathPicker, PathRequest, PickMode};
use crate::model::catalog::{ArgClass, ArgumentSpec, CatalogItem};

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("this server takes no positional argument")]
    NoArgument,

    #[error("slot {index} is out of range (0..{len})")]
    SlotOutOfRange { index: usize, len: usize },

    #[error("{} arguments are typed, not picked", .0.label())]
    NotAPath(ArgClass),

    #[error("path selection failed: {0}")]
    Picker(#[from] BackendError),
}

/// What a save hands to the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    /// Only the keys the user edited.
    pub env: BTreeMap<String, String>,
    pub args: Vec<String>,
}

/// In-progress configuration for one item while its dialog is open.
///
/// Nothing here is persisted; dropping the collector discards the edits.
#[derive(Debug, Clone)]
pub struct ArgumentCollector {
    defaults: BTreeMap<String, String>,
    overrides: BTreeMap<String, String>,
    argument: Option<ArgumentSpec>,
    args: Vec<String>,
}

impl ArgumentCollector {
    pub fn new(item: &CatalogItem) -> Self {
        let argument = item.argument().cloned();
        let args = argument
            .as_ref()
            .map(|arg| arg.value.clone())
            .unwrap_or_default();

        Self {
            defaults: item.env.clone(),
            overrides: BTreeMap::new(),
            argument,
            args,
        }
    }

    pub fn env_keys(&self) -> impl Iterator<Item = &str> {
        self.defaults.keys().map(String::as_str)
    }

    /// The edited value if there is one, else the item's default.
    pub fn env_value(&self, key: &str) -> &str {
        self.overrides
            .get(key)
            .or_else(|| self.defaults.get(key))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn set_env_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.overrides.insert(key.into(), value.into());
    }

    pub fn argument(&self) -> Option<&ArgumentSpec> {
        self.argument.as_ref()
    }

    /// Slots as the form shows them: an empty argument still shows one slot.
    pub fn slots(&self) -> Vec<&str> {
        if self.argument.is_some() && self.args.is_empty() {
            return vec![""];
        }
        self.args.iter().map(String::as_str).collect()
    }

    pub fn set_arg_value(
        &mut self,
        index: usize,
        value: impl Into<String>,
    ) -> Result<(), CollectorError> {
        if self.argument.is_none() {
            return Err(CollectorError::NoArgument);
        }

        let len = self.slots().len();
        if index >= len {
            return Err(CollectorError::SlotOutOfRange { index, len });
        }

        // The form's synthetic first slot becomes real once written.
        if self.args.is_empty() {
            self.args.push(String::new());
        }
        self.args[index] = value.into();
        Ok(())
    }

    /// Appends an empty slot and returns its index.
    pub fn add_arg_slot(&mut self) -> Result<usize, CollectorError> {
        let Some(argument) = self.argument.as_ref() else {
            return Err(CollectorError::NoArgument);
        };
        if !argument.allows_multiple() {
            tracing::debug!("adding a slot to single-valued argument {}", argument.name);
        }

        self.args.push(String::new());
        Ok(self.args.len() - 1)
    }

    pub fn path_request(&self, index: usize) -> Result<PathRequest, CollectorError> {
        let argument = self.argument.as_ref().ok_or(CollectorError::NoArgument)?;
        let mode = match argument.class {
            ArgClass::DirectoryPath => PickMode::Directory,
            ArgClass::FilePath => PickMode::File,
            class => return Err(CollectorError::NotAPath(class)),
        };

        let len = self.slots().len();
        if index >= len {
            return Err(CollectorError::SlotOutOfRange { index, len });
        }
        Ok(PathRequest::new(mode))
    }

    /// Writes a picker result into a slot. A cancelled pick changes nothing.
    pub fn apply_selection(
        &mut self,
        index: usize,
        selected: Option<PathBuf>,
    ) -> Result<bool, CollectorError> {
        let Some(path) = selected.filter(|path| !path.as_os_str().is_empty()) else {
            return Ok(false);
        };

        self.set_arg_value(index, path.to_string_lossy().into_owned())?;
        Ok(true)
    }

    pub async fn resolve_file_or_directory(
        &mut self,
        index: usize,
        picker: &dyn PathPicker,
    ) -> Result<bool, CollectorError> {
        let request = self.path_request(index)?;
        let selected = picker.pick(request).await?;
        self.apply_selection(index, selected)
    }

    pub fn commit(self) -> Configuration {
        let args = match self.argument {
            None => Vec::new(),
            Some(_) if self.args.is_empty() => vec![String::new()],
            Some(_) => self.args,
        };

        Configuration {
            env: self.overrides,
            args,
        }
    }
}
