use std::path::PathBuf;

use async_trait::async_trait;

use super::{BackendError, PathPicker, PathRequest, PickMode};

/// A picker answered by a path the user typed. No entry is a cancellation.
#[derive(Debug, Clone, Default)]
pub struct EnteredPath(pub Option<PathBuf>);

impl EnteredPath {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Self(None);
        }
        Self(Some(PathBuf::from(raw)))
    }
}

#[async_trait]
impl PathPicker for EnteredPath {
    async fn pick(&self, request: PathRequest) -> Result<Option<PathBuf>, BackendError> {
        let Some(path) = self.0.as_ref() else {
            return Ok(None);
        };

        let metadata = tokio::fs::metadata(path).await.map_err(|err| {
            BackendError::Rejected(format!("{}: {err}", path.display()))
        })?;

        let matches_mode = match request.mode {
            PickMode::File => metadata.is_file(),
            PickMode::Directory => metadata.is_dir(),
        };
        if !matches_mode {
            let expected = match request.mode {
                PickMode::File => "a file",
                PickMode::Directory => "a directory",
            };
            return Err(BackendError::Rejected(format!(
                "{} is not {expected}",
                path.display()
            )));
        }

        Ok(Some(path.clone()))
    }
}
