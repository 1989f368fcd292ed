use crate::error::Result;
use crate::model::ModelRecord;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// The persisted document: every record, in insertion order.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCollection {
    pub models: Vec<ModelRecord>,
}

impl ModelCollection {
    pub fn position(&self, id: &str) -> Option<usize> {
        self.models.iter().position(|m| m.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&ModelRecord> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ModelRecord> {
        self.models.iter_mut().find(|m| m.id == id)
    }
}

/// Whole-document JSON persistence for the model collection.
///
/// Saves go through a sibling temp file followed by a rename, so a concurrent
/// `load` sees either the previous document or the new one. The store itself
/// does not serialize writers; [`super::ModelRecords`] holds the mutation lock.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<ModelCollection> {
        load_document(&self.path).await
    }

    pub async fn save(&self, collection: &ModelCollection) -> Result<()> {
        save_document(&self.path, collection).await
    }
}

/// Reads a whole JSON document. A missing file yields `T::default()`; any other
/// read or parse failure is returned.
pub(crate) async fn load_document<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(e.into()),
    };

    Ok(serde_json::from_str(&content)?)
}

/// Replaces a JSON document by writing a sibling temp file and renaming it over the target.
pub(crate) async fn save_document<T: Serialize>(path: &Path, document: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(document)?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);

    tokio::fs::write(&tmp_path, content).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}
