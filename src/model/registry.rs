use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::store::RegistryStore;
use crate::model::validation::{MAX_DESCRIPTION_LEN, MAX_NAME_LEN};
use crate::model::ModelRecord;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

pub const DEFAULT_PAGE: usize = 1;
pub const DEFAULT_LIMIT: usize = 20;

/// Who may mutate a record whose owner is unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnownedPolicy {
    /// Any authenticated caller.
    #[default]
    Shared,
    /// Nobody.
    Locked,
}

impl FromStr for UnownedPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "shared" => Ok(UnownedPolicy::Shared),
            "locked" => Ok(UnownedPolicy::Locked),
            other => Err(Error::ConfigError(format!(
                "Unknown unowned policy '{}', expected 'shared' or 'locked'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModelFilter {
    pub search: Option<String>,
}

impl ModelFilter {
    fn needle(&self) -> Option<String> {
        self.search
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }
}

fn matches_search(record: &ModelRecord, needle: &str) -> bool {
    record.name.to_lowercase().contains(needle) || record.description.to_lowercase().contains(needle)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl Pagination {
    pub fn new(page: usize, limit: usize) -> Self {
        Self {
            page: page.max(1),
            limit: limit.max(1),
        }
    }

    /// Parses raw query values. Absent, non-numeric and zero values fall back to the defaults.
    pub fn from_query(page: Option<&str>, limit: Option<&str>) -> Self {
        fn parse(raw: Option<&str>, default: usize) -> usize {
            raw.and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(default)
        }

        Self {
            page: parse(page, DEFAULT_PAGE),
            limit: parse(limit, DEFAULT_LIMIT),
        }
    }

    pub fn capped(self, max_limit: usize) -> Self {
        Self {
            limit: self.limit.min(max_limit.max(1)),
            ..self
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPage {
    pub models: Vec<ModelRecord>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub total_pages: usize,
}

/// Partial update; only `Some` fields are applied.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelPatch {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Domain operations over the model collection.
///
/// Every mutation runs load, mutate and save while holding one lock, so two
/// concurrent writers in this process can never lose each other's changes.
pub struct ModelRecords {
    store: RegistryStore,
    models_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl ModelRecords {
    pub fn new(store: RegistryStore, models_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            models_dir: models_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            RegistryStore::new(&config.registry_path),
            &config.models_dir,
        )
    }

    pub fn artifact_path(&self, record: &ModelRecord) -> PathBuf {
        self.models_dir.join(&record.filename)
    }

    pub async fn list(&self, filter: &ModelFilter, pagination: Pagination) -> Result<ModelPage> {
        let Pagination { page, limit } = Pagination::new(pagination.page, pagination.limit);
        let collection = self.store.load().await?;

        let filtered: Vec<ModelRecord> = match filter.needle() {
            Some(needle) => collection
                .models
                .into_iter()
                .filter(|m| matches_search(m, &needle))
                .collect(),
            None => collection.models,
        };

        let total = filtered.len();
        let total_pages = total.div_ceil(limit);
        let start = (page - 1).saturating_mul(limit);
        let models = filtered.into_iter().skip(start).take(limit).collect();

        Ok(ModelPage {
            models,
            page,
            limit,
            total,
            total_pages,
        })
    }

    pub async fn get_by_id(&self, id: &str) -> Result<ModelRecord> {
        let collection = self.store.load().await?;
        collection
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound("Model".to_string()))
    }

    pub async fn create(&self, record: ModelRecord) -> Result<ModelRecord> {
        let _guard = self.write_lock.lock().await;
        let mut collection = self.store.load().await?;

        if collection.position(&record.id).is_some() {
            return Err(Error::Conflict(format!(
                "Model '{}' already exists",
                record.id
            )));
        }

        collection.models.push(record.clone());
        self.store.save(&collection).await?;

        tracing::info!("Registered model '{}' ({})", record.name, record.id);
        Ok(record)
    }

    /// Opens an anonymous file in the models directory for an incoming artifact.
    ///
    /// The file disappears when dropped; [`ModelRecords::create_with_artifact`]
    /// gives it the record's filename.
    pub fn stage_artifact(&self) -> Result<NamedTempFile> {
        let staged = tempfile::Builder::new()
            .prefix(".staging-")
            .tempfile_in(&self.models_dir)?;
        Ok(staged)
    }

    /// Creates the record, then moves the staged artifact to its final name.
    pub async fn create_with_artifact(
        &self,
        record: ModelRecord,
        staged: NamedTempFile,
    ) -> Result<ModelRecord> {
        let record = self.create(record).await?;

        if let Err(e) = staged.persist(self.artifact_path(&record)) {
            tracing::warn!("Could not store artifact for {}: {}", record.id, e.error);
            self.delete(&record.id).await?;
            return Err(e.error.into());
        }

        Ok(record)
    }

    pub async fn update(&self, id: &str, patch: ModelPatch) -> Result<ModelRecord> {
        let name = patch.name.map(|n| n.trim().to_string());
        let description = patch.description.map(|d| d.trim().to_string());
        validate_patch(name.as_deref(), description.as_deref())?;

        let _guard = self.write_lock.lock().await;
        let mut collection = self.store.load().await?;

        let record = collection
            .get_mut(id)
            .ok_or_else(|| Error::NotFound("Model".to_string()))?;
        if let Some(name) = name {
            record.name = name;
        }
        if let Some(description) = description {
            record.description = description;
        }
        let updated = record.clone();

        self.store.save(&collection).await?;

        tracing::info!("Updated model {}", id);
        Ok(updated)
    }

    /// Removes the record, then makes a best-effort attempt at the artifact and sidecar files.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let removed = {
            let _guard = self.write_lock.lock().await;
            let mut collection = self.store.load().await?;

            let index = collection
                .position(id)
                .ok_or_else(|| Error::NotFound("Model".to_string()))?;
            let removed = collection.models.remove(index);
            self.store.save(&collection).await?;
            removed
        };

        tracing::info!("Deleted model '{}' ({})", removed.name, id);

        remove_quietly(&self.artifact_path(&removed)).await;

        // The collection document shares the directory; an id of "models" must not take it along.
        let sidecar = self.models_dir.join(ModelRecord::sidecar_filename(id));
        if sidecar != self.store.path() {
            remove_quietly(&sidecar).await;
        }

        Ok(())
    }

    /// Unknown ids are ignored.
    pub async fn increment_call_count(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut collection = self.store.load().await?;

        let Some(record) = collection.get_mut(id) else {
            tracing::debug!("Call count increment skipped, model {} is gone", id);
            return Ok(());
        };
        record.call_count += 1;
        let count = record.call_count;

        self.store.save(&collection).await?;

        tracing::debug!("Model {} call count is now {}", id, count);
        Ok(())
    }

    /// Fetches the record and checks that `caller` may mutate it.
    pub async fn authorize(
        &self,
        id: &str,
        caller: &str,
        policy: UnownedPolicy,
        action: &str,
    ) -> Result<ModelRecord> {
        let record = self.get_by_id(id).await?;
        let allowed = match record.owner_id.as_deref() {
            Some(owner) => owner == caller,
            None => policy == UnownedPolicy::Shared,
        };

        if allowed {
            Ok(record)
        } else {
            Err(Error::Forbidden(format!(
                "You can only {} your own models",
                action
            )))
        }
    }
}

fn validate_patch(name: Option<&str>, description: Option<&str>) -> Result<()> {
    let mut errors = Vec::new();

    if let Some(name) = name {
        if name.is_empty() {
            errors.push("Model name is required".to_string());
        } else if name.chars().count() > MAX_NAME_LEN {
            errors.push(format!("Model name must be {} characters or less", MAX_NAME_LEN));
        }
    }
    if let Some(description) = description {
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            errors.push(format!(
                "Description must be {} characters or less",
                MAX_DESCRIPTION_LEN
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(errors))
    }
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Removed {:?}", path),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Could not remove {:?}: {}", path, e),
    }
}
