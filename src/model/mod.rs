pub mod registry;
pub mod store;
pub mod validation;

pub use registry::{ModelFilter, ModelPatch, ModelRecords, Pagination, UnownedPolicy};

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    #[default]
    Image,
    Text,
    Json,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Image => "image",
            InputType::Text => "text",
            InputType::Json => "json",
        }
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InputType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(InputType::Image),
            "text" => Ok(InputType::Text),
            "json" => Ok(InputType::Json),
            _ => Err(Error::validation(validation::INPUT_TYPE_MESSAGE)),
        }
    }
}

/// Metadata entry describing one uploaded model artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub filename: String,
    #[serde(default)]
    pub input_type: InputType,
    pub created_at: String,
    /// `None` marks a public record; see [`UnownedPolicy`].
    #[serde(default, alias = "userId")]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub call_count: u64,
}

impl ModelRecord {
    /// Builds a fresh record stamped with the current time and a zero call count.
    pub fn new(
        id: String,
        name: String,
        description: String,
        filename: String,
        input_type: InputType,
        owner_id: Option<String>,
    ) -> Self {
        Self {
            id,
            name,
            description,
            filename,
            input_type,
            created_at: chrono::Utc::now().to_rfc3339(),
            owner_id,
            call_count: 0,
        }
    }

    /// Name of the sidecar metadata file kept next to the artifact.
    pub fn sidecar_filename(id: &str) -> String {
        format!("{}.json", id)
    }

    /// Artifact file name for a new record: the record id plus the uploaded file's extension.
    pub fn artifact_filename(id: &str, original_name: &str) -> String {
        match Path::new(original_name).extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}.{}", id, ext),
            None => id.to_string(),
        }
    }
}
