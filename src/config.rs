use crate::error::{Error, Result};
use crate::model::UnownedPolicy;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
	pub data_dir: PathBuf,
	pub models_dir: PathBuf,
	pub registry_path: PathBuf,
	pub api_keys_path: PathBuf,
	pub temp_dir: PathBuf,
	pub inference: InferenceConfig,
	pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
	/// Program launched for every inference call.
	pub interpreter: String,
	/// Passed to the interpreter ahead of the artifact and input paths.
	pub script: Option<PathBuf>,
	pub timeout_ms: u64,
}

impl Default for InferenceConfig {
	fn default() -> Self {
		Self {
			interpreter: "python3".to_string(),
			script: None,
			timeout_ms: 30_000,
		}
	}
}

impl InferenceConfig {
	pub fn timeout(&self) -> Duration {
		Duration::from_millis(self.timeout_ms)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
	pub unowned_policy: UnownedPolicy,
	pub max_page_limit: usize,
}

impl Default for ApiConfig {
	fn default() -> Self {
		Self {
			unowned_policy: UnownedPolicy::Shared,
			max_page_limit: 100,
		}
	}
}

/// Optional overrides read from `config.toml` in the data directory.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
	inference: InferenceConfig,
	api: ApiConfig,
}

impl Config {
	pub fn new() -> Result<Self> {
		let project_dirs = ProjectDirs::from("", "", "modelmarkt")
			.ok_or_else(|| Error::ConfigError("Could not determine config directory".to_string()))?;

		Self::at(project_dirs.data_dir())
	}

	/// Builds the layout rooted at `data_dir`, creating directories and applying
	/// `config.toml` when present.
	pub fn at(data_dir: impl AsRef<Path>) -> Result<Self> {
		let data_dir = data_dir.as_ref().to_path_buf();
		let models_dir = data_dir.join("models");
		let registry_path = models_dir.join("models.json");
		let api_keys_path = data_dir.join("apikeys.json");
		let temp_dir = data_dir.join("temp");

		std::fs::create_dir_all(&data_dir)?;
		std::fs::create_dir_all(&models_dir)?;
		std::fs::create_dir_all(&temp_dir)?;

		let config_path = data_dir.join(CONFIG_FILE);
		let file_config = if config_path.exists() {
			let content = std::fs::read_to_string(&config_path)?;
			toml::from_str::<FileConfig>(&content)?
		} else {
			FileConfig::default()
		};

		let mut inference = file_config.inference;
		if inference.script.is_none() {
			inference.script = Some(data_dir.join("inference").join("run.py"));
		}

		Ok(Self {
			data_dir,
			models_dir,
			registry_path,
			api_keys_path,
			temp_dir,
			inference,
			api: file_config.api,
		})
	}

	pub fn from_env() -> Result<Self> {
		let mut config = match std::env::var("MODELMARKT_DATA_DIR") {
			Ok(data_dir) => Self::at(PathBuf::from(data_dir))?,
			Err(_) => Self::new()?,
		};

		if let Ok(interpreter) = std::env::var("MODELMARKT_INTERPRETER") {
			config.inference.interpreter = interpreter;
		}
		if let Ok(script) = std::env::var("MODELMARKT_INFERENCE_SCRIPT") {
			config.inference.script = Some(PathBuf::from(script));
		}
		if let Ok(timeout) = std::env::var("MODELMARKT_INFERENCE_TIMEOUT_MS") {
			config.inference.timeout_ms = timeout.parse().map_err(|_| {
				Error::ConfigError(format!("Invalid MODELMARKT_INFERENCE_TIMEOUT_MS: {}", timeout))
			})?;
		}
		if let Ok(policy) = std::env::var("MODELMARKT_UNOWNED_POLICY") {
			config.api.unowned_policy = policy.parse()?;
		}
		if let Ok(limit) = std::env::var("MODELMARKT_MAX_PAGE_LIMIT") {
			config.api.max_page_limit = limit.parse().map_err(|_| {
				Error::ConfigError(format!("Invalid MODELMARKT_MAX_PAGE_LIMIT: {}", limit))
			})?;
		}

		Ok(config)
	}
}
