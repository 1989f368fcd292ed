use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::store::{load_document, save_document};
use rand::RngCore;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

/// Bytes of entropy in a generated key; rendered as twice as many hex characters.
const KEY_BYTES: usize = 32;

type ApiKeyMap = BTreeMap<String, String>;

pub fn generate_api_key() -> String {
    let mut bytes = [0u8; KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn is_valid_api_key(key: &str) -> bool {
    key.len() == KEY_BYTES * 2 && key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

/// Pulls the key out of an `Authorization: Bearer <key>` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str> {
    let header =
        header.ok_or_else(|| Error::Unauthorized("Missing Authorization header".to_string()))?;

    let key = header.strip_prefix("Bearer ").ok_or_else(|| {
        Error::Unauthorized("Invalid Authorization format. Use: Bearer <apiKey>".to_string())
    })?;

    if !is_valid_api_key(key) {
        return Err(Error::Unauthorized("Invalid API key format".to_string()));
    }

    Ok(key)
}

/// File-backed map from user id to API key, persisted the same way as the model collection.
pub struct ApiKeyStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ApiKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.api_keys_path)
    }

    async fn load(&self) -> Result<ApiKeyMap> {
        load_document(&self.path).await
    }

    async fn save(&self, keys: &ApiKeyMap) -> Result<()> {
        save_document(&self.path, keys).await
    }

    pub async fn create(&self, user_id: &str) -> Result<String> {
        let _guard = self.write_lock.lock().await;
        let mut keys = self.load().await?;

        if keys.contains_key(user_id) {
            return Err(Error::Conflict(
                "API key already exists for this user".to_string(),
            ));
        }

        let key = generate_api_key();
        keys.insert(user_id.to_string(), key.clone());
        self.save(&keys).await?;

        tracing::info!("Issued API key for user {}", user_id);
        Ok(key)
    }

    pub async fn regenerate(&self, user_id: &str) -> Result<String> {
        let _guard = self.write_lock.lock().await;
        let mut keys = self.load().await?;

        let key = generate_api_key();
        keys.insert(user_id.to_string(), key.clone());
        self.save(&keys).await?;

        tracing::info!("Regenerated API key for user {}", user_id);
        Ok(key)
    }

    pub async fn get(&self, user_id: &str) -> Result<String> {
        self.load()
            .await?
            .remove(user_id)
            .ok_or_else(|| Error::NotFound("API key".to_string()))
    }

    pub async fn revoke(&self, user_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut keys = self.load().await?;

        if keys.remove(user_id).is_none() {
            return Err(Error::NotFound("API key".to_string()));
        }
        self.save(&keys).await?;

        tracing::info!("Revoked API key for user {}", user_id);
        Ok(())
    }

    /// Owner of `key`, if any user holds it.
    pub async fn resolve(&self, key: &str) -> Result<Option<String>> {
        let keys = self.load().await?;
        Ok(keys
            .into_iter()
            .find(|(_, candidate)| constant_time_compare(candidate, key))
            .map(|(user_id, _)| user_id))
    }
}
