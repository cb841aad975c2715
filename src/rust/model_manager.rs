use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::fs;
use std::io;
use std::sync::Arc;
use std::env;
use tokio::sync::Mutex;
use reqwest;
use sha2::{Sha256, Digest};
use dirs;
use log;

use crate::config::AppConfig;

pub const MODEL_FILE: &str = "model.onnx";
pub const CONFIG_FILE: &str = "config.json";
pub const PREPROCESSOR_FILE: &str = "preprocessor_config.json";
pub const DEFAULT_HUB_URL: &str = "https://huggingface.co";
/// Location of the ONNX export inside a hub repository.
pub const DEFAULT_ONNX_FILE: &str = "onnx/model.onnx";

const CHECKSUM_EXTENSION: &str = "sha256";
/// Set by the hub on LFS files to the sha256 of their content.
const LINKED_ETAG_HEADER: &str = "x-linked-etag";

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model not downloaded: {0}")]
    NotDownloaded(String),
    #[error("Download error: {0}")]
    DownloadError(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Model verification failed for {0}")]
    VerificationFailed(String),
    #[error("Hash mismatch: expected {expected}, got {actual} for {file_type} file")]
    HashMismatch {
        file_type: String,
        expected: String,
        actual: String,
    },
}

/// Fetches pretrained models from a Hugging Face style hub and keeps them in a
/// local cache directory.
///
/// A model is identified by its hub repository id (`owner/name`). Each cached model
/// directory holds the ONNX graph, the model `config.json` (class labels) and the
/// `preprocessor_config.json`. Every downloaded file gets a `.sha256` sidecar that is
/// checked by [`ModelManager::verify_model`].
///
/// Downloads are checked before anything is written: against a pinned sha256 for the
/// ONNX graph when one is configured, otherwise against the hub's `X-Linked-Etag`
/// when the response carries one.
///
/// A mirror maps an identifier to the hub repository its files are fetched from, for
/// models whose own repository has no ONNX export.
///
/// An identifier naming an existing local directory is used in place and never
/// downloaded or verified.
#[derive(Clone)]
pub struct ModelManager {
    models_dir: PathBuf,
    hub_url: String,
    onnx_file: String,
    mirrors: HashMap<String, String>,
    pinned_hashes: HashMap<String, String>,
    download_lock: Arc<Mutex<()>>,
}

impl ModelManager {
    /// Creates a new ModelManager with the default models directory
    pub fn new_default() -> io::Result<Self> {
        Ok(Self::new(Self::get_default_models_dir())?)
    }

    /// Returns the default models directory path
    pub fn get_default_models_dir() -> PathBuf {
        // 1. Check environment variable
        if let Ok(path) = env::var("EDGESIGHT_CACHE") {
            return PathBuf::from(path).join("models");
        }

        // 2. Use platform-specific cache directory
        if let Some(cache_dir) = dirs::cache_dir() {
            return cache_dir.join("edgesight").join("models");
        }

        // 3. Fallback to user's home directory
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(".cache").join("edgesight").join("models");
        }

        // 4. If all else fails, use system temp directory (platform agnostic)
        env::temp_dir().join("edgesight").join("models")
    }

    pub fn new<P: AsRef<Path>>(models_dir: P) -> io::Result<Self> {
        let models_dir = models_dir.as_ref().to_path_buf();
        fs::create_dir_all(&models_dir)?;
        Ok(Self {
            models_dir,
            hub_url: DEFAULT_HUB_URL.to_string(),
            onnx_file: DEFAULT_ONNX_FILE.to_string(),
            mirrors: HashMap::new(),
            pinned_hashes: HashMap::new(),
            download_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn with_hub_url(mut self, hub_url: impl Into<String>) -> Self {
        self.hub_url = hub_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_onnx_file(mut self, onnx_file: impl Into<String>) -> Self {
        self.onnx_file = onnx_file.into().trim_start_matches('/').to_string();
        self
    }

    /// Fetches the files of `identifier` from the hub repository `repository`.
    pub fn with_mirror(mut self, identifier: impl Into<String>, repository: impl Into<String>) -> Self {
        self.mirrors.insert(identifier.into(), repository.into());
        self
    }

    /// Expected sha256 of the ONNX graph of `identifier`.
    pub fn with_pinned_hash(mut self, identifier: impl Into<String>, sha256: impl Into<String>) -> Self {
        self.pinned_hashes
            .insert(identifier.into(), sha256.into().trim().to_lowercase());
        self
    }

    /// Applies the hub URL, ONNX path, mirrors and pinned hashes of `config`.
    pub fn configured(self, config: &AppConfig) -> Self {
        let manager = self
            .with_hub_url(config.hub_url.clone())
            .with_onnx_file(config.onnx_file.clone());
        let manager = config
            .mirrors
            .iter()
            .fold(manager, |m, (id, repo)| m.with_mirror(id.clone(), repo.clone()));
        config
            .model_hashes
            .iter()
            .fold(manager, |m, (id, hash)| m.with_pinned_hash(id.clone(), hash.clone()))
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// True if the identifier points at an existing local model directory.
    pub fn is_local(&self, identifier: &str) -> bool {
        Path::new(identifier).is_dir()
    }

    /// Directory holding the files for `identifier`.
    pub fn get_model_dir(&self, identifier: &str) -> PathBuf {
        if self.is_local(identifier) {
            return PathBuf::from(identifier);
        }
        self.models_dir.join(identifier.trim_matches('/').replace('/', "--"))
    }

    pub fn get_model_path(&self, identifier: &str) -> PathBuf {
        self.get_model_dir(identifier).join(MODEL_FILE)
    }

    pub fn get_config_path(&self, identifier: &str) -> PathBuf {
        self.get_model_dir(identifier).join(CONFIG_FILE)
    }

    pub fn get_preprocessor_path(&self, identifier: &str) -> PathBuf {
        self.get_model_dir(identifier).join(PREPROCESSOR_FILE)
    }

    /// Hub repository the files of `identifier` are fetched from.
    pub fn repository<'a>(&'a self, identifier: &'a str) -> &'a str {
        self.mirrors
            .get(identifier)
            .map(String::as_str)
            .unwrap_or(identifier)
            .trim_matches('/')
    }

    /// Remote URL of one file of the model repository.
    pub fn file_url(&self, identifier: &str, file_name: &str) -> String {
        let remote = if file_name == MODEL_FILE {
            self.onnx_file.as_str()
        } else {
            file_name
        };
        format!("{}/{}/resolve/main/{}", self.hub_url, self.repository(identifier), remote)
    }

    fn model_files(&self, identifier: &str) -> [(PathBuf, &'static str); 3] {
        [
            (self.get_model_path(identifier), MODEL_FILE),
            (self.get_config_path(identifier), CONFIG_FILE),
            (self.get_preprocessor_path(identifier), PREPROCESSOR_FILE),
        ]
    }

    pub fn is_model_downloaded(&self, identifier: &str) -> bool {
        log::debug!("Checking if model '{}' is downloaded", identifier);
        self.model_files(identifier).iter().all(|(path, _)| {
            log::debug!("  {:?} (exists: {})", path, path.exists());
            path.exists()
        })
    }

    pub async fn download_model(&self, identifier: &str) -> Result<(), ModelError> {
        if self.is_local(identifier) {
            log::info!("Model '{}' is a local directory, nothing to download", identifier);
            return Ok(());
        }
        let _lock = self.download_lock.lock().await;

        let model_dir = self.get_model_dir(identifier);
        log::info!("Creating model directory at {:?}", model_dir);
        fs::create_dir_all(&model_dir)?;

        for (path, file_name) in self.model_files(identifier) {
            let result = if path.exists() && self.verify_file(&path)? {
                log::info!("Existing {} verified successfully", file_name);
                Ok(())
            } else {
                let url = self.file_url(identifier, file_name);
                let pinned = if file_name == MODEL_FILE {
                    self.pinned_hashes.get(identifier).map(String::as_str)
                } else {
                    None
                };
                self.download_and_verify_file(&url, &path, pinned, file_name).await
            };

            if let Err(e) = result {
                log::error!("Failed to set up {} for '{}': {}", file_name, identifier, e);
                // Cleanup on failure
                let _ = self.remove_download(identifier);
                return Err(e);
            }
        }

        log::info!("Model '{}' ready to use", identifier);
        Ok(())
    }

    fn checksum_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".");
        name.push(CHECKSUM_EXTENSION);
        PathBuf::from(name)
    }

    fn hash_bytes(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    }

    /// Checks a file against its `.sha256` sidecar. Missing sidecars fail verification.
    fn verify_file(&self, path: &Path) -> Result<bool, ModelError> {
        let checksum_path = Self::checksum_path(path);
        if !path.exists() || !checksum_path.exists() {
            return Ok(false);
        }
        let expected = fs::read_to_string(&checksum_path)?;
        let actual = Self::hash_bytes(&fs::read(path)?);
        log::debug!("Verifying {:?}: expected {}, got {}", path, expected.trim(), actual);
        Ok(expected.trim() == actual)
    }

    /// Writes `bytes` to `path` together with its checksum sidecar.
    pub(crate) fn store_file(&self, path: &Path, bytes: &[u8]) -> Result<String, ModelError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let hash = Self::hash_bytes(bytes);
        fs::write(path, bytes)?;
        fs::write(Self::checksum_path(path), &hash)?;
        Ok(hash)
    }

    pub fn verify_model(&self, identifier: &str) -> Result<bool, ModelError> {
        if self.is_local(identifier) {
            return Ok(self.is_model_downloaded(identifier));
        }
        for (path, file_name) in self.model_files(identifier) {
            if !self.verify_file(&path)? {
                log::info!("Verification failed for {} of '{}'", file_name, identifier);
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Fails with [`ModelError::HashMismatch`] unless `bytes` hash to `expected`.
    pub(crate) fn check_hash(bytes: &[u8], expected: &str, file_type: &str) -> Result<(), ModelError> {
        let actual = Self::hash_bytes(bytes);
        if actual != expected {
            log::error!("{} hash mismatch: expected {}, got {}", file_type, expected, actual);
            return Err(ModelError::HashMismatch {
                file_type: file_type.to_string(),
                expected: expected.to_string(),
                actual,
            });
        }
        Ok(())
    }

    /// The sha256 announced by the hub, if the header holds one.
    fn linked_etag(headers: &reqwest::header::HeaderMap) -> Option<String> {
        let value = headers.get(LINKED_ETAG_HEADER)?.to_str().ok()?;
        let value = value.trim().trim_start_matches("W/").trim_matches('"').to_lowercase();
        let is_sha256 = value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit());
        is_sha256.then_some(value)
    }

    async fn download_and_verify_file(
        &self,
        url: &str,
        path: &Path,
        pinned_hash: Option<&str>,
        file_type: &str,
    ) -> Result<(), ModelError> {
        log::info!("Downloading {} from {} to {:?}", file_type, url, path);
        let response = reqwest::get(url).await?.error_for_status()?;
        let announced = Self::linked_etag(response.headers());
        let bytes = response.bytes().await?;
        log::info!("Downloaded {} bytes", bytes.len());

        match pinned_hash.map(str::to_string).or(announced) {
            Some(expected) => Self::check_hash(&bytes, &expected, file_type)?,
            None => log::debug!("No expected hash for {}, storing as downloaded", file_type),
        }

        self.store_file(path, &bytes)?;
        log::info!("{} downloaded and verified successfully", file_type);
        Ok(())
    }

    pub fn remove_download(&self, identifier: &str) -> Result<(), ModelError> {
        if self.is_local(identifier) {
            return Ok(());
        }
        for (path, _) in self.model_files(identifier) {
            if path.exists() {
                fs::remove_file(&path)?;
            }
            let checksum_path = Self::checksum_path(&path);
            if checksum_path.exists() {
                fs::remove_file(&checksum_path)?;
            }
        }
        Ok(())
    }

    /// Ensures that a model is downloaded and verified.
    /// If the model doesn't exist, it will be downloaded.
    /// If verification fails, it will be re-downloaded.
    pub async fn ensure_model_downloaded(&self, identifier: &str) -> Result<(), ModelError> {
        if self.is_local(identifier) {
            if self.is_model_downloaded(identifier) {
                return Ok(());
            }
            return Err(ModelError::NotDownloaded(identifier.to_string()));
        }

        log::info!("Checking if model '{}' is downloaded...", identifier);
        if !self.is_model_downloaded(identifier) {
            log::info!("Model not found, downloading...");
            self.download_model(identifier).await?;
        } else if !self.verify_model(identifier)? {
            log::info!("Model verification failed, re-downloading...");
            self.remove_download(identifier)?;
            self.download_model(identifier).await?;
        } else {
            log::info!("Model verification successful");
        }

        if !self.verify_model(identifier)? {
            return Err(ModelError::VerificationFailed(identifier.to_string()));
        }
        Ok(())
    }
}
