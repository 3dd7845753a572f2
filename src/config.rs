use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use parking_lot::Mutex;
use serde::Deserialize;
use crate::core::{Result, UploadError};

/// Default location of the process configuration.
pub const CONFIG_FILE: &str = "config.toml";

/// Chunked upload v2 rejects chunks smaller than 5 MiB.
pub const MIN_CHUNK_SIZE: u64 = 5 * 1024 * 1024;
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;
/// Upper bound of chunks per file accepted by the server.
pub const MAX_CHUNKS: u64 = 10_000;
pub const DEFAULT_PARALLEL_COUNT: usize = 5;
pub const DEFAULT_RETRIES: u32 = 5;

static CONFIG: OnceLock<Mutex<Option<Config>>> = OnceLock::new();

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    /// 0 disables chunking.
    pub max_chunk_size: u64,
    pub max_parallel_count: usize,
    pub is_public_share: bool,
    pub public_shares_chunking: bool,
    pub retries: u32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_CHUNK_SIZE,
            max_parallel_count: DEFAULT_PARALLEL_COUNT,
            is_public_share: false,
            public_shares_chunking: false,
            retries: DEFAULT_RETRIES,
        }
    }
}

impl UploadConfig {
    /// Turns a server-advertised chunk size into the effective one.
    pub fn normalize_chunk_size(raw: i64) -> u64 {
        if raw <= 0 {
            return 0;
        }
        std::cmp::max(raw as u64, MIN_CHUNK_SIZE)
    }

    /// Chunk size for a file of `file_size` bytes, 0 when chunking is disabled.
    pub fn chunk_size_for(&self, file_size: u64) -> u64 {
        if self.max_chunk_size == 0 {
            return 0;
        }
        std::cmp::max(self.max_chunk_size, file_size.div_ceil(MAX_CHUNKS))
    }

    /// Chunking over a public share link needs explicit server support.
    pub fn chunking_allowed(&self) -> bool {
        !self.is_public_share || self.public_shares_chunking
    }

    /// Applies the 5 MiB floor to a configured chunk size, 0 keeps chunking off.
    pub fn normalized(mut self) -> Self {
        let raw = i64::try_from(self.max_chunk_size).unwrap_or(i64::MAX);
        self.max_chunk_size = Self::normalize_chunk_size(raw);
        self
    }

    pub fn apply_capabilities(&mut self, capabilities: &Capabilities) {
        if let Some(size) = capabilities.files.chunked_upload.max_size {
            self.max_chunk_size = Self::normalize_chunk_size(size);
        }
        if let Some(count) = capabilities.files.chunked_upload.max_parallel_count {
            if count > 0 {
                self.max_parallel_count = count;
            }
        }
        if let Some(chunking) = capabilities.dav.public_shares_chunking {
            self.public_shares_chunking = chunking;
        }
    }
}

/// Subset of the server capability document read by the uploader.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Capabilities {
    pub files: FilesCapabilities,
    pub dav: DavCapabilities,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct FilesCapabilities {
    pub chunked_upload: ChunkedUploadCapabilities,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ChunkedUploadCapabilities {
    pub max_size: Option<i64>,
    pub max_parallel_count: Option<usize>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DavCapabilities {
    pub public_shares_chunking: Option<bool>,
}

impl Capabilities {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|err| UploadError::Config(err.to_string()))
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    /// DAV root of the user's files, e.g. `https://host/remote.php/dav/files/alice`.
    pub endpoint: String,
    /// Root for temporary chunk workspaces, e.g. `https://host/remote.php/dav/uploads/alice`.
    pub uploads_endpoint: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub upload: UploadConfig,
    /// Server capabilities written inline, applied over `[upload]`.
    pub capabilities: Option<Capabilities>,
    /// JSON capability document, relative to the config file.
    pub capabilities_file: Option<PathBuf>,
}

fn default_timeout() -> u64 {
    300
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Config> {
        let mut config: Config = toml::from_str(content)?;
        config.upload = config.upload.normalized();
        if let Some(capabilities) = &config.capabilities {
            config.upload.apply_capabilities(capabilities);
        }
        Ok(config)
    }

    pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let mut config = Self::from_toml(&fs::read_to_string(path)?)?;

        if let Some(file) = &config.capabilities_file {
            let file = match path.parent() {
                Some(dir) => dir.join(file),
                None => file.clone(),
            };
            let capabilities = Capabilities::from_json(&fs::read_to_string(file)?)?;
            config.upload.apply_capabilities(&capabilities);
        }
        Ok(config)
    }
}

/// Installs the process-wide configuration.
pub fn init_config(config: Config) {
    let slot = CONFIG.get_or_init(|| Mutex::new(None));
    *slot.lock() = Some(config);
}

/// Returns the process-wide configuration, loading [`CONFIG_FILE`] on first use.
pub fn get_config() -> Result<Config> {
    let slot = CONFIG.get_or_init(|| Mutex::new(None));
    let mut guard = slot.lock();
    if let Some(config) = guard.as_ref() {
        return Ok(config.clone());
    }

    let config = Config::load_config(CONFIG_FILE)?;
    *guard = Some(config.clone());
    Ok(config)
}
