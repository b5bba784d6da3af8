//! Host-side cache of downloaded build assets
//!
//! Assets are stored inside the project directory so they are part of the
//! build context: `<cache_dir>/assets/<key>/<file name>`, where the key is a
//! short digest of the URL.

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_CACHE_DIR: &str = ".cm-cache";
const ASSETS_DIR: &str = "assets";
const KEY_LEN: usize = 16;

/// Read-only view of the asset cache used during compilation
pub trait AssetStore: Send + Sync {
    /// Build-context relative path of the cached file, with `/` separators
    fn relative_path(&self, url: &str) -> String;

    fn is_cached(&self, url: &str) -> bool;
}

/// Writes `bytes` to `partial`, then renames it onto `target`. On failure the
/// partial file is removed.
fn write_into_place(partial: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    let result = fs::File::create(partial)
        .with_context(|| format!("Failed to create {}", partial.display()))
        .and_then(|mut file| {
            file.write_all(bytes)
                .with_context(|| format!("Failed to write {}", partial.display()))
        })
        .and_then(|()| {
            fs::rename(partial, target).with_context(|| {
                format!("Failed to move download into place at {}", target.display())
            })
        });

    if result.is_err() && partial.exists() {
        if let Err(e) = fs::remove_file(partial) {
            warn!(path = %partial.display(), error = %e, "Failed to remove partial download");
        }
    }
    result
}

/// Cache key of `url`
pub fn asset_key(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let mut key = hex::encode(digest);
    key.truncate(KEY_LEN);
    key
}

/// File name an asset is stored under: the last URL path segment
pub fn asset_file_name(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let name = without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("");

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        "asset".to_string()
    } else {
        sanitized
    }
}

fn relative_asset_path(cache_dir: &str, url: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        cache_dir.trim_end_matches('/'),
        ASSETS_DIR,
        asset_key(url),
        asset_file_name(url)
    )
}

/// An asset present in the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedFile {
    pub key: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Asset cache on the local filesystem
pub struct LocalAssetCache {
    project_dir: PathBuf,
    cache_dir: String,
    timeout: Duration,
}

impl LocalAssetCache {
    /// `cache_dir` is relative to `project_dir`
    pub fn new(project_dir: impl Into<PathBuf>, cache_dir: impl Into<String>) -> Self {
        Self {
            project_dir: project_dir.into(),
            cache_dir: cache_dir.into(),
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn root(&self) -> PathBuf {
        self.project_dir.join(&self.cache_dir)
    }

    pub fn absolute_path(&self, url: &str) -> PathBuf {
        self.project_dir.join(self.relative_path(url))
    }

    /// Download `url` unless it is already cached; returns the cached file
    ///
    /// # Arguments
    ///
    /// * `url` - Source URL; its digest picks the cache directory
    ///
    /// # Errors
    ///
    /// Fails on network errors, non-success HTTP status, empty bodies and
    /// file system errors. A failed download leaves no file behind.
    pub fn fetch(&self, url: &str) -> Result<PathBuf> {
        let target = self.absolute_path(url);
        if target.is_file() {
            debug!(url, path = %target.display(), "Asset already cached");
            return Ok(target);
        }

        let parent = target
            .parent()
            .with_context(|| format!("Invalid cache path {}", target.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create cache directory: {}", parent.display()))?;

        info!(url, "Downloading asset");
        let bytes = self.download(url)?;

        // Write next to the target and rename so an interrupted download never
        // looks cached.
        let partial = parent.join(format!(".partial-{}", std::process::id()));
        write_into_place(&partial, &target, &bytes)?;

        info!(url, path = %target.display(), bytes = bytes.len(), "Asset cached");
        Ok(target)
    }

    fn download(&self, url: &str) -> Result<Vec<u8>> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let response = client
            .get(url)
            .send()
            .with_context(|| format!("Failed to download {} (check network connectivity)", url))?;

        if !response.status().is_success() {
            anyhow::bail!("Download failed with HTTP {} from {}", response.status(), url);
        }

        let bytes = response
            .bytes()
            .with_context(|| format!("Failed to read response body from {}", url))?;

        if bytes.is_empty() {
            anyhow::bail!("Downloaded asset is empty (HTTP 200 but 0 bytes) from {}", url);
        }

        Ok(bytes.to_vec())
    }

    /// Every cached file, sorted by path
    pub fn list(&self) -> Result<Vec<CachedFile>> {
        let assets = self.root().join(ASSETS_DIR);
        if !assets.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for key_dir in fs::read_dir(&assets)
            .with_context(|| format!("Failed to read {}", assets.display()))?
        {
            let key_dir = key_dir?;
            if !key_dir.file_type()?.is_dir() {
                continue;
            }
            let key = key_dir.file_name().to_string_lossy().to_string();
            for entry in fs::read_dir(key_dir.path())? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with(".partial-") || !entry.file_type()?.is_file() {
                    continue;
                }
                files.push(CachedFile {
                    key: key.clone(),
                    path: entry.path(),
                    size: entry.metadata()?.len(),
                });
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    /// Remove the whole cache directory; returns whether anything was removed
    pub fn clear(&self) -> Result<bool> {
        let root = self.root();
        if !root.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&root)
            .with_context(|| format!("Failed to remove cache at {}", root.display()))?;
        info!(path = %root.display(), "Cleared asset cache");
        Ok(true)
    }
}

impl AssetStore for LocalAssetCache {
    fn relative_path(&self, url: &str) -> String {
        relative_asset_path(&self.cache_dir, url)
    }

    fn is_cached(&self, url: &str) -> bool {
        self.absolute_path(url).is_file()
    }
}

/// In-memory asset store with a fixed set of cached URLs
#[derive(Debug, Clone)]
pub struct StaticAssetStore {
    cache_dir: String,
    cached: BTreeSet<String>,
}

impl StaticAssetStore {
    pub fn new(cache_dir: impl Into<String>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            cached: BTreeSet::new(),
        }
    }

    pub fn with_cached(mut self, url: impl Into<String>) -> Self {
        self.cached.insert(url.into());
        self
    }
}

impl Default for StaticAssetStore {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_DIR)
    }
}

impl AssetStore for StaticAssetStore {
    fn relative_path(&self, url: &str) -> String {
        relative_asset_path(&self.cache_dir, url)
    }

    fn is_cached(&self, url: &str) -> bool {
        self.cached.contains(url)
    }
}

/// Whether `path` is usable as a cache directory inside the build context
pub fn is_valid_cache_dir(path: &Path) -> bool {
    path.is_relative()
        && !path.as_os_str().is_empty()
        && !path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
}
