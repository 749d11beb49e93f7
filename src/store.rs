//! Repository Store - JSON-file persistence for tracked repositories
//!
//! The store file is the single source of truth for which repositories are
//! built and what their last known status is:
//!
//! ```json
//! { "registryUrl": "gcr.io/proj", "repos": [ { "url": "...", "sha": "...",
//!   "status": "passing", "images": ["..."], "lastPublishDate": 0, "log": "" } ] }
//! ```
//!
//! Every mutation rewrites the whole file through a temp file and a rename,
//! inside one critical section shared by the polling loop and the HTTP
//! handlers. Readers that only need a recent view use [`RepoStore::snapshot`],
//! which never blocks on disk I/O.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::image::validate_url;

/// Build status of a tracked repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RepoStatus {
    /// Added but never processed
    #[default]
    Pending,
    /// Currently being synced, built or published
    InProgress,
    /// Up to date, or last build and publish succeeded
    Passing,
    /// Last sync, build or publish failed (see `log`)
    Failing,
}

impl RepoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoStatus::Pending => "pending",
            RepoStatus::InProgress => "inProgress",
            RepoStatus::Passing => "passing",
            RepoStatus::Failing => "failing",
        }
    }
}

/// One tracked git remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repo {
    pub url: String,

    /// Last revision that was processed, whether or not it published
    #[serde(default)]
    pub sha: String,

    #[serde(default)]
    pub status: RepoStatus,

    /// Images published for the last successful revision
    #[serde(default)]
    pub images: Vec<String>,

    /// Unix seconds of the last successful publish, 0 if never
    #[serde(default)]
    pub last_publish_date: i64,

    /// Tail of the failing command output, empty unless failing
    #[serde(default)]
    pub log: String,
}

impl Repo {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sha: String::new(),
            status: RepoStatus::Pending,
            images: Vec::new(),
            last_publish_date: 0,
            log: String::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_url(&self.url)
    }

    pub fn mark_in_progress(&mut self) {
        self.status = RepoStatus::InProgress;
    }

    /// Up to date with no new publish; the previous images stay current
    pub fn mark_passing(&mut self) {
        self.status = RepoStatus::Passing;
        self.log.clear();
    }

    pub fn mark_failing(&mut self, log: String) {
        self.status = RepoStatus::Failing;
        self.log = log;
    }

    /// Replace the image list after every descriptor built and published
    pub fn record_publish(&mut self, images: Vec<String>, published_at: i64) {
        self.images = images;
        self.last_publish_date = published_at;
        self.mark_passing();
    }
}

/// Contents of the store file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreFile {
    #[serde(default)]
    pub registry_url: String,

    #[serde(default)]
    pub repos: Vec<Repo>,
}

/// Status page ordering: in-progress first, then most recently published,
/// then by URL.
pub fn status_order(a: &Repo, b: &Repo) -> Ordering {
    let a_busy = a.status == RepoStatus::InProgress;
    let b_busy = b.status == RepoStatus::InProgress;

    b_busy
        .cmp(&a_busy)
        .then_with(|| b.last_publish_date.cmp(&a.last_publish_date))
        .then_with(|| a.url.cmp(&b.url))
}

/// Durable repository list backed by a single JSON file
pub struct RepoStore {
    path: PathBuf,
    io_lock: Mutex<()>,
    cache: RwLock<StoreFile>,
}

impl RepoStore {
    /// Open the store at `path`, creating an empty one for `registry_url`
    /// if the file does not exist yet
    pub async fn open(path: impl Into<PathBuf>, registry_url: &str) -> Result<Self> {
        let path = path.into();

        if tokio::fs::metadata(&path).await.is_err() {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::io(parent, e))?;
            }
            let empty = StoreFile {
                registry_url: registry_url.to_string(),
                repos: Vec::new(),
            };
            write_file(&path, &empty).await?;
            info!("Created repository store at {}", path.display());
        }

        let store = Self {
            path,
            io_lock: Mutex::new(()),
            cache: RwLock::new(StoreFile::default()),
        };
        store.load().await?;

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the store file, refreshing the in-memory snapshot
    pub async fn load(&self) -> Result<StoreFile> {
        let _guard = self.io_lock.lock().await;
        let file = read_file(&self.path).await?;
        *self.cache.write().await = file.clone();
        Ok(file)
    }

    /// All tracked repositories and the registry base URL, fresh from disk
    pub async fn all(&self) -> Result<(Vec<Repo>, String)> {
        let file = self.load().await?;
        debug!("Loaded {} repositories from {}", file.repos.len(), self.path.display());
        Ok((file.repos, file.registry_url))
    }

    /// Last loaded or written contents, without touching the disk
    pub async fn snapshot(&self) -> StoreFile {
        self.cache.read().await.clone()
    }

    /// Replace the stored record with the same URL.
    ///
    /// Returns `false` if the repository was removed in the meantime; the
    /// record is then dropped rather than re-added.
    pub async fn save(&self, repo: &Repo) -> Result<bool> {
        let _guard = self.io_lock.lock().await;
        let mut file = read_file(&self.path).await?;

        let Some(slot) = file.repos.iter_mut().find(|r| r.url == repo.url) else {
            warn!("Not saving {}: no longer tracked", repo.url);
            return Ok(false);
        };
        *slot = repo.clone();

        write_file(&self.path, &file).await?;
        *self.cache.write().await = file;
        Ok(true)
    }

    /// Start tracking a repository
    pub async fn add(&self, url: &str) -> Result<Repo> {
        let url = url.trim();
        validate_url(url)?;

        let _guard = self.io_lock.lock().await;
        let mut file = read_file(&self.path).await?;

        if file.repos.iter().any(|r| r.url == url) {
            return Err(Error::Validation(format!("{} is already tracked", url)));
        }

        let repo = Repo::new(url);
        file.repos.push(repo.clone());

        write_file(&self.path, &file).await?;
        *self.cache.write().await = file;

        info!("Now tracking {}", url);
        Ok(repo)
    }

    /// Stop tracking a repository
    pub async fn remove(&self, url: &str) -> Result<Repo> {
        let url = url.trim();

        let _guard = self.io_lock.lock().await;
        let mut file = read_file(&self.path).await?;

        let index = file
            .repos
            .iter()
            .position(|r| r.url == url)
            .ok_or_else(|| Error::NotFound(url.to_string()))?;
        let removed = file.repos.remove(index);

        write_file(&self.path, &file).await?;
        *self.cache.write().await = file;

        info!("Stopped tracking {}", url);
        Ok(removed)
    }
}

async fn read_file(path: &Path) -> Result<StoreFile> {
    let bytes = tokio::fs::read(path).await.map_err(|e| Error::io(path, e))?;

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(StoreFile::default());
    }

    serde_json::from_slice(&bytes).map_err(|source| Error::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

async fn write_file(path: &Path, file: &StoreFile) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(file).map_err(|source| Error::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(|e| Error::io(&tmp_path, e))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::io(path, e))?;

    Ok(())
}
