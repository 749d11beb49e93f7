//! Shared fakes for driving the build pipeline without git or docker
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use stevedore::builder::{ImageBuilder, ImagePublisher};
use stevedore::error::{Error, Result};
use stevedore::git::{local_path, VersionControl};
use stevedore::image::Descriptor;
use stevedore::notify::Notifier;
use stevedore::{Orchestrator, Repo, RepoStore, Toolchain};

pub const REGISTRY: &str = "gcr.io/proj";

/// Version control stand-in: heads are set by the test, working copies are
/// plain directories under a temp root
pub struct FakeVcs {
    root: PathBuf,
    heads: Mutex<HashMap<String, String>>,
    broken: Mutex<HashSet<String>>,
    checkouts: Mutex<Vec<String>>,
}

impl FakeVcs {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            heads: Mutex::new(HashMap::new()),
            broken: Mutex::new(HashSet::new()),
            checkouts: Mutex::new(Vec::new()),
        }
    }

    pub fn set_head(&self, url: &str, sha: &str) {
        self.heads
            .lock()
            .unwrap()
            .insert(url.to_string(), sha.to_string());
    }

    /// Make every checkout of `url` fail until further notice
    pub fn break_remote(&self, url: &str) {
        self.broken.lock().unwrap().insert(url.to_string());
    }

    /// Write a file into the working copy of `url`
    pub fn add_file(&self, url: &str, relative: &str, contents: &str) {
        let path = local_path(&self.root, url).join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    pub fn checkouts(&self) -> Vec<String> {
        self.checkouts.lock().unwrap().clone()
    }
}

#[async_trait]
impl VersionControl for FakeVcs {
    async fn checkout(&self, repo: &Repo) -> Result<String> {
        self.checkouts.lock().unwrap().push(repo.url.clone());

        if self.broken.lock().unwrap().contains(&repo.url) {
            return Err(Error::Sync {
                url: repo.url.clone(),
                message: "fatal: could not read from remote repository".to_string(),
            });
        }

        let dir = self.working_copy(repo);
        std::fs::create_dir_all(&dir).map_err(|e| Error::Sync {
            url: repo.url.clone(),
            message: e.to_string(),
        })?;

        Ok(self
            .heads
            .lock()
            .unwrap()
            .get(&repo.url)
            .cloned()
            .unwrap_or_else(|| "0000000000000000".to_string()))
    }

    fn working_copy(&self, repo: &Repo) -> PathBuf {
        local_path(&self.root, &repo.url)
    }
}

/// Records every image it is asked to build; fails with the configured output
#[derive(Default)]
pub struct FakeBuilder {
    pub built: Mutex<Vec<String>>,
    pub failure: Mutex<Option<String>>,
    pub prepare_failure: Mutex<Option<String>>,
}

impl FakeBuilder {
    pub fn fail_prepare_with(&self, output: &str) {
        *self.prepare_failure.lock().unwrap() = Some(output.to_string());
    }

    pub fn fail_with(&self, output: &str) {
        *self.failure.lock().unwrap() = Some(output.to_string());
    }

    pub fn built(&self) -> Vec<String> {
        self.built.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageBuilder for FakeBuilder {
    async fn prepare(&self, workdir: &Path) -> Result<String> {
        match self.prepare_failure.lock().unwrap().clone() {
            Some(output) => Err(Error::Build {
                image: format!("prepare step in {}", workdir.display()),
                output,
            }),
            None => Ok(String::new()),
        }
    }

    async fn build(&self, _descriptor: &Descriptor, image: &str) -> Result<String> {
        self.built.lock().unwrap().push(image.to_string());

        match self.failure.lock().unwrap().clone() {
            Some(output) => Err(Error::Build {
                image: image.to_string(),
                output,
            }),
            None => Ok(format!("Successfully tagged {}\n", image)),
        }
    }
}

#[derive(Default)]
pub struct FakePublisher {
    pub published: Mutex<Vec<String>>,
    pub failure: Mutex<Option<String>>,
}

impl FakePublisher {
    pub fn fail_with(&self, output: &str) {
        *self.failure.lock().unwrap() = Some(output.to_string());
    }

    pub fn published(&self) -> Vec<String> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImagePublisher for FakePublisher {
    async fn publish(&self, image: &str) -> Result<String> {
        match self.failure.lock().unwrap().clone() {
            Some(output) => Err(Error::Publish {
                image: image.to_string(),
                output,
            }),
            None => {
                self.published.lock().unwrap().push(image.to_string());
                Ok(format!("pushed {}\n", image))
            }
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

/// A store in a temp directory wired to fake tools
pub struct Pipeline {
    pub dir: TempDir,
    pub store: Arc<RepoStore>,
    pub vcs: Arc<FakeVcs>,
    pub builder: Arc<FakeBuilder>,
    pub publisher: Arc<FakePublisher>,
    pub notifier: Arc<RecordingNotifier>,
    pub orchestrator: Orchestrator,
}

impl Pipeline {
    pub async fn new() -> Self {
        Self::with_store_contents(None).await
    }

    /// Start from a hand-written store file
    pub async fn with_store_contents(contents: Option<&str>) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store_path = dir.path().join("repos.json");
        if let Some(contents) = contents {
            std::fs::write(&store_path, contents).expect("Failed to write store file");
        }

        let store = Arc::new(RepoStore::open(&store_path, REGISTRY).await.unwrap());
        let vcs = Arc::new(FakeVcs::new(&dir.path().join("builds")));
        let builder = Arc::new(FakeBuilder::default());
        let publisher = Arc::new(FakePublisher::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let tools = Toolchain {
            vcs: vcs.clone(),
            builder: builder.clone(),
            publisher: publisher.clone(),
            notifier: notifier.clone(),
        };
        let orchestrator = Orchestrator::new(store.clone(), tools, 4);

        Self {
            dir,
            store,
            vcs,
            builder,
            publisher,
            notifier,
            orchestrator,
        }
    }

    /// Fetch the stored record for `url` from disk
    pub async fn repo(&self, url: &str) -> Repo {
        let (repos, _) = self.store.all().await.unwrap();
        repos
            .into_iter()
            .find(|repo| repo.url == url)
            .unwrap_or_else(|| panic!("{} is not in the store", url))
    }
}
