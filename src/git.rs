use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::process::run_captured;
use crate::store::Repo;

/// Source control capability used by the orchestrator
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Bring the local working copy up to date and return its head revision
    async fn checkout(&self, repo: &Repo) -> Result<String>;

    /// Where the working copy for `repo` lives
    fn working_copy(&self, repo: &Repo) -> PathBuf;
}

/// Git operations via the `git` command line
#[derive(Debug, Clone)]
pub struct GitClient {
    builds_dir: PathBuf,
    branch: Option<String>,
    ssl_no_verify: bool,
    timeout: Duration,
}

/// Filesystem-safe, collision-free directory name for a repository URL
pub fn local_path(builds_dir: &Path, url: &str) -> PathBuf {
    let readable = url
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches(".git");
    let readable: String = readable
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let digest = format!("{:x}", Sha256::digest(url.trim().as_bytes()));
    builds_dir.join(format!("{}-{}", readable, &digest[..12]))
}

impl GitClient {
    pub fn new(config: &Config) -> Self {
        Self {
            builds_dir: config.builds_directory(),
            branch: config.git.branch.clone(),
            ssl_no_verify: config.git.ssl_no_verify,
            timeout: config.git_timeout(),
        }
    }

    async fn git(&self, url: &str, dir: &Path, args: &[&str]) -> Result<String> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();

        let mut envs = vec![("GIT_TERMINAL_PROMPT", "0")];
        if self.ssl_no_verify {
            envs.push(("GIT_SSL_NO_VERIFY", "true"));
        }

        let output = run_captured("git", &args, dir, &envs, self.timeout)
            .await
            .map_err(|e| Error::Sync {
                url: url.to_string(),
                message: format!("git {}: {}", args.join(" "), e),
            })?;

        if !output.success {
            return Err(Error::Sync {
                url: url.to_string(),
                message: format!("git {} failed: {}", args.join(" "), output.text.trim()),
            });
        }

        Ok(output.text)
    }

    async fn head(&self, url: &str, local: &Path) -> Result<String> {
        let out = self.git(url, local, &["rev-parse", "HEAD"]).await?;
        Ok(out.trim().to_string())
    }

    async fn clone_fresh(&self, url: &str, local: &Path) -> Result<String> {
        let parent = local.parent().unwrap_or(&self.builds_dir);
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::Sync {
                url: url.to_string(),
                message: format!("Failed to create {}: {}", parent.display(), e),
            })?;

        // Leftovers from an interrupted clone
        if tokio::fs::metadata(local).await.is_ok() {
            warn!("Removing non-git directory {}", local.display());
            tokio::fs::remove_dir_all(local)
                .await
                .map_err(|e| Error::Sync {
                    url: url.to_string(),
                    message: format!("Failed to remove {}: {}", local.display(), e),
                })?;
        }

        info!("Cloning {} -> {}", url, local.display());
        let target = local.to_string_lossy();
        self.git(url, parent, &["clone", url, target.as_ref()]).await?;

        self.head(url, local).await
    }

    async fn update(&self, url: &str, local: &Path) -> Result<String> {
        debug!("Updating {} at {}", url, local.display());

        self.git(url, local, &["clean", "-d", "-f", "-x"]).await?;
        self.git(url, local, &["fetch", "--all"]).await?;

        let target = match &self.branch {
            Some(branch) => format!("origin/{}", branch),
            None => "@{upstream}".to_string(),
        };
        self.git(url, local, &["merge", "--ff-only", &target]).await?;

        self.head(url, local).await
    }
}

#[async_trait]
impl VersionControl for GitClient {
    async fn checkout(&self, repo: &Repo) -> Result<String> {
        if repo.url.trim().is_empty() {
            return Err(Error::Validation("repository URL is empty".to_string()));
        }

        let local = self.working_copy(repo);
        let url = repo.url.trim();

        if local.join(".git").exists() {
            self.update(url, &local).await
        } else {
            self.clone_fresh(url, &local).await
        }
    }

    fn working_copy(&self, repo: &Repo) -> PathBuf {
        local_path(&self.builds_dir, &repo.url)
    }
}
