//! Orchestrator - one poll cycle over every tracked repository
//!
//! For each repository, strictly in order: sync the working copy, compare the
//! head revision with the stored one and, when it moved, build every
//! Dockerfile and publish the results. The new revision is recorded before
//! building so a broken commit is attempted once, not on every poll.
//!
//! Each repository's result is persisted as soon as it is known; a failure
//! in one repository never stops the cycle.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::builder::{truncate_log, ImageBuilder, ImagePublisher, MAX_LOG_BYTES};
use crate::error::{Error, Result};
use crate::git::VersionControl;
use crate::image::{find_descriptors, revision_tag, Descriptor};
use crate::notify::Notifier;
use crate::store::{Repo, RepoStore};

/// External capabilities the pipeline drives
#[derive(Clone)]
pub struct Toolchain {
    pub vcs: Arc<dyn VersionControl>,
    pub builder: Arc<dyn ImageBuilder>,
    pub publisher: Arc<dyn ImagePublisher>,
    pub notifier: Arc<dyn Notifier>,
}

/// Pipeline stage a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Sync,
    Prepare,
    Build,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Sync => "sync",
            Stage::Prepare => "prepare",
            Stage::Build => "build",
            Stage::Publish => "publish",
        };
        f.write_str(name)
    }
}

/// What happened to one repository during a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoOutcome {
    /// Record failed validation; stored status left untouched
    Skipped { url: String, reason: String },
    /// Head revision unchanged, nothing built
    UpToDate { url: String },
    /// New revision without any Dockerfile
    NothingToBuild { url: String },
    /// Every image built and published
    Built { url: String, images: Vec<String> },
    Failed { url: String, stage: Stage, error: String },
}

/// Results from a complete poll cycle
#[derive(Debug, Clone)]
pub struct CycleSummary {
    pub total_repositories: usize,
    pub built: usize,
    pub up_to_date: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration: Duration,
    pub outcomes: Vec<RepoOutcome>,
}

impl CycleSummary {
    fn compile(outcomes: Vec<RepoOutcome>, duration: Duration) -> Self {
        let mut summary = Self {
            total_repositories: outcomes.len(),
            built: 0,
            up_to_date: 0,
            failed: 0,
            skipped: 0,
            duration,
            outcomes: Vec::new(),
        };

        for outcome in &outcomes {
            match outcome {
                RepoOutcome::Built { .. } => summary.built += 1,
                RepoOutcome::UpToDate { .. } | RepoOutcome::NothingToBuild { .. } => {
                    summary.up_to_date += 1
                }
                RepoOutcome::Failed { .. } => summary.failed += 1,
                RepoOutcome::Skipped { .. } => summary.skipped += 1,
            }
        }

        summary.outcomes = outcomes;
        summary
    }
}

/// Per-cycle values shared by every repository in the cycle
struct CycleContext {
    registry_url: String,
}

pub struct Orchestrator {
    store: Arc<RepoStore>,
    tools: Toolchain,
    max_depth: usize,
}

impl Orchestrator {
    pub fn new(store: Arc<RepoStore>, tools: Toolchain, max_depth: usize) -> Self {
        Self {
            store,
            tools,
            max_depth,
        }
    }

    pub fn store(&self) -> &Arc<RepoStore> {
        &self.store
    }

    /// Process every tracked repository once, sequentially
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let start_time = Instant::now();

        let (repos, registry_url) = self.store.all().await?;
        info!("Checking {} repositories", repos.len());

        let ctx = CycleContext { registry_url };
        let mut outcomes = Vec::with_capacity(repos.len());

        for repo in repos {
            let outcome = self.process_repo(repo, &ctx).await;
            debug!("Outcome: {:?}", outcome);
            outcomes.push(outcome);
        }

        let summary = CycleSummary::compile(outcomes, start_time.elapsed());
        info!(
            "Cycle completed in {:.2}s: {} built, {} up to date, {} failed, {} skipped",
            summary.duration.as_secs_f64(),
            summary.built,
            summary.up_to_date,
            summary.failed,
            summary.skipped
        );

        Ok(summary)
    }

    async fn process_repo(&self, mut repo: Repo, ctx: &CycleContext) -> RepoOutcome {
        if let Err(e) = repo.validate() {
            warn!("Skipping invalid repository record {:?}: {}", repo.url, e);
            return RepoOutcome::Skipped {
                url: repo.url,
                reason: e.to_string(),
            };
        }

        repo.mark_in_progress();
        self.persist(&repo).await;

        let head = match self.tools.vcs.checkout(&repo).await {
            Ok(head) => head,
            Err(e) => return self.fail(repo, Stage::Sync, &e, String::new()).await,
        };

        if head == repo.sha {
            debug!("{} is up to date at {}", repo.url, revision_tag(&head));
            repo.mark_passing();
            self.persist(&repo).await;
            return RepoOutcome::UpToDate { url: repo.url };
        }

        info!(
            "{} moved {} -> {}",
            repo.url,
            revision_tag(&repo.sha),
            revision_tag(&head)
        );
        repo.sha = head;
        self.persist(&repo).await;

        let workdir = self.tools.vcs.working_copy(&repo);
        let mut transcript = String::new();

        match self.tools.builder.prepare(&workdir).await {
            Ok(output) => transcript.push_str(&output),
            Err(e) => return self.fail(repo, Stage::Prepare, &e, transcript).await,
        }

        let descriptors = match find_descriptors(&workdir, self.max_depth) {
            Ok(descriptors) => descriptors,
            Err(e) => return self.fail(repo, Stage::Build, &e, transcript).await,
        };

        if descriptors.is_empty() {
            info!("No Dockerfiles in {}, nothing to build", repo.url);
            repo.images.clear();
            repo.mark_passing();
            self.persist(&repo).await;
            return RepoOutcome::NothingToBuild { url: repo.url };
        }

        let images = match plan_images(&descriptors, &ctx.registry_url, &repo.url, &repo.sha) {
            Ok(images) => images,
            Err(e) => return self.fail(repo, Stage::Build, &e, transcript).await,
        };

        for (descriptor, image) in descriptors.iter().zip(&images) {
            match self.tools.builder.build(descriptor, image).await {
                Ok(output) => transcript.push_str(&output),
                Err(e) => return self.fail(repo, Stage::Build, &e, transcript).await,
            }
        }

        for image in &images {
            match self.tools.publisher.publish(image).await {
                Ok(output) => transcript.push_str(&output),
                Err(e) => return self.fail(repo, Stage::Publish, &e, transcript).await,
            }
        }

        repo.record_publish(images.clone(), chrono::Utc::now().timestamp());
        self.persist(&repo).await;

        self.notify(&format!(
            "✅ Published {} for {} at {}",
            images.join(", "),
            repo.url,
            revision_tag(&repo.sha)
        ))
        .await;

        RepoOutcome::Built {
            url: repo.url,
            images,
        }
    }

    async fn fail(
        &self,
        mut repo: Repo,
        stage: Stage,
        err: &Error,
        mut transcript: String,
    ) -> RepoOutcome {
        error!("{} failed for {}: {}", stage, repo.url, err);

        match err.output() {
            Some(output) => transcript.push_str(output),
            None => {
                transcript.push_str(&err.to_string());
                transcript.push('\n');
            }
        }

        repo.mark_failing(truncate_log(&transcript, MAX_LOG_BYTES));
        self.persist(&repo).await;

        self.notify(&format!("❌ {} failed for {}: {}", stage, repo.url, err))
            .await;

        RepoOutcome::Failed {
            url: repo.url,
            stage,
            error: err.to_string(),
        }
    }

    async fn persist(&self, repo: &Repo) {
        if let Err(e) = self.store.save(repo).await {
            error!("Failed to save state for {}: {}", repo.url, e);
        }
    }

    async fn notify(&self, message: &str) {
        if let Err(e) = self.tools.notifier.notify(message).await {
            warn!("Notification not delivered: {}", e);
        }
    }
}

/// Image name for every descriptor, in order. Two descriptors that map to
/// the same name would overwrite each other in the registry.
fn plan_images(
    descriptors: &[Descriptor],
    registry_url: &str,
    repo_url: &str,
    revision: &str,
) -> Result<Vec<String>> {
    let mut owners: HashMap<String, &Descriptor> = HashMap::new();
    let mut images = Vec::with_capacity(descriptors.len());

    for descriptor in descriptors {
        let image = descriptor.image_name(registry_url, repo_url, revision);
        if let Some(first) = owners.insert(image.clone(), descriptor) {
            return Err(Error::Build {
                output: format!(
                    "{} and {} both produce image {}\n",
                    first.relative_path(),
                    descriptor.relative_path(),
                    image
                ),
                image,
            });
        }
        images.push(image);
    }

    Ok(images)
}
