//! Stevedore - Continuous Container Image Builds for Git Repositories
//!
//! Stevedore watches a set of git repositories, and whenever one of them
//! gets a new commit it builds one container image per Dockerfile and
//! publishes the images to a registry.
//!
//! ## Modules
//!
//! - [`store`]: Durable list of tracked repositories and their build status
//! - [`git`]: Working copy synchronization
//! - [`image`]: Image naming and Dockerfile discovery
//! - [`builder`]: Build and publish through external tools
//! - [`orchestrator`]: The per-cycle pipeline
//! - [`daemon`]: Poll loop, HTTP listener and process management
//! - [`api`]: Status and administration endpoints

pub mod api;
pub mod builder;
pub mod config;
pub mod daemon;
pub mod error;
pub mod git;
pub mod health;
pub mod image;
pub mod notify;
pub mod orchestrator;
pub mod process;
pub mod store;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use git::{GitClient, VersionControl};
pub use health::HealthCheck;
pub use orchestrator::{CycleSummary, Orchestrator, RepoOutcome, Toolchain};
pub use store::{Repo, RepoStatus, RepoStore};
