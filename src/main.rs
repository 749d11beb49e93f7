use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stevedore::daemon::{build_orchestrator, is_daemon_running};
use stevedore::image::image_name;
use stevedore::{Config, Daemon, HealthCheck, RepoOutcome, RepoStore};

#[derive(Parser)]
#[command(name = "stevedore")]
#[command(about = "Continuous container image builds for git repositories")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as daemon
    Daemon {
        #[command(subcommand)]
        daemon_command: DaemonCommands,
    },

    /// Run a single poll cycle and exit
    Once,

    /// Manage tracked repositories
    Repos {
        #[command(subcommand)]
        repos_command: ReposCommands,
    },

    /// Print the image name a Dockerfile would be published as
    ImageName {
        /// Repository URL
        url: String,

        /// Dockerfile name
        #[arg(long, default_value = "Dockerfile")]
        descriptor: String,

        /// Directory of the Dockerfile relative to the repository root
        #[arg(long, default_value = "")]
        sub_path: String,

        /// Revision being built
        #[arg(long)]
        revision: String,

        /// Registry (defaults to the store's registry)
        #[arg(long)]
        registry: Option<String>,
    },

    /// System health check and diagnostics
    Doctor,
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Start the daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(long)]
        foreground: bool,
    },

    /// Stop running daemon
    Stop,

    /// Show daemon status
    Status,
}

#[derive(Subcommand)]
enum ReposCommands {
    /// List tracked repositories
    List,

    /// Start tracking a repository
    Add { url: String },

    /// Stop tracking a repository
    Remove { url: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    // Fork before the runtime exists
    if let Commands::Daemon {
        daemon_command: DaemonCommands::Start { foreground: false },
    } = &cli.command
    {
        if is_daemon_running(&config)? {
            println!("⚠️  Daemon is already running!");
            println!("   Use 'stevedore daemon stop' to stop it first");
            return Ok(());
        }
        println!("🚀 Starting Stevedore daemon in background");
        println!("   PID file: {}", config.daemon.pid_file);
        println!("   Log file: {}", config.daemon.log_file);

        #[cfg(unix)]
        {
            Daemon::daemonize(&config)?;
        }

        #[cfg(not(unix))]
        {
            anyhow::bail!("Background mode is only supported on Unix; use --foreground");
        }
    }

    init_logging(cli.verbose, &config)?;
    info!("Starting Stevedore v{}", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async move {
        match cli.command {
            Commands::Daemon { daemon_command } => cmd_daemon(daemon_command, &config).await,
            Commands::Once => cmd_once(&config).await,
            Commands::Repos { repos_command } => cmd_repos(repos_command, &config).await,
            Commands::ImageName {
                url,
                descriptor,
                sub_path,
                revision,
                registry,
            } => cmd_image_name(&url, &descriptor, &sub_path, &revision, registry, &config).await,
            Commands::Doctor => cmd_doctor(&config),
        }
    })
}

/// Initialize logging based on verbosity level and configuration
fn init_logging(verbose: bool, config: &Config) -> Result<()> {
    let default_level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let layer = fmt::layer().with_ansi(config.logging.color);
    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format == "full" {
        registry.with(layer).try_init()?;
    } else {
        registry.with(layer.compact()).try_init()?;
    }

    Ok(())
}

/// Handle daemon commands
async fn cmd_daemon(daemon_command: DaemonCommands, config: &Config) -> Result<()> {
    match daemon_command {
        DaemonCommands::Start { foreground } => {
            if foreground {
                if is_daemon_running(config)? {
                    println!("⚠️  Daemon is already running!");
                    return Ok(());
                }
                println!("🖥️  Running in foreground mode (Ctrl+C to stop)");
            }

            let daemon = Daemon::new(config.clone()).await?;
            daemon.run().await?;
        }

        DaemonCommands::Stop => {
            println!("🛑 Stopping Stevedore daemon...");

            if !is_daemon_running(config)? {
                println!("⚠️  No daemon appears to be running");
                return Ok(());
            }

            Daemon::stop(config)?;
            println!("✅ Daemon stop signal sent");
        }

        DaemonCommands::Status => {
            println!("📊 Stevedore Daemon Status");

            if is_daemon_running(config)? {
                println!("   🟢 Status: Running");
                println!("   🔄 Poll interval: {}", config.daemon.interval);
                if config.server.enabled {
                    println!("   🌐 Listening on: {}", config.server.bind_address);
                }
            } else {
                println!("   🔴 Status: Not running");
                println!("   💡 Use 'stevedore daemon start' to start the daemon");
            }
        }
    }

    Ok(())
}

/// Run a single poll cycle
async fn cmd_once(config: &Config) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let summary = orchestrator.run_cycle().await?;

    println!("\n🎉 Cycle Complete!");
    println!("   📊 Total repositories: {}", summary.total_repositories);
    println!("   📦 Built and published: {}", summary.built);
    println!("   ✅ Up to date: {}", summary.up_to_date);
    println!("   ❌ Failed: {}", summary.failed);
    println!("   ⏭️  Skipped: {}", summary.skipped);
    println!("   ⏱️  Duration: {:.2}s", summary.duration.as_secs_f64());

    for outcome in &summary.outcomes {
        match outcome {
            RepoOutcome::Built { url, images } => {
                println!("   📦 {}: {}", url, images.join(", "));
            }
            RepoOutcome::Failed { url, stage, error } => {
                println!("   ❌ {} ({}): {}", url, stage, error);
            }
            _ => {}
        }
    }

    Ok(())
}

/// Manage tracked repositories
async fn cmd_repos(repos_command: ReposCommands, config: &Config) -> Result<()> {
    let store = RepoStore::open(config.store_path(), &config.registry_url).await?;

    match repos_command {
        ReposCommands::List => {
            let (mut repos, registry) = store.all().await?;
            repos.sort_by(stevedore::store::status_order);

            println!("Registry: {}", registry);
            println!("Repositories ({}):", repos.len());
            for repo in repos {
                println!("  📁 {} [{}]", repo.url, repo.status.as_str());
                if !repo.sha.is_empty() {
                    println!("     SHA: {}", repo.sha);
                }
                for image in &repo.images {
                    println!("     🐳 {}", image);
                }
            }
        }
        ReposCommands::Add { url } => {
            store.add(&url).await?;
            println!("✅ Now tracking {}", url);
        }
        ReposCommands::Remove { url } => {
            store.remove(&url).await?;
            println!("✅ Stopped tracking {}", url);
        }
    }

    Ok(())
}

/// Print a derived image name
async fn cmd_image_name(
    url: &str,
    descriptor: &str,
    sub_path: &str,
    revision: &str,
    registry: Option<String>,
    config: &Config,
) -> Result<()> {
    stevedore::image::validate_url(url)?;

    let registry = match registry {
        Some(registry) => registry,
        None => {
            let store = RepoStore::open(config.store_path(), &config.registry_url).await?;
            store.snapshot().await.registry_url
        }
    };

    println!("{}", image_name(&registry, url, sub_path, descriptor, revision));
    Ok(())
}

/// System health check and diagnostics
fn cmd_doctor(config: &Config) -> Result<()> {
    let health = HealthCheck::run(config);
    print_health_report(&health);
    Ok(())
}

/// Print health check report to stdout
fn print_health_report(health: &HealthCheck) {
    use stevedore::health::CheckResult;

    fn print_check(name: &str, result: &CheckResult) {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning {
                "⚠️ "
            } else {
                "✅"
            }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
    }

    println!("🔍 Stevedore System Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        print_check(name, result);
        println!();
    }

    if health.all_passed() {
        println!("✅ All checks passed");
    } else {
        println!("❌ Some checks failed");
    }
}
