//! Daemon Infrastructure - Background service running the build loop
//!
//! This module runs the poll cycle on a fixed interval next to the HTTP
//! status/admin listener, handles PID file management and graceful shutdown.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::api::create_router;
use crate::builder::DockerCli;
use crate::git::GitClient;
use crate::notify;
use crate::orchestrator::{CycleSummary, Orchestrator, Toolchain};
use crate::store::RepoStore;
use crate::Config;

/// Parse duration strings like "30s", "5m", "1h"
pub fn parse_daemon_duration(duration_str: &str) -> Result<u64> {
    let duration_str = duration_str.trim().to_lowercase();

    if let Some(value) = duration_str.strip_suffix('s') {
        value.parse::<u64>().context("Invalid seconds value")
    } else if let Some(value) = duration_str.strip_suffix('m') {
        value.parse::<u64>().map(|v| v * 60).context("Invalid minutes value")
    } else if let Some(value) = duration_str.strip_suffix('h') {
        value.parse::<u64>().map(|v| v * 3600).context("Invalid hours value")
    } else if let Some(value) = duration_str.strip_suffix('d') {
        value.parse::<u64>().map(|v| v * 86400).context("Invalid days value")
    } else {
        // Try to parse as raw seconds
        duration_str
            .parse::<u64>()
            .context("Invalid duration format. Use format like '30s', '5m', '1h'")
    }
}

/// Build the production orchestrator for a configuration
pub async fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let store = RepoStore::open(config.store_path(), &config.registry_url)
        .await
        .context("Failed to open repository store")?;

    let docker = Arc::new(DockerCli::new(config));
    let tools = Toolchain {
        vcs: Arc::new(GitClient::new(config)),
        builder: docker.clone(),
        publisher: docker,
        notifier: notify::from_config(&config.notifications)?,
    };

    Ok(Orchestrator::new(Arc::new(store), tools, config.build.max_depth))
}

/// Daemon state and control
pub struct Daemon {
    config: Arc<Config>,
    orchestrator: Orchestrator,
    shutdown_sender: broadcast::Sender<()>,
    pid_file_path: Option<PathBuf>,
}

impl Daemon {
    /// Create a new daemon instance
    pub async fn new(config: Config) -> Result<Self> {
        let orchestrator = build_orchestrator(&config)
            .await
            .context("Failed to create orchestrator for daemon")?;
        Self::with_orchestrator(config, orchestrator)
    }

    /// Create a daemon around an existing orchestrator
    pub fn with_orchestrator(config: Config, orchestrator: Orchestrator) -> Result<Self> {
        let (shutdown_sender, _) = broadcast::channel(1);

        let pid_file_path = if !config.daemon.pid_file.is_empty() {
            let expanded_path = shellexpand::full(&config.daemon.pid_file)
                .context("Failed to expand PID file path")?;
            Some(PathBuf::from(expanded_path.as_ref()))
        } else {
            None
        };

        Ok(Self {
            config: Arc::new(config),
            orchestrator,
            shutdown_sender,
            pid_file_path,
        })
    }

    /// Handle for requesting shutdown from another task
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_sender.clone()
    }

    /// Run the daemon in the foreground until a shutdown signal arrives
    pub async fn run(&self) -> Result<()> {
        info!("Starting Stevedore daemon");

        let poll_interval = Duration::from_secs(
            parse_daemon_duration(&self.config.daemon.interval)
                .context("Failed to parse daemon poll interval")?,
        );

        // Bind before anything else; a listener failure is fatal
        let server = if self.config.server.enabled {
            Some(self.start_server().await?)
        } else {
            None
        };

        self.write_pid_file().context("Failed to write PID file")?;

        let shutdown_sender = self.shutdown_sender.clone();
        tokio::spawn(async move {
            Self::wait_for_shutdown_signal().await;
            info!("Shutdown signal received, stopping daemon...");
            let _ = shutdown_sender.send(());
        });

        self.daemon_loop(poll_interval).await;

        if let Some(server) = server {
            server.abort();
        }
        self.cleanup().context("Failed to cleanup daemon")?;

        Ok(())
    }

    async fn start_server(&self) -> Result<tokio::task::JoinHandle<()>> {
        let addr = &self.config.server.bind_address;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;
        info!("Listening on {}", addr);

        let app = create_router(self.orchestrator.store().clone());
        let mut shutdown = self.shutdown_sender.subscribe();

        Ok(tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.recv().await;
                })
                .await;
            if let Err(e) = result {
                error!("HTTP server stopped: {}", e);
            }
        }))
    }

    /// Start the daemon as a background service (Unix platforms)
    ///
    /// Must be called before the async runtime is started.
    #[cfg(unix)]
    pub fn daemonize(config: &Config) -> Result<()> {
        use daemonize::Daemonize;

        let mut daemonize = Daemonize::new();

        if !config.daemon.pid_file.is_empty() {
            daemonize = daemonize.pid_file(&config.daemon.pid_file);
        }

        if !config.daemon.log_file.is_empty() {
            let log_path = PathBuf::from(&config.daemon.log_file);
            if let Some(parent) = log_path.parent() {
                fs::create_dir_all(parent).context("Failed to create log directory")?;
            }
            let log_file = fs::File::create(&log_path).context("Failed to create log file")?;
            daemonize = daemonize.stdout(log_file.try_clone()?).stderr(log_file);
        }

        daemonize.start().context("Failed to daemonize process")?;

        Ok(())
    }

    /// Stop a running daemon by sending a shutdown signal
    pub fn stop(config: &Config) -> Result<()> {
        info!("Sending shutdown signal to daemon");

        let pid_file = PathBuf::from(&config.daemon.pid_file);
        if config.daemon.pid_file.is_empty() || !pid_file.exists() {
            warn!("PID file not found, daemon may not be running");
            return Ok(());
        }

        let pid_str = fs::read_to_string(&pid_file).context("Failed to read PID file")?;
        let pid: u32 = pid_str.trim().parse().context("Invalid PID in PID file")?;

        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
                .context("Failed to send SIGTERM to daemon process")?;
        }

        #[cfg(not(unix))]
        {
            warn!("Daemon stop not implemented for this platform");
        }

        info!("Shutdown signal sent to daemon process {}", pid);
        Ok(())
    }

    /// Main daemon loop - one cycle, then a fixed pause, until shutdown
    async fn daemon_loop(&self, poll_interval: Duration) {
        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        info!("Daemon loop started with interval: {:?}", poll_interval);

        loop {
            debug!("Starting poll cycle");
            let cycle_start = Instant::now();

            tokio::select! {
                _ = shutdown_receiver.recv() => break,
                result = self.orchestrator.run_cycle() => match result {
                    Ok(summary) => self.log_cycle_success(&summary, cycle_start.elapsed()),
                    Err(e) => error!("Poll cycle failed: {}", e),
                },
            }

            tokio::select! {
                _ = shutdown_receiver.recv() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        info!("Daemon loop exiting");
    }

    /// Wait for shutdown signals (SIGTERM, Ctrl+C)
    async fn wait_for_shutdown_signal() {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => debug!("Ctrl+C received"),
                        _ = sigterm.recv() => debug!("SIGTERM received"),
                    }
                    return;
                }
                Err(e) => warn!("Cannot listen for SIGTERM: {}", e),
            }
        }

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }

    /// Write PID file for daemon process management
    fn write_pid_file(&self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file_path {
            let pid = std::process::id();

            if let Some(parent) = pid_file.parent() {
                fs::create_dir_all(parent).context("Failed to create PID file directory")?;
            }

            fs::write(pid_file, pid.to_string()).context("Failed to write PID file")?;

            info!("PID file written: {} (PID: {})", pid_file.display(), pid);
        }

        Ok(())
    }

    /// Remove PID file and perform cleanup
    fn cleanup(&self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file_path {
            if pid_file.exists() {
                fs::remove_file(pid_file).context("Failed to remove PID file")?;
                info!("PID file removed: {}", pid_file.display());
            }
        }

        info!("Daemon cleanup completed");
        Ok(())
    }

    fn log_cycle_success(&self, summary: &CycleSummary, duration: Duration) {
        info!(
            "Poll cycle finished in {:.2}s: {} repos, {} built, {} failed",
            duration.as_secs_f64(),
            summary.total_repositories,
            summary.built,
            summary.failed
        );
    }
}

/// Check if daemon is currently running by checking PID file
pub fn is_daemon_running(config: &Config) -> Result<bool> {
    if !config.daemon.pid_file.is_empty() {
        let pid_file = PathBuf::from(&config.daemon.pid_file);

        if pid_file.exists() {
            let pid_str = fs::read_to_string(&pid_file).context("Failed to read PID file")?;

            let pid: u32 = pid_str.trim().parse().context("Invalid PID in PID file")?;

            #[cfg(unix)]
            {
                use nix::errno::Errno;
                use nix::sys::signal;
                use nix::unistd::Pid;

                let pid = Pid::from_raw(pid as i32);
                match signal::kill(pid, None) {
                    Ok(_) => return Ok(true),
                    Err(Errno::ESRCH) => {
                        // Process doesn't exist, remove stale PID file
                        let _ = fs::remove_file(&pid_file);
                        return Ok(false);
                    }
                    Err(_) => return Ok(true), // Assume running if we can't check
                }
            }

            #[cfg(not(unix))]
            {
                let _ = pid;
                return Ok(true);
            }
        }
    }

    Ok(false)
}
