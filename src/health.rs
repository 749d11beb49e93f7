//! System health checks for Stevedore
//!
//! Preflight checks that the external tools and directories the build
//! loop depends on are in place.

use crate::store::StoreFile;
use crate::Config;
use std::path::Path;

/// Result of system health checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Git installation status
    pub git: CheckResult,
    /// Image build tool status
    pub build_tool: CheckResult,
    /// Image publish tool status
    pub publish_tool: CheckResult,
    /// Data directory status
    pub data_dir: CheckResult,
    /// Repository store status
    pub store: CheckResult,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: true,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }
}

impl HealthCheck {
    /// Run all health checks
    pub fn run(config: &Config) -> Self {
        Self {
            git: Self::check_git(),
            build_tool: Self::check_tool("Build tool", &config.build.command),
            publish_tool: Self::check_tool("Publish tool", &config.build.publish_command),
            data_dir: Self::check_data_dir(config),
            store: Self::check_store(&config.store_path()),
        }
    }

    /// Check if all required checks passed (excludes warnings)
    pub fn all_passed(&self) -> bool {
        self.all_checks().iter().all(|(_, result)| result.passed)
    }

    /// Get list of failed checks (errors only, not warnings)
    pub fn errors(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, result)| result)
            .filter(|r| !r.passed && !r.is_warning)
            .collect()
    }

    /// Get list of warnings
    pub fn warnings(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, result)| result)
            .filter(|r| r.is_warning)
            .collect()
    }

    /// Check git installation
    fn check_git() -> CheckResult {
        match std::process::Command::new("git").arg("--version").output() {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                CheckResult::ok_with_details("Git installed", version.trim().to_string())
            }
            Ok(_) => CheckResult::error("Git command failed"),
            Err(_) => CheckResult::error_with_details(
                "Git not found in PATH",
                "Install git: https://git-scm.com/downloads",
            ),
        }
    }

    /// Check that the first token of an external command can be executed
    fn check_tool(label: &str, command: &[String]) -> CheckResult {
        let Some(program) = command.first() else {
            return CheckResult::error(format!("{} is not configured", label));
        };

        match std::process::Command::new(program).arg("--version").output() {
            Ok(output) => {
                let version = String::from_utf8_lossy(&output.stdout);
                let first_line = version.lines().next().unwrap_or_default().trim().to_string();
                CheckResult::ok_with_details(format!("{} found: {}", label, program), first_line)
            }
            Err(e) => CheckResult::error_with_details(
                format!("{} not runnable: {}", label, program),
                e.to_string(),
            ),
        }
    }

    /// Check the data directory exists and is writable
    fn check_data_dir(config: &Config) -> CheckResult {
        let path = Path::new(&config.data_directory);
        if !path.exists() {
            return CheckResult::warning_with_details(
                "Data directory does not exist yet",
                format!("It will be created on start: {}", path.display()),
            );
        }

        let probe = path.join(".stevedore-write-test");
        match std::fs::write(&probe, b"") {
            Ok(()) => {
                let _ = std::fs::remove_file(&probe);
                CheckResult::ok_with_details("Data directory writable", config.data_directory.clone())
            }
            Err(e) => CheckResult::error_with_details(
                "Data directory is not writable",
                format!("{}: {}", path.display(), e),
            ),
        }
    }

    /// Check the repository store parses
    fn check_store(path: &Path) -> CheckResult {
        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return CheckResult::warning_with_details(
                    "Repository store not found",
                    format!("An empty store will be created at {}", path.display()),
                )
            }
            Err(e) => {
                return CheckResult::error_with_details(
                    "Repository store unreadable",
                    format!("{}: {}", path.display(), e),
                )
            }
        };

        match serde_json::from_slice::<StoreFile>(&content) {
            Ok(store) => CheckResult::ok_with_details(
                format!("Repository store has {} repositories", store.repos.len()),
                format!("Registry: {}", store.registry_url),
            ),
            Err(e) => CheckResult::error_with_details(
                "Repository store is not valid JSON",
                format!("{}: {}", path.display(), e),
            ),
        }
    }

    /// Get all checks as a slice for iteration
    pub fn all_checks(&self) -> [(&'static str, &CheckResult); 5] {
        [
            ("Git Installation", &self.git),
            ("Build Tool", &self.build_tool),
            ("Publish Tool", &self.publish_tool),
            ("Data Directory", &self.data_dir),
            ("Repository Store", &self.store),
        ]
    }
}
