//! External command execution with combined output capture

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tokio::time::timeout;
use tracing::debug;

/// Outcome of a finished external command
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub success: bool,
    /// stdout followed by stderr
    pub text: String,
}

/// Run `program args...` in `dir`, capturing stdout and stderr.
///
/// A non-zero exit is reported through `CapturedOutput::success`; only spawn
/// failures and timeouts surface as `Err`. A zero `limit` disables the timeout.
pub async fn run_captured(
    program: &str,
    args: &[String],
    dir: &Path,
    envs: &[(&str, &str)],
    limit: Duration,
) -> std::io::Result<CapturedOutput> {
    debug!("> {} {} (in {})", program, args.join(" "), dir.display());

    let mut command = AsyncCommand::new(program);
    command
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    for (key, value) in envs {
        command.env(key, value);
    }

    let output = if limit.is_zero() {
        command.output().await?
    } else {
        match timeout(limit, command.output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("{} timed out after {}s", program, limit.as_secs()),
                ))
            }
        }
    };

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    Ok(CapturedOutput {
        success: output.status.success(),
        text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let args = vec!["-c".to_string(), "echo out; echo err 1>&2; exit 3".to_string()];

        let output = run_captured("sh", &args, dir.path(), &[], Duration::ZERO)
            .await
            .unwrap();

        assert!(!output.success);
        assert!(output.text.contains("out"));
        assert!(output.text.contains("err"));
    }

    #[tokio::test]
    async fn test_timeout_is_reported_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let args = vec!["-c".to_string(), "sleep 5".to_string()];

        let err = run_captured("sh", &args, dir.path(), &[], Duration::from_millis(100))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = run_captured(
            "definitely-not-a-real-binary-xyz",
            &[],
            dir.path(),
            &[],
            Duration::ZERO,
        )
        .await;

        assert!(result.is_err());
    }
}
