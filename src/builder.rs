//! Image build and publish via external tools

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::image::Descriptor;
use crate::process::run_captured;

/// Upper bound on stored failure output
pub const MAX_LOG_BYTES: usize = 4000;

/// Keep the last `max` bytes of `output`, cut on a character boundary
pub fn truncate_log(output: &str, max: usize) -> String {
    if output.len() <= max {
        return output.to_string();
    }

    let mut start = output.len() - max;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    output[start..].to_string()
}

#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Run the pre-build step in the working copy, if one is configured
    async fn prepare(&self, workdir: &Path) -> Result<String>;

    /// Build `descriptor` and tag the result as `image`
    async fn build(&self, descriptor: &Descriptor, image: &str) -> Result<String>;
}

#[async_trait]
pub trait ImagePublisher: Send + Sync {
    async fn publish(&self, image: &str) -> Result<String>;
}

/// Docker-compatible CLI tools (docker, podman, gcloud, ...)
#[derive(Debug, Clone)]
pub struct DockerCli {
    build_command: Vec<String>,
    publish_command: Vec<String>,
    prepare_command: Vec<String>,
    timeout: Duration,
}

impl DockerCli {
    pub fn new(config: &Config) -> Self {
        Self {
            build_command: config.build.command.clone(),
            publish_command: config.build.publish_command.clone(),
            prepare_command: config.build.prepare_command.clone(),
            timeout: config.build_timeout(),
        }
    }

    fn split(command: &[String]) -> Option<(&str, Vec<String>)> {
        let (program, args) = command.split_first()?;
        Some((program.as_str(), args.to_vec()))
    }
}

#[async_trait]
impl ImageBuilder for DockerCli {
    async fn prepare(&self, workdir: &Path) -> Result<String> {
        let Some((program, args)) = Self::split(&self.prepare_command) else {
            return Ok(String::new());
        };

        debug!("Running prepare step in {}", workdir.display());
        let label = format!("prepare step in {}", workdir.display());
        let output = run_captured(program, &args, workdir, &[], self.timeout)
            .await
            .map_err(|e| Error::Build {
                image: label.clone(),
                output: e.to_string(),
            })?;

        if !output.success {
            return Err(Error::Build {
                image: label,
                output: output.text,
            });
        }
        Ok(output.text)
    }

    async fn build(&self, descriptor: &Descriptor, image: &str) -> Result<String> {
        let (program, mut args) = Self::split(&self.build_command).ok_or_else(|| Error::Build {
            image: image.to_string(),
            output: "no build command configured".to_string(),
        })?;
        args.extend([
            "-t".to_string(),
            image.to_string(),
            "-f".to_string(),
            descriptor.file_name.clone(),
            ".".to_string(),
        ]);

        info!("Building {} from {}", image, descriptor.path.display());
        let output = run_captured(program, &args, descriptor.context_dir(), &[], self.timeout)
            .await
            .map_err(|e| Error::Build {
                image: image.to_string(),
                output: e.to_string(),
            })?;

        if !output.success {
            return Err(Error::Build {
                image: image.to_string(),
                output: output.text,
            });
        }
        Ok(output.text)
    }
}

#[async_trait]
impl ImagePublisher for DockerCli {
    async fn publish(&self, image: &str) -> Result<String> {
        let (program, mut args) =
            Self::split(&self.publish_command).ok_or_else(|| Error::Publish {
                image: image.to_string(),
                output: "no publish command configured".to_string(),
            })?;
        args.push(image.to_string());

        info!("Publishing {}", image);
        let cwd = std::env::temp_dir();
        let output = run_captured(program, &args, &cwd, &[], self.timeout)
            .await
            .map_err(|e| Error::Publish {
                image: image.to_string(),
                output: e.to_string(),
            })?;

        if !output.success {
            return Err(Error::Publish {
                image: image.to_string(),
                output: output.text,
            });
        }
        Ok(output.text)
    }
}
