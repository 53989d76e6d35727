// Dweve TFLS - Terraform Language Server
//
// Copyright (c) 2025 Dweve IP B.V. and individual contributors.
//
// SPDX-License-Identifier: Apache-2.0
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE file at the
// root of this repository or at: http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Terraform CLI access.
//!
//! Jobs never spawn processes directly: they ask an [`ExecutorFactory`] for
//! a [`TerraformExecutor`] bound to a working directory. The production
//! factory runs the `terraform` binary; tests plug in fakes.

use crate::constants::DEFAULT_TERRAFORM_TIMEOUT_SECS;
use crate::schema::ProvidersSchemaJson;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tfls_core::JobError;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecError {
    #[error("terraform binary not found (set terraform.path or add it to PATH)")]
    NotFound,

    #[error("failed to run {}: {message}", .binary.display())]
    Io { binary: PathBuf, message: String },

    #[error("terraform {command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("terraform {command} exited with {code:?}: {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("unexpected output from terraform {command}: {message}")]
    InvalidOutput { command: String, message: String },
}

impl From<ExecError> for JobError {
    fn from(err: ExecError) -> Self {
        JobError::Failed(err.to_string())
    }
}

/// `terraform version -json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TerraformVersion {
    #[serde(rename = "terraform_version")]
    pub version: String,
    #[serde(default)]
    pub platform: Option<String>,
    /// Provider source to selected version.
    #[serde(default)]
    pub provider_selections: BTreeMap<String, String>,
}

#[async_trait]
pub trait TerraformExecutor: Send + Sync {
    async fn version(&self) -> Result<TerraformVersion, ExecError>;

    async fn provider_schemas(&self) -> Result<ProvidersSchemaJson, ExecError>;
}

pub trait ExecutorFactory: Send + Sync {
    fn executor(&self, working_dir: &Path) -> Result<Arc<dyn TerraformExecutor>, ExecError>;
}

#[derive(Debug, Clone)]
struct CliSettings {
    path: Option<PathBuf>,
    timeout: Duration,
}

/// Runs the `terraform` binary. Path and timeout can change at runtime.
#[derive(Debug, Clone)]
pub struct CliExecutorFactory {
    settings: Arc<RwLock<CliSettings>>,
}

impl Default for CliExecutorFactory {
    fn default() -> Self {
        Self::new(None, Duration::from_secs(DEFAULT_TERRAFORM_TIMEOUT_SECS))
    }
}

impl CliExecutorFactory {
    pub fn new(path: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            settings: Arc::new(RwLock::new(CliSettings { path, timeout })),
        }
    }

    pub fn configure(&self, path: Option<PathBuf>, timeout: Duration) {
        let mut settings = self.settings.write();
        settings.path = path;
        settings.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.settings.read().timeout
    }

    fn resolve_binary(&self) -> Option<PathBuf> {
        if let Some(path) = self.settings.read().path.clone() {
            return Some(path);
        }
        find_in_path("terraform")
    }
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    let candidate = if cfg!(windows) {
        format!("{}.exe", name)
    } else {
        name.to_string()
    };
    std::env::split_paths(&paths)
        .map(|dir| dir.join(&candidate))
        .find(|p| p.is_file())
}

impl ExecutorFactory for CliExecutorFactory {
    fn executor(&self, working_dir: &Path) -> Result<Arc<dyn TerraformExecutor>, ExecError> {
        let binary = self.resolve_binary().ok_or(ExecError::NotFound)?;
        Ok(Arc::new(CliExecutor {
            binary,
            working_dir: working_dir.to_path_buf(),
            timeout: self.timeout(),
        }))
    }
}

#[derive(Debug, Clone)]
pub struct CliExecutor {
    binary: PathBuf,
    working_dir: PathBuf,
    timeout: Duration,
}

impl CliExecutor {
    async fn run(&self, args: &[&str]) -> Result<Vec<u8>, ExecError> {
        let command = args.join(" ");
        debug!(
            "exec: {} {} in {}",
            self.binary.display(),
            command,
            self.working_dir.display()
        );

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .current_dir(&self.working_dir)
            .env("TF_IN_AUTOMATION", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                return Err(ExecError::Timeout {
                    command,
                    timeout: self.timeout,
                })
            }
            Ok(Err(err)) => {
                return Err(ExecError::Io {
                    binary: self.binary.clone(),
                    message: err.to_string(),
                })
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            return Err(ExecError::Failed {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    async fn run_json<T: for<'de> Deserialize<'de>>(&self, args: &[&str]) -> Result<T, ExecError> {
        let stdout = self.run(args).await?;
        serde_json::from_slice(&stdout).map_err(|err| ExecError::InvalidOutput {
            command: args.join(" "),
            message: err.to_string(),
        })
    }
}

#[async_trait]
impl TerraformExecutor for CliExecutor {
    async fn version(&self) -> Result<TerraformVersion, ExecError> {
        self.run_json(&["version", "-json"]).await
    }

    async fn provider_schemas(&self) -> Result<ProvidersSchemaJson, ExecError> {
        self.run_json(&["providers", "schema", "-json"]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_json() {
        let json = r#"{
            "terraform_version": "1.6.2",
            "platform": "linux_amd64",
            "provider_selections": { "registry.terraform.io/hashicorp/aws": "5.31.0" },
            "terraform_outdated": true
        }"#;
        let version: TerraformVersion = serde_json::from_str(json).unwrap();
        assert_eq!(version.version, "1.6.2");
        assert_eq!(version.platform.as_deref(), Some("linux_amd64"));
        assert_eq!(
            version.provider_selections["registry.terraform.io/hashicorp/aws"],
            "5.31.0"
        );
    }

    #[test]
    fn test_configured_path_wins() {
        let factory = CliExecutorFactory::new(Some(PathBuf::from("/opt/tf/terraform")), Duration::from_secs(1));
        assert_eq!(factory.resolve_binary(), Some(PathBuf::from("/opt/tf/terraform")));
        factory.configure(Some(PathBuf::from("/usr/bin/terraform")), Duration::from_secs(5));
        assert_eq!(factory.resolve_binary(), Some(PathBuf::from("/usr/bin/terraform")));
        assert_eq!(factory.timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let factory = CliExecutorFactory::new(
            Some(PathBuf::from("/nonexistent/terraform-binary")),
            Duration::from_secs(5),
        );
        let dir = tempfile::tempdir().unwrap();
        let executor = factory.executor(dir.path()).unwrap();
        let err = executor.version().await.unwrap_err();
        assert!(matches!(err, ExecError::Io { .. }), "{:?}", err);
    }
}
