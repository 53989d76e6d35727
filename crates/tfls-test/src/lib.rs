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

//! Shared test fixtures and utilities for tfls integration tests.
//!
//! # Quick Start
//!
//! ```rust
//! use tfls_test::{fixtures, TempWorkspace};
//!
//! let ws = TempWorkspace::new();
//! ws.write("main.tf", fixtures::PARENT_MAIN_TF);
//! ws.write("modules/network/main.tf", fixtures::CHILD_MAIN_TF);
//! assert!(ws.path().join("modules/network/main.tf").is_file());
//! ```

pub mod fixtures;

use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tfls_core::JobStore;

/// A directory tree removed on drop.
pub struct TempWorkspace {
    dir: TempDir,
}

impl Default for TempWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

impl TempWorkspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp workspace");
        Self { dir }
    }

    /// Canonical root path; on macOS the temp dir sits behind a symlink.
    pub fn path(&self) -> PathBuf {
        self.dir
            .path()
            .canonicalize()
            .unwrap_or_else(|_| self.dir.path().to_path_buf())
    }

    /// Absolute path of `rel` inside the workspace.
    pub fn join(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.path().join(rel)
    }

    /// Write `contents` to `rel`, creating parent directories.
    pub fn write(&self, rel: impl AsRef<Path>, contents: &str) -> PathBuf {
        let path = self.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(&path, contents).expect("write fixture file");
        path
    }

    pub fn mkdir(&self, rel: impl AsRef<Path>) -> PathBuf {
        let path = self.join(rel);
        std::fs::create_dir_all(&path).expect("create dir");
        path
    }

    /// Remove a file or a whole directory.
    pub fn remove(&self, rel: impl AsRef<Path>) {
        let path = self.join(rel);
        if path.is_dir() {
            std::fs::remove_dir_all(&path).expect("remove dir");
        } else {
            std::fs::remove_file(&path).expect("remove file");
        }
    }

    /// Lay out an initialized root module calling a local child module:
    ///
    /// ```text
    /// main.tf                       module "network" { source = "./modules/network" }
    /// modules/network/main.tf       variable "cidr", output "vpc_id"
    /// .terraform/modules/modules.json
    /// ```
    pub fn with_local_module(self) -> Self {
        self.write("main.tf", fixtures::PARENT_MAIN_TF);
        self.write("modules/network/main.tf", fixtures::CHILD_MAIN_TF);
        self.write(
            ".terraform/modules/modules.json",
            &fixtures::module_manifest(&[("network", "./modules/network", "modules/network")]),
        );
        self
    }
}

/// Poll `jobs` until nothing is queued or running.
///
/// Returns `false` if the store was still busy after `timeout`.
pub async fn wait_until_idle(jobs: &JobStore, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let stats = jobs.statistics();
        if stats.queued == 0 && stats.running == 0 {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll `check` until it returns `Some`, or give up after `timeout`.
pub async fn eventually<T>(timeout: Duration, mut check: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = check() {
            return Some(value);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_creates_parents() {
        let ws = TempWorkspace::new();
        let path = ws.write("a/b/c.tf", "locals {}\n");
        assert_eq!(std::fs::read_to_string(path).unwrap(), "locals {}\n");
        ws.remove("a");
        assert!(!ws.join("a").exists());
    }

    #[test]
    fn test_with_local_module_layout() {
        let ws = TempWorkspace::new().with_local_module();
        assert!(ws.join("main.tf").is_file());
        assert!(ws.join("modules/network/main.tf").is_file());
        assert!(ws.join(".terraform/modules/modules.json").is_file());
    }

    #[tokio::test]
    async fn test_wait_until_idle_empty_store() {
        let jobs = JobStore::new();
        assert!(wait_until_idle(&jobs, Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_eventually_times_out() {
        let found: Option<()> = eventually(Duration::from_millis(30), || None).await;
        assert!(found.is_none());
    }
}
