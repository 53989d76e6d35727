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

//! Public module registry client and cache.

use crate::constants::{DEFAULT_REGISTRY_URL, REGISTRY_REQUEST_TIMEOUT_SECS};
use crate::decoder::RegistrySource;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("module {0} not found in the registry")]
    NotFound(String),

    #[error("registry host {0} is not supported")]
    UnsupportedHost(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RegistryModule {
    pub version: String,
    #[serde(default)]
    pub root: RegistryModuleRoot,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RegistryModuleRoot {
    #[serde(default)]
    pub inputs: Vec<RegistryInput>,
    #[serde(default)]
    pub outputs: Vec<RegistryOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegistryInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegistryOutput {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Data for `source` at `version`, or the latest version when `None`.
    async fn module_data(
        &self,
        source: &RegistrySource,
        version: Option<&str>,
    ) -> Result<RegistryModule, RegistryError>;
}

/// Exact `1.2.3` versions can be requested directly; constraints fall back
/// to the latest version.
fn exact_version(version: Option<&str>) -> Option<&str> {
    let version = version?.trim();
    let version = version.strip_prefix('=').unwrap_or(version).trim();
    let exact = !version.is_empty() && version.split('.').all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    exact.then_some(version)
}

#[derive(Debug, Clone)]
pub struct HttpRegistryClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl Default for HttpRegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRegistryClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_REGISTRY_URL.to_string(),
            timeout: Duration::from_secs(REGISTRY_REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn module_url(&self, source: &RegistrySource, version: Option<&str>) -> String {
        let mut url = format!(
            "{}/v1/modules/{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            source.namespace,
            source.name,
            source.provider
        );
        if let Some(version) = exact_version(version) {
            url.push('/');
            url.push_str(version);
        }
        url
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn module_data(
        &self,
        source: &RegistrySource,
        version: Option<&str>,
    ) -> Result<RegistryModule, RegistryError> {
        if !source.is_public() {
            return Err(RegistryError::UnsupportedHost(source.host.clone()));
        }

        let url = self.module_url(source, version);
        debug!("registry: GET {}", url);
        let response = self.client.get(&url).timeout(self.timeout).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(source.to_string()));
        }
        let module = response.error_for_status()?.json::<RegistryModule>().await?;
        Ok(module)
    }
}

/// Registry responses shared by all modules calling the same source.
#[derive(Debug, Default)]
pub struct RegistryModuleStore {
    modules: DashMap<(RegistrySource, Option<String>), Arc<RegistryModule>>,
}

impl RegistryModuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source: &RegistrySource, version: Option<&str>) -> Option<Arc<RegistryModule>> {
        self.modules
            .get(&(source.clone(), version.map(str::to_string)))
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, source: &RegistrySource, version: Option<&str>) -> bool {
        self.modules
            .contains_key(&(source.clone(), version.map(str::to_string)))
    }

    pub fn insert(&self, source: RegistrySource, version: Option<String>, module: RegistryModule) {
        self.modules.insert((source, version), Arc::new(module));
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
