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

//! Fakes shared by the integration suites.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tfls_lsp::config::ValidationOptions;
use tfls_lsp::decoder::RegistrySource;
use tfls_lsp::exec::{ExecError, ExecutorFactory, TerraformExecutor, TerraformVersion};
use tfls_lsp::registry::{RegistryClient, RegistryError, RegistryModule};
use tfls_lsp::schema::ProvidersSchemaJson;
use tfls_lsp::{Service, ServiceOptions};

pub const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Reports Terraform 1.7.0 and fails `providers schema`.
#[derive(Default)]
pub struct FakeExecutors {
    pub calls: AtomicUsize,
}

struct FakeExecutor;

#[async_trait]
impl TerraformExecutor for FakeExecutor {
    async fn version(&self) -> Result<TerraformVersion, ExecError> {
        Ok(TerraformVersion {
            version: "1.7.0".into(),
            ..TerraformVersion::default()
        })
    }

    async fn provider_schemas(&self) -> Result<ProvidersSchemaJson, ExecError> {
        Err(ExecError::Failed {
            command: "providers schema -json".into(),
            code: Some(1),
            stderr: "offline".into(),
        })
    }
}

impl ExecutorFactory for FakeExecutors {
    fn executor(&self, _: &Path) -> Result<Arc<dyn TerraformExecutor>, ExecError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeExecutor))
    }
}

/// A registry that knows no modules.
#[derive(Default)]
pub struct OfflineRegistry {
    pub requests: AtomicUsize,
}

#[async_trait]
impl RegistryClient for OfflineRegistry {
    async fn module_data(
        &self,
        source: &RegistrySource,
        _version: Option<&str>,
    ) -> Result<RegistryModule, RegistryError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Err(RegistryError::NotFound(source.to_string()))
    }
}

pub fn options() -> ServiceOptions {
    ServiceOptions {
        parallelism: 2,
        low_priority_parallelism: 1,
        executors: Arc::new(FakeExecutors::default()),
        cli: None,
        registry: Arc::new(OfflineRegistry::default()),
        validation: ValidationOptions::new(true),
    }
}

/// A started service with offline fakes.
pub fn started_service() -> Service {
    let service = Service::new(options());
    service.start();
    service
}
