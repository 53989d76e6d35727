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

//! Service wiring.
//!
//! A [`Service`] owns every store, the event bus, the two schedulers, the
//! feature modules and the walker. The LSP backend talks to it only; tests
//! construct it directly with fake executors and registries.
//!
//! ```text
//! Service::did_open ──► DocumentStore ──► EventBus ──► features ──► JobStore
//!                                                                     │
//!                      Scheduler (High) ◄──────────────┬──────────────┘
//!                      Scheduler (Low)  ◄──────────────┘
//! ```

use crate::config::{Settings, ValidationOptions};
use crate::exec::{CliExecutorFactory, ExecutorFactory};
use crate::features::modules::ModulesFeature;
use crate::features::rootmodules::RootModulesFeature;
use crate::features::stacks::StacksFeature;
use crate::features::variables::VariablesFeature;
use crate::features::FeatureContext;
use crate::registry::{HttpRegistryClient, RegistryClient, RegistryModuleStore};
use crate::schema::ProviderSchemaStore;
use crate::walker::{IgnoreRules, Walker, WalkerPathStore};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tfls_core::constants::{
    DEFAULT_LOW_PRIORITY_PARALLELISM, DEFAULT_PARALLELISM, DEFAULT_PUBLISH_TIMEOUT_MS,
};
use tfls_core::{
    BusError, ChangeType, DidChangeEvent, DidChangeWatchedEvent, DidOpenEvent, DocumentError,
    DocumentHandle, DocumentStore, EventBus, JobPriority, JobStore, LanguageId, Lane, OverlayFs,
    ReadOnlyFs, RecordChange, RequestContext, Scheduler, TextChange,
};
use tfls_hcl::Diagnostics;
use tokio::sync::broadcast;
use tracing::{debug, info};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

pub struct ServiceOptions {
    /// Workers for High priority jobs.
    pub parallelism: usize,
    /// Workers for Low priority (network and CLI) jobs.
    pub low_priority_parallelism: usize,
    pub executors: Arc<dyn ExecutorFactory>,
    /// Receives `terraform.*` settings. Usually the factory behind
    /// `executors`.
    pub cli: Option<CliExecutorFactory>,
    pub registry: Arc<dyn RegistryClient>,
    pub validation: ValidationOptions,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        let cli = CliExecutorFactory::default();
        Self {
            parallelism: DEFAULT_PARALLELISM,
            low_priority_parallelism: DEFAULT_LOW_PRIORITY_PARALLELISM,
            executors: Arc::new(cli.clone()),
            cli: Some(cli),
            registry: Arc::new(HttpRegistryClient::new()),
            validation: ValidationOptions::default(),
        }
    }
}

pub struct Service {
    jobs: Arc<JobStore>,
    bus: Arc<EventBus>,
    documents: Arc<DocumentStore>,
    fs: Arc<dyn ReadOnlyFs>,
    validation: ValidationOptions,
    schemas: Arc<ProviderSchemaStore>,
    modules: Arc<ModulesFeature>,
    variables: Arc<VariablesFeature>,
    root_modules: Arc<RootModulesFeature>,
    stacks: Arc<StacksFeature>,
    walker: Arc<Walker>,
    high: Scheduler,
    low: Scheduler,
    cli: Option<CliExecutorFactory>,
}

impl Service {
    pub fn new(options: ServiceOptions) -> Self {
        let jobs = Arc::new(JobStore::new());
        let bus = Arc::new(EventBus::new());
        let documents = Arc::new(DocumentStore::new(Arc::clone(&jobs)));
        let fs: Arc<dyn ReadOnlyFs> = Arc::new(OverlayFs::new(Arc::clone(&documents)));
        let schemas = Arc::new(ProviderSchemaStore::new());
        let walker_paths = Arc::new(WalkerPathStore::with_documents(Arc::clone(&documents)));

        let ctx = FeatureContext {
            bus: Arc::clone(&bus),
            jobs: Arc::clone(&jobs),
            documents: Arc::clone(&documents),
            fs: Arc::clone(&fs),
            validation: options.validation.clone(),
        };
        let modules = Arc::new(ModulesFeature::new(
            ctx.clone(),
            Arc::clone(&schemas),
            options.registry,
            Arc::new(RegistryModuleStore::new()),
            Arc::clone(&walker_paths),
        ));
        let variables = Arc::new(VariablesFeature::new(ctx.clone(), modules.indexer().clone()));
        let root_modules = Arc::new(RootModulesFeature::new(
            ctx.clone(),
            options.executors,
            Arc::clone(&schemas),
        ));
        let stacks = Arc::new(StacksFeature::new(ctx));
        let walker = Arc::new(Walker::new(walker_paths, Arc::clone(&bus)));

        let high = Scheduler::new(
            Arc::clone(&jobs),
            options.parallelism.max(1),
            Lane::Only(JobPriority::High),
        );
        let low = Scheduler::new(
            Arc::clone(&jobs),
            options.low_priority_parallelism.max(1),
            Lane::Only(JobPriority::Low),
        );

        Self {
            jobs,
            bus,
            documents,
            fs,
            validation: options.validation,
            schemas,
            modules,
            variables,
            root_modules,
            stacks,
            walker,
            high,
            low,
            cli: options.cli,
        }
    }

    /// Start the schedulers, the feature event tasks and the walker.
    pub fn start(&self) {
        self.high.start();
        self.low.start();
        self.modules.start();
        self.variables.start();
        self.root_modules.start();
        self.stacks.start();
        self.walker.start();
        info!("service: started");
    }

    /// Stop producers first, then the consumers.
    pub async fn shutdown(&self) {
        self.walker.stop().await;
        self.modules.stop().await;
        self.variables.stop().await;
        self.root_modules.stop().await;
        self.stacks.stop().await;
        self.high.stop().await;
        self.low.stop().await;
        info!("service: stopped");
    }

    pub fn jobs(&self) -> &Arc<JobStore> {
        &self.jobs
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn documents(&self) -> &Arc<DocumentStore> {
        &self.documents
    }

    /// Filesystem view with open documents overlaid.
    pub fn fs(&self) -> &Arc<dyn ReadOnlyFs> {
        &self.fs
    }

    pub fn schemas(&self) -> &Arc<ProviderSchemaStore> {
        &self.schemas
    }

    pub fn modules(&self) -> &Arc<ModulesFeature> {
        &self.modules
    }

    pub fn variables(&self) -> &Arc<VariablesFeature> {
        &self.variables
    }

    pub fn root_modules(&self) -> &Arc<RootModulesFeature> {
        &self.root_modules
    }

    pub fn stacks(&self) -> &Arc<StacksFeature> {
        &self.stacks
    }

    pub fn walker(&self) -> &Arc<Walker> {
        &self.walker
    }

    // ------------------------------------------------------------------
    // Document lifecycle
    // ------------------------------------------------------------------

    pub async fn did_open(
        &self,
        path: &Path,
        language: LanguageId,
        version: i32,
        text: &str,
    ) -> Result<DocumentHandle, ServiceError> {
        let document = self.documents.open(path, language, version, text)?;
        self.bus
            .publish_did_open(DidOpenEvent {
                context: RequestContext::new(),
                dir: document.dir().to_path_buf(),
                language,
                document: document.clone(),
            })
            .await;
        Ok(document)
    }

    pub async fn did_change(
        &self,
        path: &Path,
        version: i32,
        changes: &[TextChange],
    ) -> Result<DocumentHandle, ServiceError> {
        let document = self.documents.change(path, version, changes)?;
        let language = self
            .documents
            .language(path)
            .ok_or_else(|| DocumentError::NotOpen(path.to_path_buf()))?;
        self.bus
            .publish_did_change(DidChangeEvent {
                context: RequestContext::new().with_changed_document(path),
                dir: document.dir().to_path_buf(),
                language,
                document: document.clone(),
            })
            .await;
        Ok(document)
    }

    /// Returns `false` if the document was not open.
    pub fn did_close(&self, path: &Path) -> bool {
        self.documents.close(path)
    }

    /// Forward a file watcher change. Fails if a feature does not accept
    /// the event in time.
    pub async fn did_change_watched(
        &self,
        path: &Path,
        change: ChangeType,
        is_dir: Option<bool>,
    ) -> Result<(), ServiceError> {
        let event = DidChangeWatchedEvent {
            context: RequestContext::new(),
            path: path.to_path_buf(),
            change,
            is_dir,
        };
        self.bus
            .did_change_watched()
            .publish_timeout(event, Duration::from_millis(DEFAULT_PUBLISH_TIMEOUT_MS))
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Workspace
    // ------------------------------------------------------------------

    /// Queue a workspace folder for walking. Returns `false` if it is
    /// already queued.
    pub fn add_workspace_folder(&self, path: &Path) -> bool {
        debug!("service: adding workspace folder {}", path.display());
        self.walker.paths().enqueue_dir(path)
    }

    pub fn remove_workspace_folder(&self, path: &Path) -> bool {
        self.walker.paths().remove_dir(path)
    }

    pub fn apply_settings(&self, settings: &Settings) {
        self.walker
            .set_ignore_rules(IgnoreRules::from_settings(&settings.indexing));
        self.validation
            .set_enhanced_validation(settings.validation.enable_enhanced_validation);
        if let Some(cli) = &self.cli {
            cli.configure(settings.terraform.path.clone(), settings.terraform_timeout());
        }
    }

    // ------------------------------------------------------------------
    // Results
    // ------------------------------------------------------------------

    /// Diagnostics of every feature for `dir`, keyed by file path.
    pub fn diagnostics(&self, dir: &Path) -> BTreeMap<PathBuf, Diagnostics> {
        let mut by_file: BTreeMap<PathBuf, Diagnostics> = BTreeMap::new();
        let sources = [
            self.modules.diagnostics(dir),
            self.variables.diagnostics(dir),
            self.stacks.diagnostics(dir),
        ];
        for per_file in sources.into_iter().flatten() {
            for (filename, diags) in per_file {
                by_file.entry(dir.join(filename)).or_default().extend(diags);
            }
        }
        by_file
    }

    /// Change streams of the record tables that carry diagnostics.
    pub fn diagnostic_changes(&self) -> Vec<broadcast::Receiver<RecordChange>> {
        vec![
            self.modules.store().subscribe(),
            self.variables.store().subscribe(),
            self.stacks.store().subscribe(),
        ]
    }
}
