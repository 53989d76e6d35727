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

//! LSP backend.
//!
//! Translates protocol messages into [`Service`] calls and publishes
//! diagnostics when the record tables change. All indexing happens in the
//! background; request handlers only read records.

use crate::config::Settings;
use crate::decoder::{ReferenceOrigin, ReferenceTarget};
use crate::service::{Service, ServiceOptions};
use crate::utils::{from_lsp_position, to_lsp_diagnostic, to_lsp_range};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tfls_core::{
    ChangeType, LanguageId, Position as DocPosition, ReadOnlyFs, RecordChange, TextChange,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};
use tracing::{debug, info, warn};

pub struct TerraformLanguageServer {
    client: Client,
    service: Arc<Service>,
    diagnostics_task: Mutex<Option<JoinHandle<()>>>,
}

impl TerraformLanguageServer {
    pub fn new(client: Client) -> Self {
        Self::with_options(client, ServiceOptions::default())
    }

    pub fn with_options(client: Client, options: ServiceOptions) -> Self {
        Self {
            client,
            service: Arc::new(Service::new(options)),
            diagnostics_task: Mutex::new(None),
        }
    }

    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    fn start_diagnostics_publisher(&self) {
        let mut slot = self.diagnostics_task.lock();
        if slot.is_some() {
            return;
        }
        let publisher = DiagnosticsPublisher {
            client: self.client.clone(),
            service: Arc::clone(&self.service),
        };
        let receivers = self.service.diagnostic_changes();
        *slot = Some(tokio::spawn(publisher.run(receivers)));
    }

    /// Text of `path` from the open document or from disk.
    fn source(&self, path: &Path) -> Option<String> {
        self.service.fs().read_file(path).ok()
    }

    fn location(&self, path: &Path, range: &tfls_hcl::Range) -> Option<Location> {
        let uri = Url::from_file_path(path).ok()?;
        let text = self.source(path);
        Some(Location::new(uri, to_lsp_range(text.as_deref(), range)))
    }

    fn target_location(&self, target: &ReferenceTarget) -> Option<Location> {
        self.location(&target.file_path(), &target.name_range)
    }

    fn origin_location(&self, origin: &ReferenceOrigin) -> Option<Location> {
        self.location(&origin.file_path(), &origin.range)
    }

    /// File path and HCL `(line, column)` of a request position.
    fn position(&self, params: &TextDocumentPositionParams) -> Option<(PathBuf, usize, usize)> {
        let path = params.text_document.uri.to_file_path().ok()?;
        let text = self.source(&path)?;
        let (line, column) = from_lsp_position(&text, params.position);
        Some((path, line, column))
    }

    fn resolve_definition(&self, path: &Path, line: usize, column: usize) -> Option<ReferenceTarget> {
        let modules = self.service.modules();
        if let Some((_, target)) = modules.resolve_reference(path, line, column) {
            return Some(target);
        }
        // A tfvars assignment points at the variable declaration.
        let origin = self.service.variables().origin_at(path, line, column)?;
        let dir = path.parent()?;
        modules
            .reference_targets(dir)
            .ok()?
            .into_iter()
            .find(|t| t.address == origin.address)
    }
}

fn language_of(item: &TextDocumentItem, path: &Path) -> Option<LanguageId> {
    LanguageId::from_lsp(&item.language_id).or_else(|| {
        path.file_name()
            .and_then(|n| n.to_str())
            .and_then(LanguageId::from_filename)
    })
}

fn change_type(typ: FileChangeType) -> Option<ChangeType> {
    match typ {
        FileChangeType::CREATED => Some(ChangeType::Created),
        FileChangeType::CHANGED => Some(ChangeType::Changed),
        FileChangeType::DELETED => Some(ChangeType::Deleted),
        _ => None,
    }
}

fn text_change(change: TextDocumentContentChangeEvent) -> TextChange {
    match change.range {
        None => TextChange::full(change.text),
        Some(range) => TextChange::ranged(
            DocPosition::new(range.start.line, range.start.character),
            DocPosition::new(range.end.line, range.end.character),
            change.text,
        ),
    }
}

/// Publishes diagnostics of open directories whenever one of their
/// records changes.
struct DiagnosticsPublisher {
    client: Client,
    service: Arc<Service>,
}

impl DiagnosticsPublisher {
    async fn run(self, receivers: Vec<broadcast::Receiver<RecordChange>>) {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for mut receiver in receivers {
            let tx = tx.clone();
            tokio::spawn(async move {
                loop {
                    match receiver.recv().await {
                        Ok(change) => {
                            if tx.send(Some(change.path)).is_err() {
                                break;
                            }
                        }
                        // Missed changes: republish everything open.
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            if tx.send(None).is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }
        drop(tx);

        while let Some(first) = rx.recv().await {
            let mut dirs = HashSet::new();
            let mut all = first.is_none();
            dirs.extend(first);
            while let Ok(next) = rx.try_recv() {
                all |= next.is_none();
                dirs.extend(next);
            }
            if all {
                dirs.extend(self.open_dirs());
            }
            for dir in dirs {
                self.publish(&dir).await;
            }
        }
    }

    fn open_dirs(&self) -> HashSet<PathBuf> {
        self.service
            .documents()
            .all_paths()
            .into_iter()
            .filter_map(|p| p.parent().map(Path::to_path_buf))
            .collect()
    }

    async fn publish(&self, dir: &Path) {
        if !self.service.documents().is_dir_open(dir) {
            return;
        }
        for (path, diags) in self.service.diagnostics(dir) {
            let Ok(uri) = Url::from_file_path(&path) else {
                continue;
            };
            let text = self.service.fs().read_file(&path).ok();
            let diagnostics = diags
                .iter()
                .map(|d| to_lsp_diagnostic(text.as_deref(), d))
                .collect();
            let version = self.service.documents().version(&path);
            self.client.publish_diagnostics(uri, diagnostics, version).await;
        }
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for TerraformLanguageServer {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        info!("tfls initializing");

        let (settings, errors) = Settings::from_initialization_options(params.initialization_options);
        for err in &errors {
            warn!("settings: {}", err);
            self.client.show_message(MessageType::WARNING, err.to_string()).await;
        }
        self.service.apply_settings(&settings);

        let mut folders: Vec<PathBuf> = params
            .workspace_folders
            .unwrap_or_default()
            .iter()
            .filter_map(|f| f.uri.to_file_path().ok())
            .collect();
        #[allow(deprecated)]
        let root_uri = params.root_uri;
        if folders.is_empty() {
            folders.extend(root_uri.and_then(|uri| uri.to_file_path().ok()));
        }
        for folder in &folders {
            self.service.add_workspace_folder(folder);
        }

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Options(TextDocumentSyncOptions {
                    open_close: Some(true),
                    change: Some(TextDocumentSyncKind::INCREMENTAL),
                    will_save: None,
                    will_save_wait_until: None,
                    save: Some(TextDocumentSyncSaveOptions::Supported(true)),
                })),
                definition_provider: Some(OneOf::Left(true)),
                references_provider: Some(OneOf::Left(true)),
                workspace: Some(WorkspaceServerCapabilities {
                    workspace_folders: Some(WorkspaceFoldersServerCapabilities {
                        supported: Some(true),
                        change_notifications: Some(OneOf::Left(true)),
                    }),
                    file_operations: None,
                }),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: "tfls".to_string(),
                version: Some(crate::VERSION.to_string()),
            }),
        })
    }

    async fn initialized(&self, _params: InitializedParams) {
        self.service.start();
        self.start_diagnostics_publisher();
        info!("tfls initialized");
    }

    async fn shutdown(&self) -> Result<()> {
        info!("tfls shutting down");
        if let Some(task) = self.diagnostics_task.lock().take() {
            task.abort();
        }
        self.service.shutdown().await;
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let item = params.text_document;
        let Ok(path) = item.uri.to_file_path() else {
            warn!("ignoring non-file document {}", item.uri);
            return;
        };
        let Some(language) = language_of(&item, &path) else {
            debug!("ignoring document {} with language {}", item.uri, item.language_id);
            return;
        };
        if let Err(err) = self.service.did_open(&path, language, item.version, &item.text).await {
            warn!("did_open {}: {}", item.uri, err);
            self.client.show_message(MessageType::ERROR, err.to_string()).await;
        }
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let Ok(path) = uri.to_file_path() else {
            return;
        };
        let changes: Vec<TextChange> = params.content_changes.into_iter().map(text_change).collect();
        if let Err(err) = self
            .service
            .did_change(&path, params.text_document.version, &changes)
            .await
        {
            warn!("did_change {}: {}", uri, err);
        }
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        debug!("saved {}", params.text_document.uri);
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        if let Ok(path) = uri.to_file_path() {
            self.service.did_close(&path);
        }
        self.client.publish_diagnostics(uri, Vec::new(), None).await;
    }

    async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
        for event in params.changes {
            let (Ok(path), Some(change)) = (event.uri.to_file_path(), change_type(event.typ)) else {
                continue;
            };
            if let Err(err) = self.service.did_change_watched(&path, change, None).await {
                warn!("did_change_watched_files {}: {}", event.uri, err);
            }
        }
    }

    async fn did_change_workspace_folders(&self, params: DidChangeWorkspaceFoldersParams) {
        for folder in params.event.removed {
            if let Ok(path) = folder.uri.to_file_path() {
                self.service.remove_workspace_folder(&path);
            }
        }
        for folder in params.event.added {
            if let Ok(path) = folder.uri.to_file_path() {
                self.service.add_workspace_folder(&path);
            }
        }
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        let (settings, errors) = Settings::from_initialization_options(Some(params.settings));
        for err in &errors {
            warn!("settings: {}", err);
        }
        self.service.apply_settings(&settings);
    }

    async fn goto_definition(&self, params: GotoDefinitionParams) -> Result<Option<GotoDefinitionResponse>> {
        let Some((path, line, column)) = self.position(&params.text_document_position_params) else {
            return Ok(None);
        };
        let location = self
            .resolve_definition(&path, line, column)
            .and_then(|target| self.target_location(&target));
        Ok(location.map(GotoDefinitionResponse::Scalar))
    }

    async fn references(&self, params: ReferenceParams) -> Result<Option<Vec<Location>>> {
        let Some((path, line, column)) = self.position(&params.text_document_position) else {
            return Ok(None);
        };
        let Some(target) = self.service.modules().target_at(&path, line, column) else {
            return Ok(None);
        };

        let mut locations = Vec::new();
        if params.context.include_declaration {
            locations.extend(self.target_location(&target));
        }
        locations.extend(
            self.service
                .modules()
                .references_to(&target)
                .iter()
                .filter_map(|origin| self.origin_location(origin)),
        );
        Ok(Some(locations))
    }
}
