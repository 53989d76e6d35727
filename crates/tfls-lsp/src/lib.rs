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

//! Terraform Language Server
//!
//! This crate indexes Terraform configuration for IDE integration through
//! the Language Server Protocol. Work is split into small jobs over
//! per-directory records, so an edit only recomputes what depends on it.
//!
//! # Features
//!
//! - **Modules**: parsing, metadata, provider schemas, reference targets and
//!   origins, schema and reference validation, registry data for calls
//! - **Variables**: `*.tfvars` parsing and validation against the variables
//!   declared by the module in the same directory
//! - **Root modules**: Terraform version, installed module manifest,
//!   provider lock file and provider schemas obtained from the CLI
//! - **Stacks**: `*.tfstack.hcl` and `*.tfdeploy.hcl` parsing and metadata
//! - **Walker**: background discovery of every directory in the workspace
//! - **Go to Definition** and **Find References** across module boundaries
//!
//! # Usage
//!
//! ```bash
//! # Run the language server (stdio transport)
//! tfls serve
//!
//! # With debug logging
//! RUST_LOG=tfls_lsp=debug tfls serve
//! ```
//!
//! ## Programmatic Usage
//!
//! ```no_run
//! use tfls_lsp::TerraformLanguageServer;
//! use tower_lsp::{LspService, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let stdin = tokio::io::stdin();
//!     let stdout = tokio::io::stdout();
//!
//!     let (service, socket) = LspService::new(TerraformLanguageServer::new);
//!     Server::new(stdin, stdout, socket).serve(service).await;
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! backend ──► Service ──► DocumentStore, EventBus
//!                │
//!                ├──► features (modules, variables, rootmodules, stacks)
//!                │       └──► JobStore ◄── Scheduler (High), Scheduler (Low)
//!                └──► Walker
//! ```
//!
//! - `backend`: tower-lsp handlers and diagnostics publishing
//! - `service`: owns stores, schedulers, features and the walker
//! - `features`: event handlers and job DAGs per record kind
//! - `decoder`: semantic analysis over parsed files
//! - `exec`, `registry`, `schema`: external data sources

pub mod backend;
pub mod config;
pub mod constants;
pub mod decoder;
pub mod exec;
pub mod features;
pub mod filenames;
pub mod registry;
pub mod schema;
pub mod service;
pub mod utils;
pub mod walker;

pub use backend::TerraformLanguageServer;
pub use service::{Service, ServiceError, ServiceOptions};

/// Server version reported in `initialize`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
