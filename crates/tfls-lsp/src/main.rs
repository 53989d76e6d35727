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

//! Terraform Language Server binary.
//!
//! # Usage
//!
//! ```bash
//! # Run the language server (stdio transport)
//! tfls serve
//!
//! # More workers, more logging
//! tfls serve --parallelism 4 --log-level debug
//!
//! # Print the version
//! tfls version
//! ```
//!
//! # Editor Integration
//!
//! ## Neovim (nvim-lspconfig)
//!
//! ```lua
//! require('lspconfig.configs').tfls = {
//!   default_config = {
//!     cmd = { 'tfls', 'serve' },
//!     filetypes = { 'terraform', 'terraform-vars' },
//!     root_dir = require('lspconfig.util').root_pattern('.terraform', '.git'),
//!   },
//! }
//! require('lspconfig').tfls.setup {}
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::process::ExitCode;
use tfls_core::constants::{DEFAULT_LOW_PRIORITY_PARALLELISM, DEFAULT_PARALLELISM};
use tfls_lsp::{ServiceOptions, TerraformLanguageServer, VERSION};
use tower_lsp::{LspService, Server};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Terraform Language Server
#[derive(Parser)]
#[command(name = "tfls")]
#[command(author, version, about = "Terraform Language Server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve LSP over stdio
    Serve {
        /// Log level of the server (logs go to stderr; a set RUST_LOG replaces it)
        #[arg(long, value_enum, default_value_t = LogLevel::Info)]
        log_level: LogLevel,

        /// Workers for jobs that parse and decode files
        #[arg(long, default_value_t = DEFAULT_PARALLELISM)]
        parallelism: usize,

        /// Workers for jobs that run terraform or reach the registry
        #[arg(long, default_value_t = DEFAULT_LOW_PRIORITY_PARALLELISM)]
        low_priority_parallelism: usize,
    },

    /// Print the version
    Version,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// `RUST_LOG`, when set, replaces the `--log-level` directives.
fn log_filter(level: LogLevel, rust_log: Option<&str>) -> EnvFilter {
    let builder = EnvFilter::builder().with_default_directive(LevelFilter::WARN.into());
    if let Some(directives) = rust_log.filter(|d| !d.trim().is_empty()) {
        return builder.parse_lossy(directives);
    }
    let level = LevelFilter::from(level);
    builder.parse_lossy(format!("tfls_lsp={},tfls_core={},tower_lsp=info", level, level))
}

fn init_logging(level: LogLevel) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    // stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(level, rust_log.as_deref()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

async fn serve(level: LogLevel, parallelism: usize, low_priority_parallelism: usize) {
    init_logging(level);
    tracing::info!("tfls {} starting", VERSION);

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(move |client| {
        let options = ServiceOptions {
            parallelism,
            low_priority_parallelism,
            ..ServiceOptions::default()
        };
        TerraformLanguageServer::with_options(client, options)
    });
    Server::new(stdin, stdout, socket).serve(service).await;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            log_level,
            parallelism,
            low_priority_parallelism,
        } => {
            if parallelism == 0 || low_priority_parallelism == 0 {
                eprintln!("Error: parallelism must be at least 1");
                return ExitCode::FAILURE;
            }
            serve(log_level, parallelism, low_priority_parallelism).await;
        }
        Commands::Version => println!("tfls {}", VERSION),
    }
    ExitCode::SUCCESS
}
