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

//! Read-only filesystem views for jobs.
//!
//! Jobs never touch `std::fs` directly. They read through a [`ReadOnlyFs`],
//! which in the server is an [`OverlayFs`]: open documents come from the
//! [`DocumentStore`], everything else from disk.

use crate::documents::DocumentStore;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// A directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Read-only access to files and directories.
pub trait ReadOnlyFs: Send + Sync {
    fn read_file(&self, path: &Path) -> io::Result<String>;

    /// Entries of a directory, sorted by name.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;

    fn is_dir(&self, path: &Path) -> bool;

    fn exists(&self, path: &Path) -> bool;
}

/// The host filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFs;

impl ReadOnlyFs for OsFs {
    fn read_file(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            entries.push(DirEntry { name, is_dir });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Open documents layered over the host filesystem.
///
/// A document that is open but was never saved still shows up in
/// `read_dir` of its directory, even if the directory does not exist on
/// disk yet.
#[derive(Clone)]
pub struct OverlayFs {
    documents: Arc<DocumentStore>,
    disk: OsFs,
}

impl OverlayFs {
    pub fn new(documents: Arc<DocumentStore>) -> Self {
        Self {
            documents,
            disk: OsFs,
        }
    }
}

impl ReadOnlyFs for OverlayFs {
    fn read_file(&self, path: &Path) -> io::Result<String> {
        match self.documents.text(path) {
            Some(text) => Ok(text),
            None => self.disk.read_file(path),
        }
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let open = self.documents.documents_in_dir(path);
        let disk = match self.disk.read_dir(path) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound && !open.is_empty() => Vec::new(),
            Err(err) => return Err(err),
        };

        let mut merged: BTreeMap<String, bool> =
            disk.into_iter().map(|e| (e.name, e.is_dir)).collect();
        for handle in open {
            merged.entry(handle.filename().to_string()).or_insert(false);
        }
        Ok(merged
            .into_iter()
            .map(|(name, is_dir)| DirEntry { name, is_dir })
            .collect())
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.disk.is_dir(path) || self.documents.is_dir_open(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.documents.is_document_open(path) || self.is_dir(path) || self.disk.exists(path)
    }
}
