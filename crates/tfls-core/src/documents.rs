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

//! Open document storage.
//!
//! The [`DocumentStore`] holds the text of every document the editor has
//! open, keyed by absolute path. It is the in-memory half of the
//! [`OverlayFs`](crate::fs::OverlayFs): jobs read open documents from here
//! and everything else from disk.
//!
//! # Responsibilities
//!
//! - Document open / change / close with versioning
//! - Incremental edits addressed in LSP positions (UTF-16 code units)
//! - Document size limit enforcement
//! - Tracking which directories have open documents, mirrored into the
//!   [`JobStore`] so jobs for open directories are dequeued first

use crate::constants::DEFAULT_MAX_DOCUMENT_SIZE;
use crate::error::DocumentError;
use crate::jobs::JobStore;
use crate::language::LanguageId;
use dashmap::DashMap;
use parking_lot::Mutex;
use ropey::Rope;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// A document, addressed by its directory and file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentHandle {
    dir: PathBuf,
    filename: String,
}

impl DocumentHandle {
    pub fn new(dir: impl Into<PathBuf>, filename: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            filename: filename.into(),
        }
    }

    /// Split a file path into directory and file name.
    pub fn from_path(path: &Path) -> Option<Self> {
        let dir = path.parent()?;
        let filename = path.file_name()?.to_str()?;
        Some(Self::new(dir, filename))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.filename)
    }
}

/// A position in LSP coordinates: zero-based line and UTF-16 column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// One content change of a `didChange` notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChange {
    /// Replaced range; `None` replaces the whole document.
    pub range: Option<(Position, Position)>,
    pub text: String,
}

impl TextChange {
    pub fn full(text: impl Into<String>) -> Self {
        Self {
            range: None,
            text: text.into(),
        }
    }

    pub fn ranged(start: Position, end: Position, text: impl Into<String>) -> Self {
        Self {
            range: Some((start, end)),
            text: text.into(),
        }
    }
}

/// State of one open document.
pub struct DocumentState {
    pub rope: Rope,
    pub version: i32,
    pub language: LanguageId,
}

/// Counters for monitoring.
#[derive(Debug, Clone, Default)]
pub struct DocumentStatistics {
    pub open_documents: usize,
    pub open_dirs: usize,
    pub total_bytes: usize,
    pub opened: u64,
    pub changed: u64,
    pub closed: u64,
    pub rejected: u64,
}

/// Text of every open document.
///
/// # Thread Safety
///
/// Documents live in a `DashMap` with one `parking_lot::Mutex` per document,
/// so edits to different documents never contend.
pub struct DocumentStore {
    documents: DashMap<PathBuf, Arc<Mutex<DocumentState>>>,
    open_dirs: Mutex<HashMap<PathBuf, usize>>,
    jobs: Arc<JobStore>,
    stats: Arc<Mutex<DocumentStatistics>>,
    max_document_size: Arc<parking_lot::RwLock<usize>>,
}

impl DocumentStore {
    pub fn new(jobs: Arc<JobStore>) -> Self {
        Self::with_max_document_size(jobs, DEFAULT_MAX_DOCUMENT_SIZE)
    }

    pub fn with_max_document_size(jobs: Arc<JobStore>, max_document_size: usize) -> Self {
        Self {
            documents: DashMap::new(),
            open_dirs: Mutex::new(HashMap::new()),
            jobs,
            stats: Arc::new(Mutex::new(DocumentStatistics::default())),
            max_document_size: Arc::new(parking_lot::RwLock::new(max_document_size)),
        }
    }

    /// Update maximum document size (can be called during runtime).
    pub fn set_max_document_size(&self, new_max: usize) {
        *self.max_document_size.write() = new_max;
        debug!("Max document size updated to: {} bytes", new_max);
    }

    pub fn max_document_size(&self) -> usize {
        *self.max_document_size.read()
    }

    fn check_size(&self, path: &Path, size: usize) -> Result<(), DocumentError> {
        let max = self.max_document_size();
        if size > max {
            warn!(
                "Document size limit exceeded for {}: {} bytes > {} bytes maximum (rejected)",
                path.display(),
                size,
                max
            );
            self.stats.lock().rejected += 1;
            return Err(DocumentError::TooLarge {
                path: path.to_path_buf(),
                size,
                max,
            });
        }
        Ok(())
    }

    /// Open a document, or replace its content if it is already open.
    pub fn open(
        &self,
        path: &Path,
        language: LanguageId,
        version: i32,
        text: &str,
    ) -> Result<DocumentHandle, DocumentError> {
        let handle = DocumentHandle::from_path(path)
            .ok_or_else(|| DocumentError::NoDirectory(path.to_path_buf()))?;
        self.check_size(path, text.len())?;

        let state = DocumentState {
            rope: Rope::from_str(text),
            version,
            language,
        };
        // The directory count moves together with the document map.
        let mut open_dirs = self.open_dirs.lock();
        let previous = self
            .documents
            .insert(path.to_path_buf(), Arc::new(Mutex::new(state)));
        if previous.is_none() {
            let count = open_dirs.entry(handle.dir().to_path_buf()).or_insert(0);
            *count += 1;
            if *count == 1 {
                self.jobs.set_dir_open(handle.dir(), true);
            }
        }
        drop(open_dirs);
        self.stats.lock().opened += 1;

        debug!(
            "Document opened: {} ({} bytes, version {}, {})",
            path.display(),
            text.len(),
            version,
            language
        );
        Ok(handle)
    }

    /// Apply the changes of a `didChange` notification in order.
    ///
    /// The edit is all-or-nothing: on error the document keeps its previous
    /// content and version.
    pub fn change(
        &self,
        path: &Path,
        version: i32,
        changes: &[TextChange],
    ) -> Result<DocumentHandle, DocumentError> {
        let handle = DocumentHandle::from_path(path)
            .ok_or_else(|| DocumentError::NoDirectory(path.to_path_buf()))?;
        let entry = self
            .documents
            .get(path)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DocumentError::NotOpen(path.to_path_buf()))?;

        let mut state = entry.lock();
        let mut rope = state.rope.clone();
        for change in changes {
            match change.range {
                None => rope = Rope::from_str(&change.text),
                Some((start, end)) => {
                    let start_char = position_to_char(&rope, start).ok_or_else(|| {
                        DocumentError::InvalidPosition {
                            path: path.to_path_buf(),
                            line: start.line,
                            character: start.character,
                        }
                    })?;
                    let end_char = position_to_char(&rope, end).ok_or_else(|| {
                        DocumentError::InvalidPosition {
                            path: path.to_path_buf(),
                            line: end.line,
                            character: end.character,
                        }
                    })?;
                    let (start_char, end_char) = if start_char <= end_char {
                        (start_char, end_char)
                    } else {
                        (end_char, start_char)
                    };
                    rope.remove(start_char..end_char);
                    rope.insert(start_char, &change.text);
                }
            }
        }
        self.check_size(path, rope.len_bytes())?;

        debug!(
            "Document changed: {} ({} -> {} bytes, version {})",
            path.display(),
            state.rope.len_bytes(),
            rope.len_bytes(),
            version
        );
        state.rope = rope;
        state.version = version;
        self.stats.lock().changed += 1;
        Ok(handle)
    }

    /// Close a document. Returns `false` if it was not open.
    pub fn close(&self, path: &Path) -> bool {
        let mut open_dirs = self.open_dirs.lock();
        if self.documents.remove(path).is_none() {
            return false;
        }
        if let Some(dir) = path.parent() {
            let now_closed = match open_dirs.get_mut(dir) {
                Some(count) => {
                    *count = count.saturating_sub(1);
                    *count == 0
                }
                None => false,
            };
            if now_closed {
                open_dirs.remove(dir);
                self.jobs.set_dir_open(dir, false);
            }
        }
        drop(open_dirs);
        self.stats.lock().closed += 1;
        debug!("Document closed: {}", path.display());
        true
    }

    pub fn text(&self, path: &Path) -> Option<String> {
        self.documents
            .get(path)
            .map(|entry| entry.lock().rope.to_string())
    }

    pub fn version(&self, path: &Path) -> Option<i32> {
        self.documents.get(path).map(|entry| entry.lock().version)
    }

    pub fn language(&self, path: &Path) -> Option<LanguageId> {
        self.documents.get(path).map(|entry| entry.lock().language)
    }

    pub fn is_document_open(&self, path: &Path) -> bool {
        self.documents.contains_key(path)
    }

    pub fn is_dir_open(&self, dir: &Path) -> bool {
        self.open_dirs.lock().contains_key(dir)
    }

    /// Open documents whose parent is `dir`, sorted by file name.
    pub fn documents_in_dir(&self, dir: &Path) -> Vec<DocumentHandle> {
        let mut handles: Vec<DocumentHandle> = self
            .documents
            .iter()
            .filter(|entry| entry.key().parent() == Some(dir))
            .filter_map(|entry| DocumentHandle::from_path(entry.key()))
            .collect();
        handles.sort_by(|a, b| a.filename.cmp(&b.filename));
        handles
    }

    /// Every open document.
    pub fn all_paths(&self) -> Vec<PathBuf> {
        self.documents.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn statistics(&self) -> DocumentStatistics {
        let mut stats = self.stats.lock().clone();
        stats.open_documents = self.documents.len();
        stats.open_dirs = self.open_dirs.lock().len();
        stats.total_bytes = self
            .documents
            .iter()
            .map(|entry| entry.lock().rope.len_bytes())
            .sum();
        stats
    }
}

/// Convert an LSP position to a char index. A column past the end of the
/// line is clamped to the line end; a line past the end is invalid except
/// for the position right after the last line.
fn position_to_char(rope: &Rope, pos: Position) -> Option<usize> {
    let line = pos.line as usize;
    let lines = rope.len_lines();
    if line >= lines {
        return (line == lines && pos.character == 0).then(|| rope.len_chars());
    }
    let line_start = rope.line_to_char(line);
    let slice = rope.line(line);
    let mut line_len = slice.len_utf16_cu();
    // Columns address content, not the line terminator.
    let chars = slice.len_chars();
    if chars > 0 && slice.char(chars - 1) == '\n' {
        line_len -= 1;
        if chars > 1 && slice.char(chars - 2) == '\r' {
            line_len -= 1;
        }
    }
    let column = (pos.character as usize).min(line_len);
    let cu = rope.char_to_utf16_cu(line_start) + column;
    Some(rope.utf16_cu_to_char(cu))
}
