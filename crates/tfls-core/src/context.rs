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

//! Request context carried from an event to the jobs it schedules.

use std::path::{Path, PathBuf};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::Span;

/// Cancellation, tracing and change information propagated with events.
///
/// Cloning is cheap. Clones share the same cancellation token; use
/// [`RequestContext::child`] for a context that can be cancelled on its own.
#[derive(Debug, Clone)]
pub struct RequestContext {
    cancel: CancellationToken,
    span: Span,
    changed_document: Option<PathBuf>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    /// Create a context attached to the current tracing span.
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            span: Span::current(),
            changed_document: None,
        }
    }

    /// Create a context with no parent span, for work not triggered by a
    /// request (e.g. the initial workspace walk).
    pub fn background() -> Self {
        Self {
            cancel: CancellationToken::new(),
            span: Span::none(),
            changed_document: None,
        }
    }

    /// Attach a tracing span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Record the file whose change triggered this request.
    pub fn with_changed_document(mut self, path: impl Into<PathBuf>) -> Self {
        self.changed_document = Some(path.into());
        self
    }

    /// A context whose token is cancelled with this one, but can also be
    /// cancelled independently.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            span: self.span.clone(),
            changed_document: self.changed_document.clone(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the context is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// The changed document, if the request came from a `didChange`.
    pub fn changed_document(&self) -> Option<&Path> {
        self.changed_document.as_deref()
    }
}
