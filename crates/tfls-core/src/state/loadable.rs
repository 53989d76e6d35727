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

//! Per-field load state.

use crate::error::JobError;

/// Lifecycle of one field of a record.
///
/// Fields start `Unknown`, are marked `Loading` when a job picks them up and
/// become `Loaded` once the job stores a result, including a failed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OpState {
    #[default]
    Unknown,
    Loading,
    Loaded,
}

/// A field whose value is produced by a job: data, error and state.
///
/// Data and error are only meaningful once the state is `Loaded`.
#[derive(Debug, Clone, PartialEq)]
pub struct Loadable<T, E = JobError> {
    data: Option<T>,
    error: Option<E>,
    state: OpState,
}

impl<T, E> Default for Loadable<T, E> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            state: OpState::Unknown,
        }
    }
}

impl<T, E> Loadable<T, E> {
    pub fn state(&self) -> OpState {
        self.state
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn error(&self) -> Option<&E> {
        self.error.as_ref()
    }

    pub fn is_unknown(&self) -> bool {
        self.state == OpState::Unknown
    }

    pub fn is_loaded(&self) -> bool {
        self.state == OpState::Loaded
    }

    /// Explicit transition, e.g. back to `Unknown` to force a reload.
    pub fn set_state(&mut self, state: OpState) {
        self.state = state;
    }

    pub fn set_loading(&mut self) {
        self.state = OpState::Loading;
    }

    /// Store a result and mark the field loaded.
    pub fn set(&mut self, data: Option<T>, error: Option<E>) {
        self.data = data;
        self.error = error;
        self.state = OpState::Loaded;
    }

    /// Store a `Result` and mark the field loaded.
    pub fn load(&mut self, result: Result<T, E>) {
        match result {
            Ok(data) => self.set(Some(data), None),
            Err(err) => self.set(None, Some(err)),
        }
    }

    /// Clear data and error and go back to `Unknown`.
    pub fn reset(&mut self) {
        self.data = None;
        self.error = None;
        self.state = OpState::Unknown;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let mut field: Loadable<u32> = Loadable::default();
        assert!(field.is_unknown());
        field.set_loading();
        assert_eq!(field.state(), OpState::Loading);
        field.set(Some(3), None);
        assert!(field.is_loaded());
        assert_eq!(field.data(), Some(&3));
    }

    #[test]
    fn test_error_still_loads() {
        let mut field: Loadable<u32> = Loadable::default();
        field.load(Err(JobError::failed("parse failed")));
        assert!(field.is_loaded());
        assert!(field.data().is_none());
        assert!(field.error().is_some());
    }

    #[test]
    fn test_reset() {
        let mut field: Loadable<&str, String> = Loadable::default();
        field.set(Some("x"), Some("warn".to_string()));
        field.reset();
        assert!(field.is_unknown());
        assert!(field.error().is_none());
    }
}
