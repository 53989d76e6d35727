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

//! Server settings from LSP `initializationOptions`.
//!
//! Settings are camelCase JSON:
//!
//! ```json
//! {
//!   "indexing": { "ignoreDirectoryNames": ["vendor"], "ignorePaths": ["/abs/path"] },
//!   "validation": { "enableEnhancedValidation": true },
//!   "terraform": { "path": "/usr/local/bin/terraform", "timeout": "45s" }
//! }
//! ```
//!
//! Unknown keys are ignored. Options of the wrong type or with invalid
//! values produce [`ConfigError`]s; the affected section falls back to its
//! defaults so the server always starts.

use crate::constants::DEFAULT_TERRAFORM_TIMEOUT_SECS;
use parking_lot::RwLock;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Problems found while reading settings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// `initializationOptions` did not match the expected shape.
    #[error("invalid initialization options: {0}")]
    InvalidOptions(String),

    #[error("ignore path must be absolute: {}", .0.display())]
    RelativeIgnorePath(PathBuf),

    /// Directory names are matched against single path components.
    #[error("ignored directory name must not contain a path separator: {0}")]
    InvalidDirectoryName(String),

    #[error("invalid terraform timeout {0:?}, expected a duration such as \"30s\"")]
    InvalidTimeout(String),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub indexing: IndexingSettings,
    pub validation: ValidationSettings,
    pub terraform: TerraformSettings,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexingSettings {
    /// Extra directory names the walker skips, in addition to the defaults.
    pub ignore_directory_names: Vec<String>,
    /// Absolute paths the walker skips.
    pub ignore_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationSettings {
    pub enable_enhanced_validation: bool,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            enable_enhanced_validation: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TerraformSettings {
    /// Binary to run; `terraform` from `PATH` when unset.
    pub path: Option<PathBuf>,
    /// Timeout per CLI invocation, e.g. `"30s"`.
    pub timeout: Option<String>,
}

impl Settings {
    /// Read settings from `initializationOptions`, collecting every problem.
    ///
    /// Returns usable settings in all cases.
    pub fn from_initialization_options(options: Option<serde_json::Value>) -> (Self, Vec<ConfigError>) {
        let mut errors = Vec::new();
        let value = match options {
            None | Some(serde_json::Value::Null) => return (Self::default(), errors),
            Some(value) => value,
        };

        let mut settings = match serde_json::from_value::<Settings>(value.clone()) {
            Ok(settings) => settings,
            Err(err) => {
                errors.push(ConfigError::InvalidOptions(err.to_string()));
                Self::from_sections(&value, &mut errors)
            }
        };
        settings.sanitize(&mut errors);
        (settings, errors)
    }

    /// Deserialize each section on its own so one bad section does not
    /// discard the others.
    fn from_sections(value: &serde_json::Value, errors: &mut Vec<ConfigError>) -> Self {
        fn section<T: for<'de> Deserialize<'de> + Default>(
            value: &serde_json::Value,
            key: &str,
            errors: &mut Vec<ConfigError>,
        ) -> T {
            match value.get(key) {
                None => T::default(),
                Some(v) => serde_json::from_value(v.clone()).unwrap_or_else(|err| {
                    errors.push(ConfigError::InvalidOptions(format!("{}: {}", key, err)));
                    T::default()
                }),
            }
        }

        // The whole-document error has already been recorded; only report
        // per-section errors when they add information.
        let mut section_errors = Vec::new();
        let settings = Self {
            indexing: section(value, "indexing", &mut section_errors),
            validation: section(value, "validation", &mut section_errors),
            terraform: section(value, "terraform", &mut section_errors),
        };
        if section_errors.len() > 1 {
            errors.extend(section_errors);
        }
        settings
    }

    fn sanitize(&mut self, errors: &mut Vec<ConfigError>) {
        self.indexing.ignore_paths.retain(|path| {
            if path.is_absolute() {
                true
            } else {
                errors.push(ConfigError::RelativeIgnorePath(path.clone()));
                false
            }
        });
        self.indexing.ignore_directory_names.retain(|name| {
            if name.contains('/') || name.contains('\\') {
                errors.push(ConfigError::InvalidDirectoryName(name.clone()));
                false
            } else {
                true
            }
        });
        if let Some(raw) = &self.terraform.timeout {
            if parse_duration(raw).is_none() {
                errors.push(ConfigError::InvalidTimeout(raw.clone()));
                self.terraform.timeout = None;
            }
        }
    }

    /// Effective Terraform CLI timeout.
    pub fn terraform_timeout(&self) -> Duration {
        self.terraform
            .timeout
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(Duration::from_secs(DEFAULT_TERRAFORM_TIMEOUT_SECS))
    }
}

/// Parse durations such as `500ms`, `30s`, `2m` or `1h`.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit())?;
    let (digits, unit) = raw.split_at(split);
    let amount: u64 = digits.parse().ok()?;
    let duration = match unit {
        "ms" => Duration::from_millis(amount),
        "s" => Duration::from_secs(amount),
        "m" => Duration::from_secs(amount.checked_mul(60)?),
        "h" => Duration::from_secs(amount.checked_mul(3600)?),
        _ => return None,
    };
    if duration.is_zero() {
        None
    } else {
        Some(duration)
    }
}

/// Enhanced validation switch shared by the features, flipped at runtime
/// when the client sends new settings.
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    enhanced: Arc<RwLock<bool>>,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self::new(ValidationSettings::default().enable_enhanced_validation)
    }
}

impl ValidationOptions {
    pub fn new(enhanced: bool) -> Self {
        Self {
            enhanced: Arc::new(RwLock::new(enhanced)),
        }
    }

    pub fn enhanced_validation(&self) -> bool {
        *self.enhanced.read()
    }

    pub fn set_enhanced_validation(&self, enabled: bool) {
        *self.enhanced.write() = enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_options_use_defaults() {
        let (settings, errors) = Settings::from_initialization_options(None);
        assert!(errors.is_empty());
        assert_eq!(settings, Settings::default());
        assert!(settings.validation.enable_enhanced_validation);
    }

    #[test]
    fn test_camel_case_options() {
        let options = json!({
            "indexing": { "ignoreDirectoryNames": ["vendor"], "ignorePaths": ["/opt/skip"] },
            "validation": { "enableEnhancedValidation": false },
            "terraform": { "path": "/usr/bin/terraform", "timeout": "45s" },
            "experimentalFeatures": { "anything": true }
        });
        let (settings, errors) = Settings::from_initialization_options(Some(options));
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(settings.indexing.ignore_directory_names, vec!["vendor"]);
        assert_eq!(settings.indexing.ignore_paths, vec![PathBuf::from("/opt/skip")]);
        assert!(!settings.validation.enable_enhanced_validation);
        assert_eq!(settings.terraform.path, Some(PathBuf::from("/usr/bin/terraform")));
        assert_eq!(settings.terraform_timeout(), Duration::from_secs(45));
    }

    #[test]
    fn test_wrong_type_keeps_other_sections() {
        let options = json!({
            "indexing": { "ignoreDirectoryNames": "vendor" },
            "validation": { "enableEnhancedValidation": false }
        });
        let (settings, errors) = Settings::from_initialization_options(Some(options));
        assert!(matches!(errors[0], ConfigError::InvalidOptions(_)));
        assert!(settings.indexing.ignore_directory_names.is_empty());
        assert!(!settings.validation.enable_enhanced_validation);
    }

    #[test]
    fn test_invalid_values_are_dropped() {
        let options = json!({
            "indexing": { "ignoreDirectoryNames": ["a/b", "ok"], "ignorePaths": ["relative"] },
            "terraform": { "timeout": "soon" }
        });
        let (settings, errors) = Settings::from_initialization_options(Some(options));
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ConfigError::RelativeIgnorePath(PathBuf::from("relative"))));
        assert!(errors.contains(&ConfigError::InvalidDirectoryName("a/b".into())));
        assert!(errors.contains(&ConfigError::InvalidTimeout("soon".into())));
        assert_eq!(settings.indexing.ignore_directory_names, vec!["ok"]);
        assert_eq!(
            settings.terraform_timeout(),
            Duration::from_secs(DEFAULT_TERRAFORM_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("0s"), None);
        assert_eq!(parse_duration("30"), None);
        assert_eq!(parse_duration("s"), None);
    }

    #[test]
    fn test_validation_options_shared() {
        let options = ValidationOptions::new(true);
        let clone = options.clone();
        clone.set_enhanced_validation(false);
        assert!(!options.enhanced_validation());
    }
}
