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

//! End-to-end indexing through a started [`Service`].

mod common;

use common::{started_service, IDLE_TIMEOUT};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tfls_core::{JobBatch, JobContext, JobId, LanguageId, OpState, RequestContext, TextChange};
use tfls_lsp::decoder::TargetKind;
use tfls_lsp::Service;
use tfls_test::{eventually, fixtures, wait_until_idle, TempWorkspace};

/// Wait until `dir` has decoded reference origins and the store drained.
async fn wait_for_module(service: &Service, dir: &Path) {
    let modules = service.modules();
    let indexed = eventually(IDLE_TIMEOUT, || {
        let record = modules.module_record(dir).ok()?;
        record.reference_origins.is_loaded().then_some(())
    })
    .await;
    assert!(indexed.is_some(), "{} was not indexed", dir.display());
    assert!(wait_until_idle(service.jobs(), IDLE_TIMEOUT).await);
}

// ============================================================================
// Local module calls
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_parent_resolves_child_output() {
    let ws = TempWorkspace::new().with_local_module();
    let service = started_service();
    let root = ws.path();
    let child = ws.join("modules/network");
    let main = ws.join("main.tf");

    service
        .did_open(&main, LanguageId::Terraform, 1, fixtures::PARENT_MAIN_TF)
        .await
        .unwrap();
    wait_for_module(&service, &root).await;

    let child_record = service.modules().module_record(&child).unwrap();
    assert_eq!(child_record.parsed_files.state(), OpState::Loaded);
    assert_eq!(child_record.meta.state(), OpState::Loaded);
    assert!(child_record.reference_targets.is_loaded());

    // `module.network.vpc_id` on line 12
    let (origin, target) = service
        .modules()
        .resolve_reference(&main, 12, 12)
        .expect("origin should resolve");
    assert_eq!(origin.address, "module.network.vpc_id");
    assert_eq!(target.kind, TargetKind::ModuleOutput);
    assert_eq!(target.path, child);
    assert_eq!(target.file_path(), child.join("main.tf"));

    let references = service.modules().references_to(&target);
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].path, root);

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_clean_configuration_has_empty_diagnostics() {
    let ws = TempWorkspace::new().with_local_module();
    let service = started_service();
    let root = ws.path();

    service
        .did_open(&ws.join("main.tf"), LanguageId::Terraform, 1, fixtures::PARENT_MAIN_TF)
        .await
        .unwrap();
    wait_for_module(&service, &root).await;

    let diagnostics = service.diagnostics(&root);
    let main = diagnostics.get(&ws.join("main.tf")).expect("entry for every parsed file");
    assert!(main.is_empty(), "{:?}", main);

    service.shutdown().await;
}

// ============================================================================
// Partial failure
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_module_does_not_block_sibling() {
    let ws = TempWorkspace::new();
    ws.write("main.tf", fixtures::TWO_CALLS_MAIN_TF);
    ws.write("modules/app/main.tf", fixtures::APP_MAIN_TF);
    let service = started_service();
    let root = ws.path();
    let app = ws.join("modules/app");

    service
        .did_open(&ws.join("main.tf"), LanguageId::Terraform, 1, fixtures::TWO_CALLS_MAIN_TF)
        .await
        .unwrap();
    wait_for_module(&service, &root).await;

    let app_record = service.modules().module_record(&app).unwrap();
    assert_eq!(app_record.meta.state(), OpState::Loaded);
    assert_eq!(app_record.reference_targets.state(), OpState::Loaded);
    assert!(!service.modules().store().exists(&ws.join("modules/missing")));

    // Scheduling the calls again reports the missing one and still
    // schedules the existing one.
    let mut batch = JobBatch::new();
    let (refs, errors) = service.modules().indexer().decode_declared_module_calls(
        &root,
        false,
        &mut batch,
        &RequestContext::background(),
    );
    assert_eq!(errors.len(), 1, "{}", errors);
    assert!(errors.to_string().contains("missing"));
    assert_eq!(refs.len(), batch.len());
    assert!(!refs.is_empty());

    service.shutdown().await;
}

// ============================================================================
// State skip
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_parse_without_ignore_state_is_skipped() {
    let ws = TempWorkspace::new().with_local_module();
    let service = started_service();
    let root = ws.path();

    service
        .did_open(&ws.join("main.tf"), LanguageId::Terraform, 1, fixtures::PARENT_MAIN_TF)
        .await
        .unwrap();
    wait_for_module(&service, &root).await;

    let before = service.modules().module_record(&root).unwrap();
    let ctx = JobContext {
        id: JobId::from(u64::MAX),
        dir: root.clone(),
        job_type: tfls_lsp::features::modules::jobs::PARSE_MODULE_CONFIGURATION,
        ignore_state: false,
        request: RequestContext::background(),
    };
    let err = service
        .modules()
        .indexer()
        .clone()
        .parse_module_configuration(ctx)
        .await
        .unwrap_err();
    assert!(err.is_state_not_changed(), "{:?}", err);

    let after = service.modules().module_record(&root).unwrap();
    assert!(Arc::ptr_eq(&before, &after));

    service.shutdown().await;
}

// ============================================================================
// Edits
// ============================================================================

/// Label of the first block of `filename` in the module at `dir`.
fn first_label(service: &Service, dir: &Path, filename: &str) -> Option<String> {
    let record = service.modules().module_record(dir).ok()?;
    let files = record.parsed_files.data()?;
    files.get(filename)?.body.blocks.first()?.label(0).map(str::to_string)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_back_to_back_edits_of_two_files_are_both_indexed() {
    let ws = TempWorkspace::new();
    ws.write("a.tf", "variable \"a_old\" {}\n");
    ws.write("b.tf", "variable \"b_old\" {}\n");
    let service = started_service();
    let root = ws.path();
    let a = ws.join("a.tf");
    let b = ws.join("b.tf");

    service
        .did_open(&a, LanguageId::Terraform, 1, "variable \"a_old\" {}\n")
        .await
        .unwrap();
    service
        .did_open(&b, LanguageId::Terraform, 1, "variable \"b_old\" {}\n")
        .await
        .unwrap();
    wait_for_module(&service, &root).await;

    service
        .did_change(&a, 2, &[TextChange::full("variable \"a_new\" {}\n")])
        .await
        .unwrap();
    service
        .did_change(&b, 2, &[TextChange::full("variable \"b_new\" {}\n")])
        .await
        .unwrap();

    let both = eventually(IDLE_TIMEOUT, || {
        let a_new = first_label(&service, &root, "a.tf")? == "a_new";
        let b_new = first_label(&service, &root, "b.tf")? == "b_new";
        (a_new && b_new).then_some(())
    })
    .await;
    assert!(both.is_some(), "an edit was lost");
    assert!(wait_until_idle(service.jobs(), IDLE_TIMEOUT).await);
    assert_eq!(first_label(&service, &root, "a.tf").as_deref(), Some("a_new"));
    assert_eq!(first_label(&service, &root, "b.tf").as_deref(), Some("b_new"));

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_edit_reports_and_clears_parse_error() {
    let ws = TempWorkspace::new();
    ws.write("main.tf", fixtures::APP_MAIN_TF);
    let service = started_service();
    let root = ws.path();
    let main = ws.join("main.tf");

    service
        .did_open(&main, LanguageId::Terraform, 1, fixtures::APP_MAIN_TF)
        .await
        .unwrap();
    wait_for_module(&service, &root).await;
    assert!(service.diagnostics(&root)[&main].is_empty());

    service
        .did_change(&main, 2, &[TextChange::full(fixtures::BROKEN_TF)])
        .await
        .unwrap();
    let broken = eventually(IDLE_TIMEOUT, || {
        service
            .diagnostics(&root)
            .get(&main)
            .filter(|d| d.has_errors())
            .map(|_| ())
    })
    .await;
    assert!(broken.is_some(), "parse error not reported");

    service
        .did_change(&main, 3, &[TextChange::full(fixtures::APP_MAIN_TF)])
        .await
        .unwrap();
    let fixed = eventually(IDLE_TIMEOUT, || {
        service
            .diagnostics(&root)
            .get(&main)
            .filter(|d| d.is_empty())
            .map(|_| ())
    })
    .await;
    assert!(fixed.is_some(), "parse error not cleared");

    service.shutdown().await;
}

// ============================================================================
// Variables
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tfvars_validated_against_module() {
    let ws = TempWorkspace::new();
    ws.write("variables.tf", "variable \"region\" {}\n");
    ws.write("terraform.tfvars", fixtures::UNDECLARED_TFVARS);
    let service = started_service();
    let root = ws.path();
    let tfvars: PathBuf = ws.join("terraform.tfvars");

    service
        .did_open(&tfvars, LanguageId::TerraformVars, 1, fixtures::UNDECLARED_TFVARS)
        .await
        .unwrap();
    let validated = eventually(IDLE_TIMEOUT, || {
        let record = service.variables().variable_record(&root).ok()?;
        record.validation_diagnostics.data().cloned()
    })
    .await
    .expect("tfvars validated");

    let summaries: Vec<&str> = validated.iter().map(|d| d.summary.as_str()).collect();
    assert_eq!(summaries, vec!["Undeclared variable"]);
    assert!(wait_until_idle(service.jobs(), IDLE_TIMEOUT).await);

    service.shutdown().await;
}
