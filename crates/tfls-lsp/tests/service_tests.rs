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

//! Walker, file watcher and root module handling through a started
//! [`Service`].

mod common;

use common::{started_service, IDLE_TIMEOUT};
use tfls_core::{ChangeType, LanguageId};
use tfls_test::{eventually, fixtures, wait_until_idle, TempWorkspace};

// ============================================================================
// Walker
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_walker_discovers_workspace() {
    let ws = TempWorkspace::new().with_local_module();
    ws.write("envs/prod/prod.tfvars", fixtures::TERRAFORM_TFVARS);
    ws.write(".terragrunt-cache/pkg/main.tf", "");
    let service = started_service();
    let root = ws.path();

    assert!(service.add_workspace_folder(&root));
    let found = eventually(IDLE_TIMEOUT, || {
        let paths = service.modules().module_paths();
        (paths.len() == 2).then_some(paths)
    })
    .await
    .expect("module dirs discovered");
    assert_eq!(found, vec![root.clone(), ws.join("modules/network")]);

    let roots = eventually(IDLE_TIMEOUT, || service.root_modules().store().exists(&root).then_some(()))
        .await;
    assert!(roots.is_some(), "manifest dir not discovered as root module");
    let vars = eventually(IDLE_TIMEOUT, || {
        service
            .variables()
            .store()
            .exists(&ws.join("envs/prod"))
            .then_some(())
    })
    .await;
    assert!(vars.is_some());
    assert!(!service.modules().store().exists(&ws.join(".terragrunt-cache/pkg")));

    service.shutdown().await;
}

// ============================================================================
// Root modules
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watched_lock_file_loads_providers() {
    let ws = TempWorkspace::new();
    ws.write("main.tf", fixtures::APP_MAIN_TF);
    let lock = ws.write(
        ".terraform.lock.hcl",
        &fixtures::lock_file(&[("registry.terraform.io/hashicorp/random", "3.6.0")]),
    );
    let service = started_service();
    let root = ws.path();

    service
        .did_change_watched(&lock, ChangeType::Created, Some(false))
        .await
        .unwrap();
    let providers = eventually(IDLE_TIMEOUT, || {
        let providers = service.root_modules().installed_providers(&root).ok()?;
        (!providers.is_empty()).then_some(providers)
    })
    .await
    .expect("lock file parsed");
    assert_eq!(providers["registry.terraform.io/hashicorp/random"], "3.6.0");

    // The CLI is offline, so the embedded schema is used.
    let schemas = eventually(IDLE_TIMEOUT, || {
        service.root_modules().root_record(&root).ok()?.provider_schemas.data().copied()
    })
    .await;
    assert_eq!(schemas, Some(1));
    assert!(wait_until_idle(service.jobs(), IDLE_TIMEOUT).await);

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_open_in_root_module_loads_version_and_manifest() {
    let ws = TempWorkspace::new().with_local_module();
    let service = started_service();
    let root = ws.path();

    service
        .did_change_watched(&ws.join(".terraform/modules/modules.json"), ChangeType::Created, Some(false))
        .await
        .unwrap();
    let calls = eventually(IDLE_TIMEOUT, || {
        let calls = service.root_modules().installed_module_calls(&root).ok()?;
        (!calls.is_empty()).then_some(calls)
    })
    .await
    .expect("manifest parsed");
    assert_eq!(calls["network"].dir, "modules/network");
    assert_eq!(
        service.root_modules().callers_of_module(&ws.join("modules/network")),
        vec![root.clone()]
    );

    service
        .did_open(&ws.join("main.tf"), LanguageId::Terraform, 1, fixtures::PARENT_MAIN_TF)
        .await
        .unwrap();
    let version = eventually(IDLE_TIMEOUT, || {
        service.root_modules().terraform_version(&root).ok().flatten()
    })
    .await
    .expect("version loaded");
    assert_eq!(version.version, "1.7.0");

    service.shutdown().await;
}

// ============================================================================
// Deletions
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deleted_module_dir_removes_records() {
    let ws = TempWorkspace::new().with_local_module();
    let service = started_service();
    let child = ws.join("modules/network");

    service
        .did_open(&ws.join("main.tf"), LanguageId::Terraform, 1, fixtures::PARENT_MAIN_TF)
        .await
        .unwrap();
    let indexed = eventually(IDLE_TIMEOUT, || service.modules().store().exists(&child).then_some(()))
        .await;
    assert!(indexed.is_some());
    assert!(wait_until_idle(service.jobs(), IDLE_TIMEOUT).await);

    ws.remove("modules");
    service
        .did_change_watched(&ws.join("modules"), ChangeType::Deleted, Some(true))
        .await
        .unwrap();
    let removed = eventually(IDLE_TIMEOUT, || (!service.modules().store().exists(&child)).then_some(()))
        .await;
    assert!(removed.is_some(), "child record still present");
    assert!(service.modules().store().exists(&ws.path()));

    service.shutdown().await;
}

// ============================================================================
// Stacks
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stack_files_indexed_on_open() {
    let ws = TempWorkspace::new();
    let components = ws.write("components.tfstack.hcl", fixtures::STACK_COMPONENTS_TFSTACK);
    ws.write("deployments.tfdeploy.hcl", fixtures::STACK_DEPLOYMENTS_TFDEPLOY);
    let service = started_service();
    let root = ws.path();

    service
        .did_open(&components, LanguageId::TerraformStacks, 1, fixtures::STACK_COMPONENTS_TFSTACK)
        .await
        .unwrap();
    let meta = eventually(IDLE_TIMEOUT, || service.stacks().stack_meta(&root).ok().flatten())
        .await
        .expect("stack metadata loaded");
    assert!(meta.components.contains_key("network"));
    assert!(meta.deployments.contains_key("production"));
    assert!(!service.modules().store().exists(&root));

    service.shutdown().await;
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_opens_index_every_dir() {
    const DIRS: usize = 8;
    let ws = TempWorkspace::new();
    let files: Vec<_> = (0..DIRS)
        .map(|i| ws.write(format!("svc{}/main.tf", i), fixtures::APP_MAIN_TF))
        .collect();
    let service = started_service();

    let opens = files
        .iter()
        .map(|file| service.did_open(file, LanguageId::Terraform, 1, fixtures::APP_MAIN_TF));
    for result in futures::future::join_all(opens).await {
        result.unwrap();
    }

    let indexed = eventually(IDLE_TIMEOUT, || {
        let done = (0..DIRS).all(|i| {
            service
                .modules()
                .module_record(&ws.join(format!("svc{}", i)))
                .map(|r| r.reference_targets.is_loaded())
                .unwrap_or(false)
        });
        done.then_some(())
    })
    .await;
    assert!(indexed.is_some(), "not every directory was indexed");
    assert!(wait_until_idle(service.jobs(), IDLE_TIMEOUT).await);
    assert_eq!(service.jobs().statistics().total_failed, 0);

    service.shutdown().await;
}
