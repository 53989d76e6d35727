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

//! Event bus delivery guarantees.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tfls_core::constants::EVENT_CHANNEL_CAPACITY;
use tfls_core::{
    ChangeType, DidChangeWatchedEvent, DidOpenEvent, DocumentHandle, EventBus, LanguageId,
    RequestContext, Subscription,
};

fn watched(path: &str) -> DidChangeWatchedEvent {
    DidChangeWatchedEvent {
        context: RequestContext::background(),
        path: PathBuf::from(path),
        change: ChangeType::Changed,
        is_dir: Some(false),
    }
}

async fn drain(sub: &mut Subscription<DidChangeWatchedEvent>, n: usize) -> Vec<PathBuf> {
    let mut paths = Vec::with_capacity(n);
    for _ in 0..n {
        paths.push(sub.recv().await.unwrap().path);
    }
    paths
}

// ============================================================================
// Fan-out
// ============================================================================

#[tokio::test]
async fn test_every_subscriber_gets_every_event_in_order() {
    const SUBSCRIBERS: usize = 5;
    const EVENTS: usize = 25;

    let bus = Arc::new(EventBus::new());
    let mut subs: Vec<_> = (0..SUBSCRIBERS)
        .map(|i| bus.on_did_change_watched(&format!("feature.{}", i)))
        .collect();

    let consumers: Vec<_> = subs
        .drain(..)
        .map(|mut sub| tokio::spawn(async move { drain(&mut sub, EVENTS).await }))
        .collect();

    for i in 0..EVENTS {
        bus.publish_did_change_watched(watched(&format!("/w/{}.tf", i)))
            .await;
    }

    let expected: Vec<PathBuf> = (0..EVENTS)
        .map(|i| PathBuf::from(format!("/w/{}.tf", i)))
        .collect();
    for consumer in consumers {
        assert_eq!(consumer.await.unwrap(), expected);
    }
}

#[tokio::test]
async fn test_unsubscribed_receives_nothing() {
    let bus = EventBus::new();
    let mut kept = bus.on_did_change_watched("kept");
    let gone = bus.on_did_change_watched("gone");
    bus.publish_did_change_watched(watched("/before")).await;

    bus.did_change_watched().unsubscribe(gone);
    bus.publish_did_change_watched(watched("/after")).await;

    assert_eq!(
        drain(&mut kept, 2).await,
        vec![PathBuf::from("/before"), PathBuf::from("/after")]
    );
    assert_eq!(bus.did_change_watched().subscriber_count(), 1);
}

#[tokio::test]
async fn test_topics_are_independent() {
    let bus = EventBus::new();
    let mut opens = bus.on_did_open("feature.modules");
    let mut watched_sub = bus.on_did_change_watched("feature.modules");

    bus.publish_did_open(DidOpenEvent {
        context: RequestContext::background(),
        dir: PathBuf::from("/w"),
        language: LanguageId::Terraform,
        document: DocumentHandle::new("/w", "main.tf"),
    })
    .await;

    assert!(watched_sub.try_recv().is_none());
    let event = opens.recv().await.unwrap();
    assert_eq!(event.document.filename(), "main.tf");
    assert_eq!(event.language, LanguageId::Terraform);
}

// ============================================================================
// Backpressure
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_subscriber_throttles_publisher() {
    let bus = Arc::new(EventBus::new());
    let mut slow = bus.on_did_change_watched("slow");
    let total = EVENT_CHANNEL_CAPACITY * 3;

    let publisher = {
        let bus = Arc::clone(&bus);
        tokio::spawn(async move {
            for i in 0..total {
                bus.publish_did_change_watched(watched(&format!("/{}", i)))
                    .await;
            }
        })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!publisher.is_finished());

    let received = drain(&mut slow, total).await;
    publisher.await.unwrap();
    assert_eq!(received.len(), total);
    assert_eq!(received[0], PathBuf::from("/0"));
    assert_eq!(received[total - 1], PathBuf::from(format!("/{}", total - 1)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_publishers_keep_per_publisher_order() {
    const PUBLISHERS: usize = 4;
    const EACH: usize = 20;

    let bus = Arc::new(EventBus::new());
    let mut sub = bus.on_did_change_watched("observer");

    let publishers: Vec<_> = (0..PUBLISHERS)
        .map(|p| {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move {
                for i in 0..EACH {
                    bus.publish_did_change_watched(watched(&format!("/{}/{}", p, i)))
                        .await;
                }
            })
        })
        .collect();

    let received = drain(&mut sub, PUBLISHERS * EACH).await;
    for publisher in publishers {
        publisher.await.unwrap();
    }

    for p in 0..PUBLISHERS {
        let prefix = format!("/{}/", p);
        let seq: Vec<usize> = received
            .iter()
            .filter_map(|path| path.to_str()?.strip_prefix(&prefix)?.parse().ok())
            .collect();
        assert_eq!(seq, (0..EACH).collect::<Vec<_>>());
    }
}
