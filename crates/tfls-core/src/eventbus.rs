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

//! Typed publish/subscribe event bus.
//!
//! Each [`Topic`] fans events out to its subscribers through one bounded
//! queue per subscriber ([`EVENT_CHANNEL_CAPACITY`] events). `publish`
//! waits while a subscriber's queue is full, so producers slow down to the
//! pace of the slowest feature. Publishes on one topic are serialized;
//! there is no ordering across topics.
//!
//! # Example
//!
//! ```
//! use tfls_core::eventbus::{DiscoverEvent, EventBus};
//! use tfls_core::RequestContext;
//!
//! let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! rt.block_on(async {
//!     let bus = EventBus::new();
//!     let mut sub = bus.on_discover("feature.modules");
//!     bus.publish_discover(DiscoverEvent {
//!         context: RequestContext::background(),
//!         dir: "/work".into(),
//!         files: vec!["main.tf".into()],
//!     })
//!     .await;
//!     assert_eq!(sub.recv().await.unwrap().files, vec!["main.tf"]);
//! });
//! ```

use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::context::RequestContext;
use crate::documents::DocumentHandle;
use crate::error::BusError;
use crate::language::LanguageId;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// An event that can travel over a [`Topic`].
pub trait BusEvent: Clone + Send + 'static {
    /// Path logged on publish.
    fn target(&self) -> &Path;
}

/// A document was opened in the editor.
#[derive(Debug, Clone)]
pub struct DidOpenEvent {
    pub context: RequestContext,
    pub dir: PathBuf,
    pub language: LanguageId,
    pub document: DocumentHandle,
}

/// An open document was edited.
#[derive(Debug, Clone)]
pub struct DidChangeEvent {
    pub context: RequestContext,
    pub dir: PathBuf,
    pub language: LanguageId,
    pub document: DocumentHandle,
}

/// File watcher change kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    Created,
    Changed,
    Deleted,
}

/// A watched file or directory changed on disk.
#[derive(Debug, Clone)]
pub struct DidChangeWatchedEvent {
    pub context: RequestContext,
    pub path: PathBuf,
    pub change: ChangeType,
    /// Whether the path is a directory, if the client knows.
    pub is_dir: Option<bool>,
}

/// The walker found a directory.
#[derive(Debug, Clone)]
pub struct DiscoverEvent {
    pub context: RequestContext,
    pub dir: PathBuf,
    /// Names of the regular files in `dir`.
    pub files: Vec<String>,
}

/// A document changed outside a `didChange`, e.g. on save.
#[derive(Debug, Clone)]
pub struct DocumentChangedEvent {
    pub context: RequestContext,
    pub dir: PathBuf,
}

impl BusEvent for DidOpenEvent {
    fn target(&self) -> &Path {
        &self.dir
    }
}

impl BusEvent for DidChangeEvent {
    fn target(&self) -> &Path {
        &self.dir
    }
}

impl BusEvent for DidChangeWatchedEvent {
    fn target(&self) -> &Path {
        &self.path
    }
}

impl BusEvent for DiscoverEvent {
    fn target(&self) -> &Path {
        &self.dir
    }
}

impl BusEvent for DocumentChangedEvent {
    fn target(&self) -> &Path {
        &self.dir
    }
}

struct Subscriber<T> {
    id: u64,
    identifier: String,
    sender: mpsc::Sender<T>,
}

/// Receive side of a subscription.
///
/// Dropping it (or passing it to [`Topic::unsubscribe`]) discards any
/// buffered events.
pub struct Subscription<T> {
    id: u64,
    identifier: String,
    receiver: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    /// Next event, or `None` once the topic is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// One typed topic.
pub struct Topic<T> {
    name: &'static str,
    subscribers: Mutex<Vec<Subscriber<T>>>,
    publishing: tokio::sync::Mutex<()>,
    next_id: AtomicU64,
}

impl<T: BusEvent> Topic<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            subscribers: Mutex::new(Vec::new()),
            publishing: tokio::sync::Mutex::new(()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn subscribe(&self, identifier: impl Into<String>) -> Subscription<T> {
        let identifier = identifier.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.subscribers.lock().push(Subscriber {
            id,
            identifier: identifier.clone(),
            sender,
        });
        debug!("bus: \"{}\" subscribed to {}", identifier, self.name);
        Subscription {
            id,
            identifier,
            receiver,
        }
    }

    pub fn unsubscribe(&self, subscription: Subscription<T>) {
        self.subscribers.lock().retain(|s| s.id != subscription.id);
        debug!(
            "bus: \"{}\" unsubscribed from {}",
            subscription.identifier, self.name
        );
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn snapshot(&self) -> Vec<(u64, String, mpsc::Sender<T>)> {
        self.subscribers
            .lock()
            .iter()
            .map(|s| (s.id, s.identifier.clone(), s.sender.clone()))
            .collect()
    }

    fn prune(&self, closed: &[u64]) {
        if closed.is_empty() {
            return;
        }
        self.subscribers.lock().retain(|s| !closed.contains(&s.id));
        debug!("bus: pruned {} closed subscribers from {}", closed.len(), self.name);
    }

    /// Deliver to every current subscriber in registration order, waiting
    /// while a subscriber's queue is full.
    pub async fn publish(&self, event: T) {
        let _serial = self.publishing.lock().await;
        debug!("bus: -> {} {}", self.name, event.target().display());

        let mut closed = Vec::new();
        for (id, _, sender) in self.snapshot() {
            if sender.send(event.clone()).await.is_err() {
                closed.push(id);
            }
        }
        self.prune(&closed);
    }

    /// Like [`publish`](Self::publish), but skip subscribers whose queue
    /// stays full for longer than `timeout`. Every other subscriber still
    /// receives the event.
    pub async fn publish_timeout(&self, event: T, timeout: Duration) -> Result<(), BusError> {
        let _serial = self.publishing.lock().await;
        debug!("bus: -> {} {}", self.name, event.target().display());

        let mut closed = Vec::new();
        let mut timed_out = Vec::new();
        for (id, identifier, sender) in self.snapshot() {
            match tokio::time::timeout(timeout, sender.send(event.clone())).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => closed.push(id),
                Err(_) => timed_out.push(identifier),
            }
        }
        self.prune(&closed);

        if timed_out.is_empty() {
            Ok(())
        } else {
            Err(BusError::Timeout {
                topic: self.name,
                subscribers: timed_out,
            })
        }
    }
}

/// All topics of the indexer.
pub struct EventBus {
    did_open: Topic<DidOpenEvent>,
    did_change: Topic<DidChangeEvent>,
    did_change_watched: Topic<DidChangeWatchedEvent>,
    discover: Topic<DiscoverEvent>,
    document_changed: Topic<DocumentChangedEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            did_open: Topic::new("DidOpen"),
            did_change: Topic::new("DidChange"),
            did_change_watched: Topic::new("DidChangeWatched"),
            discover: Topic::new("Discover"),
            document_changed: Topic::new("DocumentChanged"),
        }
    }

    pub fn did_open(&self) -> &Topic<DidOpenEvent> {
        &self.did_open
    }

    pub fn did_change(&self) -> &Topic<DidChangeEvent> {
        &self.did_change
    }

    pub fn did_change_watched(&self) -> &Topic<DidChangeWatchedEvent> {
        &self.did_change_watched
    }

    pub fn discover(&self) -> &Topic<DiscoverEvent> {
        &self.discover
    }

    pub fn document_changed(&self) -> &Topic<DocumentChangedEvent> {
        &self.document_changed
    }

    pub fn on_did_open(&self, identifier: &str) -> Subscription<DidOpenEvent> {
        self.did_open.subscribe(identifier)
    }

    pub fn on_did_change(&self, identifier: &str) -> Subscription<DidChangeEvent> {
        self.did_change.subscribe(identifier)
    }

    pub fn on_did_change_watched(&self, identifier: &str) -> Subscription<DidChangeWatchedEvent> {
        self.did_change_watched.subscribe(identifier)
    }

    pub fn on_discover(&self, identifier: &str) -> Subscription<DiscoverEvent> {
        self.discover.subscribe(identifier)
    }

    pub fn on_document_changed(&self, identifier: &str) -> Subscription<DocumentChangedEvent> {
        self.document_changed.subscribe(identifier)
    }

    pub async fn publish_did_open(&self, event: DidOpenEvent) {
        self.did_open.publish(event).await
    }

    pub async fn publish_did_change(&self, event: DidChangeEvent) {
        self.did_change.publish(event).await
    }

    pub async fn publish_did_change_watched(&self, event: DidChangeWatchedEvent) {
        self.did_change_watched.publish(event).await
    }

    pub async fn publish_discover(&self, event: DiscoverEvent) {
        self.discover.publish(event).await
    }

    pub async fn publish_document_changed(&self, event: DocumentChangedEvent) {
        self.document_changed.publish(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changed(dir: &str) -> DocumentChangedEvent {
        DocumentChangedEvent {
            context: RequestContext::background(),
            dir: PathBuf::from(dir),
        }
    }

    #[tokio::test]
    async fn test_fan_out_in_order() {
        let bus = EventBus::new();
        let mut a = bus.on_document_changed("a");
        let mut b = bus.on_document_changed("b");

        bus.publish_document_changed(changed("/one")).await;
        bus.publish_document_changed(changed("/two")).await;

        for sub in [&mut a, &mut b] {
            assert_eq!(sub.recv().await.unwrap().dir, PathBuf::from("/one"));
            assert_eq!(sub.recv().await.unwrap().dir, PathBuf::from("/two"));
        }
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = EventBus::new();
        let a = bus.on_document_changed("a");
        let mut b = bus.on_document_changed("b");
        bus.document_changed().unsubscribe(a);
        assert_eq!(bus.document_changed().subscriber_count(), 1);

        bus.publish_document_changed(changed("/one")).await;
        assert!(b.try_recv().is_some());
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let bus = EventBus::new();
        let a = bus.on_discover("a");
        drop(a);
        bus.publish_discover(DiscoverEvent {
            context: RequestContext::background(),
            dir: PathBuf::from("/w"),
            files: vec![],
        })
        .await;
        assert_eq!(bus.discover().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_timeout_reports_full_subscriber() {
        let topic: Topic<DocumentChangedEvent> = Topic::new("DocumentChanged");
        let _stalled = topic.subscribe("stalled");
        let mut live = topic.subscribe("live");

        for i in 0..EVENT_CHANNEL_CAPACITY {
            topic
                .publish_timeout(changed(&format!("/{}", i)), Duration::from_millis(50))
                .await
                .unwrap();
            live.recv().await.unwrap();
        }

        let err = topic
            .publish_timeout(changed("/overflow"), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BusError::Timeout {
                topic: "DocumentChanged",
                subscribers: vec!["stalled".to_string()],
            }
        );
        assert_eq!(live.recv().await.unwrap().dir, PathBuf::from("/overflow"));
    }

    #[tokio::test]
    async fn test_publish_blocks_until_drained() {
        let topic = std::sync::Arc::new(Topic::<DocumentChangedEvent>::new("DocumentChanged"));
        let mut sub = topic.subscribe("slow");
        for i in 0..EVENT_CHANNEL_CAPACITY {
            topic.publish(changed(&format!("/{}", i))).await;
        }

        let publisher = {
            let topic = std::sync::Arc::clone(&topic);
            tokio::spawn(async move { topic.publish(changed("/last")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!publisher.is_finished());

        sub.recv().await.unwrap();
        publisher.await.unwrap();
        let mut rest = 0;
        while sub.try_recv().is_some() {
            rest += 1;
        }
        assert_eq!(rest, EVENT_CHANNEL_CAPACITY);
    }
}
