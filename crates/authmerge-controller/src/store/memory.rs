//! In-memory [`ConfigMapStore`] for tests and local runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use authmerge_mapping::SourceDocument;
use rand::Rng;
use tokio::sync::RwLock;

use super::{ConfigMapStore, NewObject};
use crate::error::{StoreError, StoreResult};

/// Characters used for generated name suffixes (no vowels, no look-alikes).
const SUFFIX_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";
const SUFFIX_LEN: usize = 5;

type ObjectKey = (String, String);

/// ConfigMap store held in process memory.
///
/// Objects are keyed by namespace and name, so listings come back in name
/// order. Every write bumps a store-wide resource version.
#[derive(Debug, Default)]
pub struct InMemoryConfigMapStore {
    objects: RwLock<BTreeMap<ObjectKey, SourceDocument>>,
    version: AtomicU64,
    creates: AtomicUsize,
    updates: AtomicUsize,
    fail_next_create: AtomicBool,
    fail_next_update: AtomicBool,
}

impl InMemoryConfigMapStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an object directly, bypassing call counters and
    /// injected failures.
    pub async fn insert(&self, document: SourceDocument) -> SourceDocument {
        let stored = self.stamp(document);
        self.objects
            .write()
            .await
            .insert(key(&stored.namespace, &stored.name), stored.clone());
        stored
    }

    /// Remove an object, returning it if it existed.
    pub async fn remove(&self, namespace: &str, name: &str) -> Option<SourceDocument> {
        self.objects.write().await.remove(&key(namespace, name))
    }

    /// Number of objects across all namespaces.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Returns true if the store holds no objects.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// Number of `create` calls that reached the store.
    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Number of `update` calls that reached the store.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Make the next `create` call fail with an API error.
    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }

    /// Make the next `update` call fail with an API error.
    pub fn fail_next_update(&self) {
        self.fail_next_update.store(true, Ordering::SeqCst);
    }

    fn stamp(&self, mut document: SourceDocument) -> SourceDocument {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        document.resource_version = Some(version.to_string());
        document
    }
}

fn key(namespace: &str, name: &str) -> ObjectKey {
    (namespace.to_string(), name.to_string())
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| char::from(SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())]))
        .collect()
}

/// One clause of a label selector.
#[derive(Debug, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::NotExists(k) => !labels.contains_key(k),
        }
    }
}

/// Parse the equality-based subset of the label selector syntax.
fn parse_selector(selector: &str) -> Vec<Requirement> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|clause| !clause.is_empty())
        .map(|clause| {
            if let Some((k, v)) = clause.split_once("!=") {
                Requirement::NotEquals(k.trim().to_string(), v.trim().to_string())
            } else if let Some((k, v)) = clause.split_once("==") {
                Requirement::Equals(k.trim().to_string(), v.trim().to_string())
            } else if let Some((k, v)) = clause.split_once('=') {
                Requirement::Equals(k.trim().to_string(), v.trim().to_string())
            } else if let Some(k) = clause.strip_prefix('!') {
                Requirement::NotExists(k.trim().to_string())
            } else {
                Requirement::Exists(clause.to_string())
            }
        })
        .collect()
}

#[async_trait]
impl ConfigMapStore for InMemoryConfigMapStore {
    async fn get(&self, namespace: &str, name: &str) -> StoreResult<Option<SourceDocument>> {
        Ok(self.objects.read().await.get(&key(namespace, name)).cloned())
    }

    async fn list(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> StoreResult<Vec<SourceDocument>> {
        let requirements = parse_selector(label_selector);
        let objects = self.objects.read().await;
        Ok(objects
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, document)| document)
            .filter(|document| requirements.iter().all(|r| r.matches(&document.labels)))
            .cloned()
            .collect())
    }

    async fn create(&self, object: &NewObject) -> StoreResult<SourceDocument> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let namespace = object.document.namespace.clone();

        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Api(format!(
                "injected create failure in namespace {namespace}"
            )));
        }

        let mut objects = self.objects.write().await;
        let name = match &object.generate_name {
            Some(prefix) => loop {
                let candidate = format!("{prefix}{}", random_suffix());
                if !objects.contains_key(&key(&namespace, &candidate)) {
                    break candidate;
                }
            },
            None => object.document.name.clone(),
        };

        if objects.contains_key(&key(&namespace, &name)) {
            return Err(StoreError::AlreadyExists { namespace, name });
        }

        let mut document = object.document.clone();
        document.name = name.clone();
        let stored = self.stamp(document);
        objects.insert(key(&namespace, &name), stored.clone());
        Ok(stored)
    }

    async fn update(&self, document: &SourceDocument) -> StoreResult<SourceDocument> {
        self.updates.fetch_add(1, Ordering::SeqCst);

        if self.fail_next_update.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Api(format!(
                "injected update failure for {}/{}",
                document.namespace, document.name
            )));
        }

        let mut objects = self.objects.write().await;
        let object_key = key(&document.namespace, &document.name);
        if !objects.contains_key(&object_key) {
            return Err(StoreError::NotFound {
                namespace: document.namespace.clone(),
                name: document.name.clone(),
            });
        }

        let stored = self.stamp(document.clone());
        objects.insert(object_key, stored.clone());
        Ok(stored)
    }
}
