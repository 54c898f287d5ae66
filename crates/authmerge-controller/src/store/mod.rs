//! ConfigMap persistence.
//!
//! Every component that reads or writes ConfigMaps receives a store explicitly.
//! [`kube::KubeConfigMapStore`] talks to the API server;
//! [`memory::InMemoryConfigMapStore`] backs the tests.

pub mod kube;
pub mod memory;

use async_trait::async_trait;
use authmerge_mapping::SourceDocument;

use crate::error::StoreResult;

/// Page size used when listing source ConfigMaps.
pub const LIST_PAGE_SIZE: u32 = 500;

/// An object to create, either under a fixed name or a server-generated one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewObject {
    /// Contents of the object. `name` is ignored when `generate_name` is set.
    pub document: SourceDocument,
    /// Prefix for a server-generated name.
    pub generate_name: Option<String>,
}

impl NewObject {
    /// Create under `document.name`.
    pub fn named(document: SourceDocument) -> Self {
        Self {
            document,
            generate_name: None,
        }
    }

    /// Create under a name generated from `prefix`.
    pub fn generated(prefix: impl Into<String>, document: SourceDocument) -> Self {
        Self {
            document,
            generate_name: Some(prefix.into()),
        }
    }
}

/// Read and write access to namespaced ConfigMaps.
#[async_trait]
pub trait ConfigMapStore: Send + Sync {
    /// Fetch one object. A missing object is `Ok(None)`.
    async fn get(&self, namespace: &str, name: &str) -> StoreResult<Option<SourceDocument>>;

    /// List the objects in `namespace` matching `label_selector`, following
    /// continuation tokens until the listing is complete.
    async fn list(&self, namespace: &str, label_selector: &str)
        -> StoreResult<Vec<SourceDocument>>;

    /// Create an object. Fails with `AlreadyExists` if the name is taken.
    async fn create(&self, object: &NewObject) -> StoreResult<SourceDocument>;

    /// Replace an object wholesale, without a resource version precondition.
    /// Fails with `NotFound` if the object is missing.
    async fn update(&self, document: &SourceDocument) -> StoreResult<SourceDocument>;
}
