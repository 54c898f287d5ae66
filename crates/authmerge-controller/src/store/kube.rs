//! [`ConfigMapStore`] backed by the Kubernetes API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use authmerge_mapping::SourceDocument;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{ListParams, ObjectMeta, PostParams};
use kube::{Api, Client};
use tracing::debug;

use super::{ConfigMapStore, NewObject, LIST_PAGE_SIZE};
use crate::error::{StoreError, StoreResult};

/// ConfigMap store talking to the API server through a [`Client`].
#[derive(Clone)]
pub struct KubeConfigMapStore {
    client: Client,
}

impl KubeConfigMapStore {
    /// Create a store using `client`.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Convert an API object into a [`SourceDocument`].
pub fn document_from_config_map(config_map: ConfigMap) -> SourceDocument {
    let meta = config_map.metadata;
    SourceDocument {
        name: meta.name.unwrap_or_default(),
        namespace: meta.namespace.unwrap_or_default(),
        resource_version: meta.resource_version,
        labels: meta.labels.unwrap_or_default(),
        annotations: meta.annotations.unwrap_or_default(),
        data: config_map.data.unwrap_or_default(),
    }
}

/// Convert a [`SourceDocument`] into an API object. The resource version is
/// never sent, so writes are unconditional.
pub fn config_map_from_document(document: &SourceDocument) -> ConfigMap {
    fn non_empty(map: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
        (!map.is_empty()).then(|| map.clone())
    }

    ConfigMap {
        metadata: ObjectMeta {
            name: (!document.name.is_empty()).then(|| document.name.clone()),
            namespace: Some(document.namespace.clone()),
            labels: non_empty(&document.labels),
            annotations: non_empty(&document.annotations),
            ..ObjectMeta::default()
        },
        data: Some(document.data.clone()),
        ..ConfigMap::default()
    }
}

fn map_kube_error(err: kube::Error, namespace: &str, name: &str) -> StoreError {
    match err {
        kube::Error::Api(response) if response.code == 404 => StoreError::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(response) if response.code == 409 => StoreError::AlreadyExists {
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(response) => StoreError::Api(format!(
            "{} ({}): {}",
            response.reason, response.code, response.message
        )),
        other => StoreError::Kube(other),
    }
}

#[async_trait]
impl ConfigMapStore for KubeConfigMapStore {
    async fn get(&self, namespace: &str, name: &str) -> StoreResult<Option<SourceDocument>> {
        let found = self
            .api(namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error(e, namespace, name))?;
        Ok(found.map(document_from_config_map))
    }

    async fn list(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> StoreResult<Vec<SourceDocument>> {
        let api = self.api(namespace);
        let mut documents = Vec::new();
        let mut continue_token: Option<String> = None;

        loop {
            let mut params = ListParams::default().limit(LIST_PAGE_SIZE);
            if !label_selector.is_empty() {
                params = params.labels(label_selector);
            }
            if let Some(token) = continue_token.as_deref() {
                params = params.continue_token(token);
            }

            let page = api
                .list(&params)
                .await
                .map_err(|e| map_kube_error(e, namespace, ""))?;
            debug!(
                namespace,
                label_selector,
                count = page.items.len(),
                "listed ConfigMap page"
            );
            documents.extend(page.items.into_iter().map(document_from_config_map));

            match page.metadata.continue_.filter(|token| !token.is_empty()) {
                Some(token) => continue_token = Some(token),
                None => break,
            }
        }

        Ok(documents)
    }

    async fn create(&self, object: &NewObject) -> StoreResult<SourceDocument> {
        let namespace = &object.document.namespace;
        let mut config_map = config_map_from_document(&object.document);
        if let Some(prefix) = &object.generate_name {
            config_map.metadata.name = None;
            config_map.metadata.generate_name = Some(prefix.clone());
        }

        let name = object
            .generate_name
            .as_deref()
            .unwrap_or(&object.document.name);
        let created = self
            .api(namespace)
            .create(&PostParams::default(), &config_map)
            .await
            .map_err(|e| map_kube_error(e, namespace, name))?;
        Ok(document_from_config_map(created))
    }

    async fn update(&self, document: &SourceDocument) -> StoreResult<SourceDocument> {
        let config_map = config_map_from_document(document);
        let replaced = self
            .api(&document.namespace)
            .replace(&document.name, &PostParams::default(), &config_map)
            .await
            .map_err(|e| map_kube_error(e, &document.namespace, &document.name))?;
        Ok(document_from_config_map(replaced))
    }
}
