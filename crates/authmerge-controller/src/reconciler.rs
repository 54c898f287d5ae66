//! Reconciliation loop: list sources, merge them, upsert the authoritative
//! aws-auth ConfigMap.

use std::fmt;
use std::sync::Arc;

use authmerge_mapping::{
    is_managed, merge_all, MergedResult, SourceDocument, AUTHORITATIVE_NAME,
    AUTHORITATIVE_NAMESPACE, AUTO_CREATED_ANNOTATION_KEY, PRE_EXISTING_NAME_PREFIX,
    TIMESTAMP_FORMAT,
};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::MergerConfig;
use crate::debouncer::Debouncer;
use crate::error::{ControllerError, ControllerResult, StoreResult};
use crate::notifier::SourceEvent;
use crate::store::{ConfigMapStore, NewObject};

/// How the authoritative object was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The object did not exist and was created.
    Created,
    /// The object existed and was replaced wholesale.
    Replaced,
}

impl fmt::Display for UpsertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Replaced => write!(f, "replaced"),
        }
    }
}

/// Summary of one successful merge cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub source_count: usize,
    pub outcome: UpsertOutcome,
}

/// Drives merge cycles against a [`ConfigMapStore`].
pub struct Reconciler<S: ConfigMapStore> {
    store: Arc<S>,
    config: MergerConfig,
}

impl<S: ConfigMapStore> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: ConfigMapStore + 'static> Reconciler<S> {
    /// Create a reconciler.
    pub fn new(store: Arc<S>, config: MergerConfig) -> Self {
        Self { store, config }
    }

    /// The authoritative `kube-system/aws-auth` object, if it exists.
    pub async fn authoritative_object(&self) -> StoreResult<Option<SourceDocument>> {
        self.store
            .get(AUTHORITATIVE_NAMESPACE, AUTHORITATIVE_NAME)
            .await
    }

    /// Copy an aws-auth that the merger does not manage into the watched
    /// namespace, so its mappings survive the first merge.
    ///
    /// Returns the created copy, or `None` when there was nothing to migrate.
    /// Runs once at startup; a managed aws-auth is never copied.
    pub async fn migrate_pre_existing(&self) -> ControllerResult<Option<SourceDocument>> {
        let Some(existing) = self.authoritative_object().await? else {
            return Ok(None);
        };
        if is_managed(&existing.labels) {
            return Ok(None);
        }

        let mut copy = SourceDocument::new("", &self.config.watch_namespace)
            .with_labels(self.config.autocreate_labels.clone())
            .with_data(existing.data);
        copy.annotations
            .insert(AUTO_CREATED_ANNOTATION_KEY.to_string(), "true".to_string());

        let created = self
            .store
            .create(&NewObject::generated(PRE_EXISTING_NAME_PREFIX, copy))
            .await?;
        Ok(Some(created))
    }

    /// The source documents to merge, in merge order.
    pub async fn list_sources(&self) -> StoreResult<Vec<SourceDocument>> {
        let mut sources = self
            .store
            .list(&self.config.watch_namespace, &self.config.label_selector)
            .await?;
        if self.config.sort_sources {
            sources.sort_by(|a, b| a.name.cmp(&b.name));
        }
        Ok(sources)
    }

    /// Write `merged` as the authoritative object: create it when missing,
    /// replace it wholesale otherwise.
    ///
    /// Not atomic. A concurrent writer between the lookup and the write makes
    /// this call fail; nothing is retried here.
    pub async fn upsert(&self, merged: &MergedResult) -> StoreResult<UpsertOutcome> {
        let document = merged.to_document();
        match self.authoritative_object().await? {
            None => {
                self.store.create(&NewObject::named(document)).await?;
                Ok(UpsertOutcome::Created)
            }
            Some(_) => {
                self.store.update(&document).await?;
                Ok(UpsertOutcome::Replaced)
            }
        }
    }

    /// Run one merge cycle: list, merge, upsert.
    ///
    /// A parse error or conflict aborts the cycle before anything is written.
    pub async fn sync(&self) -> ControllerResult<SyncReport> {
        let namespace = &self.config.watch_namespace;
        let label_selector = &self.config.label_selector;

        let sources = self.list_sources().await.map_err(|e| {
            error!(
                %namespace, %label_selector, error = %e,
                "Error while looking up aws-auth ConfigMaps"
            );
            e
        })?;
        let source_count = sources.len();
        info!(%namespace, %label_selector, count = source_count, "Found source ConfigMaps");

        let merged = merge_all(&sources).map_err(|e| {
            error!(
                %namespace,
                %label_selector,
                count = source_count,
                source = e.source_name().unwrap_or_default(),
                kind = ?e.kind(),
                error = %e,
                "Error while merging aws-auth ConfigMaps"
            );
            e
        })?;
        info!(%namespace, %label_selector, count = source_count, "Merged source ConfigMaps");

        let outcome = self.upsert(&merged).await.map_err(|e| {
            error!(error = %e, "Error while upserting merged aws-auth ConfigMap in kube-system");
            e
        })?;
        info!(%namespace, %outcome, "Upserted aws-auth ConfigMap in kube-system");

        Ok(SyncReport {
            source_count,
            outcome,
        })
    }

    /// Startup sequence: log the settings, migrate an unmanaged aws-auth,
    /// then merge once unconditionally. Any error is fatal.
    pub async fn bootstrap(&self) -> ControllerResult<SyncReport> {
        self.log_settings();

        match self.migrate_pre_existing().await {
            Ok(None) => info!("No manually configured aws-auth ConfigMap was detected"),
            Ok(Some(copy)) => info!(
                name = %copy.name,
                namespace = %copy.namespace,
                "Migrated existing aws-auth configuration"
            ),
            Err(e) => {
                error!(
                    error = %e,
                    "Error while checking for and migrating a manually configured aws-auth ConfigMap"
                );
                return Err(e);
            }
        }

        self.sync().await
    }

    /// Event loop: debounce source events and refresh ticks into merge cycles.
    ///
    /// Returns `Ok(())` after `shutdown` is cancelled and any cycle already
    /// running has finished. Returns the error of the first failed cycle, or
    /// [`ControllerError::NotifierClosed`] when `events` closes.
    pub async fn run_event_loop(
        &self,
        events: &mut mpsc::Receiver<SourceEvent>,
        shutdown: CancellationToken,
    ) -> ControllerResult<()> {
        let namespace = &self.config.watch_namespace;
        let label_selector = &self.config.label_selector;

        let reconciler = self.clone();
        let (debounced_sync, mut results) =
            Debouncer::spawn(self.config.debounce_interval, move || {
                let reconciler = reconciler.clone();
                async move {
                    let report = reconciler.sync().await?;
                    debug!(?report, "Merge cycle finished");
                    Ok::<(), ControllerError>(())
                }
            });

        let refresh = self.config.refresh_interval;
        let mut refresh_ticker = interval_at(Instant::now() + refresh, refresh);
        refresh_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping event loop");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => {
                        info!(
                            %namespace,
                            %label_selector,
                            event = %event.kind(),
                            source = %event.source().name,
                            "Detected change in aws-auth ConfigMaps"
                        );
                        debounced_sync.trigger();
                    }
                    None => {
                        error!("ConfigMap change notifier closed");
                        return Err(ControllerError::NotifierClosed);
                    }
                },
                _ = refresh_ticker.tick() => {
                    let tick = tick_label(Utc::now());
                    info!(%tick, "Refresh interval reached: performing forced sync");
                    debounced_sync.trigger();
                }
                Some(result) = results.recv() => {
                    if let Err(e) = result {
                        error!(error = %e, "Merge cycle failed");
                        return Err(e);
                    }
                }
            }
        }

        // Let a cycle that is already running finish; a pending one is dropped.
        drop(debounced_sync);
        while let Some(result) = results.recv().await {
            if let Err(e) = result {
                error!(error = %e, "Merge cycle failed during shutdown");
                return Err(e);
            }
        }
        Ok(())
    }

    fn log_settings(&self) {
        let autocreate_labels: Vec<String> = self
            .config
            .autocreate_labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        info!(
            namespace = %self.config.watch_namespace,
            label_selector = %self.config.label_selector,
            refresh_interval = ?self.config.refresh_interval,
            autocreate_labels = ?autocreate_labels,
            sort_sources = self.config.sort_sources,
            "Configured settings"
        );
    }
}

/// Tick time as logged on a forced refresh.
fn tick_label(now: DateTime<Utc>) -> String {
    now.format(TIMESTAMP_FORMAT).to_string()
}
