//! Change notifier: watches the source ConfigMaps and reports every change.
//!
//! The watch task keeps a [`SourceCache`] of the objects it has seen and turns
//! raw watcher events into [`SourceEvent`]s. The watch is restarted every
//! resync period; the relist that follows replays every existing source as an
//! update, which is what drives periodic re-merges even without changes.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use authmerge_mapping::SourceDocument;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MergerConfig;
use crate::error::{ControllerError, ControllerResult};
use crate::store::kube::document_from_config_map;

/// Capacity of the event channel between the watch task and the consumer.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Delay before reopening a watch stream that ended on its own.
const STREAM_RESTART_DELAY: Duration = Duration::from_secs(1);

/// What happened to a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEventKind {
    Added,
    Updated,
    Deleted,
}

impl fmt::Display for SourceEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Updated => write!(f, "updated"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// A change to one source ConfigMap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Added(SourceDocument),
    Updated(SourceDocument),
    /// Carries the last known state of the deleted source.
    Deleted(SourceDocument),
}

impl SourceEvent {
    /// The source the event is about.
    #[must_use]
    pub fn source(&self) -> &SourceDocument {
        match self {
            Self::Added(doc) | Self::Updated(doc) | Self::Deleted(doc) => doc,
        }
    }

    #[must_use]
    pub fn kind(&self) -> SourceEventKind {
        match self {
            Self::Added(_) => SourceEventKind::Added,
            Self::Updated(_) => SourceEventKind::Updated,
            Self::Deleted(_) => SourceEventKind::Deleted,
        }
    }
}

/// Known sources, keyed by name, plus the relist in progress.
#[derive(Debug, Default)]
pub struct SourceCache {
    known: BTreeMap<String, SourceDocument>,
    relist: Option<BTreeMap<String, SourceDocument>>,
    synced: bool,
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the first full listing has completed.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Number of sources currently known.
    #[must_use]
    pub fn len(&self) -> usize {
        self.known.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Apply one watcher event and return the resulting source events.
    ///
    /// Objects seen during a relist are held back until the relist is done,
    /// then reported against what was known before it started.
    pub fn observe(&mut self, event: watcher::Event<ConfigMap>) -> Vec<SourceEvent> {
        match event {
            watcher::Event::Init => {
                self.relist = Some(BTreeMap::new());
                Vec::new()
            }
            watcher::Event::InitApply(config_map) => {
                let doc = document_from_config_map(config_map);
                self.relist
                    .get_or_insert_with(BTreeMap::new)
                    .insert(doc.name.clone(), doc);
                Vec::new()
            }
            watcher::Event::InitDone => {
                let listed = self.relist.take().unwrap_or_default();
                let mut events = Vec::with_capacity(listed.len());

                for (name, doc) in &listed {
                    if self.known.contains_key(name) {
                        events.push(SourceEvent::Updated(doc.clone()));
                    } else {
                        events.push(SourceEvent::Added(doc.clone()));
                    }
                }
                let previous = std::mem::replace(&mut self.known, listed);
                for (name, doc) in previous {
                    if !self.known.contains_key(&name) {
                        events.push(SourceEvent::Deleted(doc));
                    }
                }

                self.synced = true;
                events
            }
            watcher::Event::Apply(config_map) => {
                let doc = document_from_config_map(config_map);
                let event = if self.known.contains_key(&doc.name) {
                    SourceEvent::Updated(doc.clone())
                } else {
                    SourceEvent::Added(doc.clone())
                };
                self.known.insert(doc.name.clone(), doc);
                vec![event]
            }
            watcher::Event::Delete(config_map) => {
                let doc = document_from_config_map(config_map);
                let last_known = self.known.remove(&doc.name).unwrap_or(doc);
                vec![SourceEvent::Deleted(last_known)]
            }
        }
    }
}

/// Running watch over the source ConfigMaps.
pub struct ChangeNotifier {
    events: mpsc::Receiver<SourceEvent>,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl ChangeNotifier {
    /// Start watching the configured namespace and selector.
    ///
    /// Returns once the initial listing has completed, or fails with
    /// [`ControllerError::CacheSyncTimeout`] after `config.cache_sync_timeout`.
    pub async fn start(
        client: Client,
        config: &MergerConfig,
        stop: CancellationToken,
    ) -> ControllerResult<Self> {
        let api: Api<ConfigMap> = Api::namespaced(client, &config.watch_namespace);
        let mut watcher_config = watcher::Config::default();
        if !config.label_selector.is_empty() {
            watcher_config = watcher_config.labels(&config.label_selector);
        }

        info!(
            namespace = %config.watch_namespace,
            label_selector = %config.label_selector,
            resync_period = ?config.resync_period,
            "Starting ConfigMap watch"
        );

        Self::start_with(
            move || watcher(api.clone(), watcher_config.clone()).default_backoff(),
            config,
            stop,
        )
        .await
    }

    /// Start over an arbitrary watch stream factory. `make_stream` is called
    /// again on every resync.
    pub(crate) async fn start_with<F, S>(
        make_stream: F,
        config: &MergerConfig,
        stop: CancellationToken,
    ) -> ControllerResult<Self>
    where
        F: FnMut() -> S + Send + 'static,
        S: Stream<Item = Result<watcher::Event<ConfigMap>, watcher::Error>> + Send + 'static,
    {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (synced_tx, mut synced_rx) = watch::channel(false);
        let task = tokio::spawn(watch_loop(
            make_stream,
            config.resync_period,
            event_tx,
            synced_tx,
            stop.clone(),
        ));

        match tokio::time::timeout(config.cache_sync_timeout, synced_rx.wait_for(|s| *s)).await {
            Ok(Ok(_)) => {}
            Ok(Err(_)) => {
                stop.cancel();
                return Err(ControllerError::NotifierClosed);
            }
            Err(_) => {
                stop.cancel();
                return Err(ControllerError::CacheSyncTimeout {
                    namespace: config.watch_namespace.clone(),
                    timeout: config.cache_sync_timeout,
                });
            }
        }

        info!(namespace = %config.watch_namespace, "ConfigMap cache synced");
        Ok(Self {
            events: event_rx,
            stop,
            task,
        })
    }

    /// Next source event. `None` once the watch task has stopped.
    pub async fn recv(&mut self) -> Option<SourceEvent> {
        self.events.recv().await
    }

    /// The underlying event receiver.
    pub fn events_mut(&mut self) -> &mut mpsc::Receiver<SourceEvent> {
        &mut self.events
    }

    /// Stop the watch task and wait for it to exit.
    pub async fn shutdown(self) {
        let Self { events, stop, task } = self;
        stop.cancel();
        drop(events);
        if let Err(e) = task.await {
            warn!(error = %e, "ConfigMap watch task ended abnormally");
        }
    }
}

async fn watch_loop<F, S>(
    mut make_stream: F,
    resync_period: Duration,
    events: mpsc::Sender<SourceEvent>,
    synced: watch::Sender<bool>,
    stop: CancellationToken,
) where
    F: FnMut() -> S,
    S: Stream<Item = Result<watcher::Event<ConfigMap>, watcher::Error>>,
{
    let mut cache = SourceCache::new();

    loop {
        let stream = make_stream();
        futures::pin_mut!(stream);
        let resync = tokio::time::sleep(resync_period);
        tokio::pin!(resync);

        loop {
            tokio::select! {
                () = stop.cancelled() => {
                    debug!("ConfigMap watch stopped");
                    return;
                }
                () = &mut resync => {
                    debug!("Resync period reached, restarting ConfigMap watch");
                    break;
                }
                item = stream.next() => match item {
                    Some(Ok(event)) => {
                        let changes = cache.observe(event);
                        if cache.is_synced() {
                            synced.send_replace(true);
                        }
                        for change in changes {
                            debug!(
                                event = %change.kind(),
                                source = %change.source().name,
                                "Observed source ConfigMap change"
                            );
                            tokio::select! {
                                () = stop.cancelled() => {
                                    debug!("ConfigMap watch stopped while delivering events");
                                    return;
                                }
                                sent = events.send(change) => {
                                    if sent.is_err() {
                                        debug!("ConfigMap event receiver dropped");
                                        return;
                                    }
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "ConfigMap watch error, retrying with backoff");
                    }
                    None => {
                        warn!("ConfigMap watch stream ended, restarting");
                        tokio::time::sleep(STREAM_RESTART_DELAY).await;
                        break;
                    }
                },
            }
        }
    }
}
