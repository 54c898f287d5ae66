//! # authmerge-controller
//!
//! Keeps the authoritative `kube-system/aws-auth` ConfigMap in sync with a set
//! of source ConfigMaps.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   SourceEvent   ┌─────────────┐  debounced  ┌──────────────┐
//! │ ChangeNotifier │───────────────►│  Reconciler │────────────►│  Debouncer   │
//! │ (kube watcher) │                 │ event loop  │◄────────────│ (one worker) │
//! └────────────────┘                 └──────┬──────┘   results   └──────┬───────┘
//!                                           │ refresh ticker            │ sync()
//!                                           ▼                           ▼
//!                                   ┌──────────────────────────────────────────┐
//!                                   │ ConfigMapStore: list → merge_all → upsert │
//!                                   └──────────────────────────────────────────┘
//! ```
//!
//! Startup runs [`Reconciler::bootstrap`] (migrate an unmanaged aws-auth, then
//! one unconditional sync) before entering [`Reconciler::run_event_loop`].
//! Any failed cycle in the event loop ends the loop with that error; the
//! process is expected to exit and be restarted by its supervisor.

pub mod config;
pub mod debouncer;
pub mod error;
pub mod notifier;
pub mod reconciler;
pub mod store;

pub use config::{parse_label_pairs, MergerConfig};
pub use debouncer::{DebounceHandle, Debouncer, RESULT_CHANNEL_CAPACITY};
pub use error::{ConfigError, ControllerError, ControllerResult, StoreError, StoreResult};
pub use notifier::{ChangeNotifier, SourceCache, SourceEvent, SourceEventKind};
pub use reconciler::{Reconciler, SyncReport, UpsertOutcome};
pub use store::kube::KubeConfigMapStore;
pub use store::memory::InMemoryConfigMapStore;
pub use store::ConfigMapStore;
