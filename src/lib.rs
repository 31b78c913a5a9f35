//! Resilient tiered persistence for in-progress checkout forms.
//!
//! Field crews fill in a checkout form when they finish a plow or shovel job.
//! The form must survive app restarts, backgrounding, and storage eviction,
//! so every edit is written through three tiers:
//!
//! - a process-local volatile cache ([`VolatileCache`]),
//! - a durable key-value store ([`KvStore`], backed by fjall with the `kv`
//!   feature),
//! - an optional native file store ([`FileStore`]) that also holds photo
//!   previews too large for the KV quota.
//!
//! # Quick Start
//!
//! ```ignore
//! use checkout_store::prelude::*;
//!
//! let kv = Arc::new(FjallKv::open(".checkout-store/kv")?);
//! let files = Arc::new(DirFileStore::new(".checkout-store/native"));
//! let controller = PersistenceController::builder(kv).file_store(files).build();
//!
//! let form = FormSession::mount(controller.clone(), FormKey::plow("42"));
//! form.update_field("snowDepth", "3.5")?;
//!
//! // Later, once the backend reports which work logs are still open:
//! controller.cleanup_stale_forms(&[WorkLogId::new("42")]);
//! ```
//!
//! # Modules
//!
//! - [`persist`] - Tier orchestration and the stale-form sweep
//! - [`session`] - A mounted form with reactive state and save status
//! - [`photo`] - Native storage for photo previews
//! - [`tier`] - Storage tier traits and implementations
//! - [`debug`] - Per-key diagnostics
//!
//! # Feature Flags
//!
//! - `kv` - Enable the fjall-backed durable tier (enabled by default)
//! - `logging` - Enable library-level tracing (consumers provide their own subscriber)
//! - `cli` - Enable the maintenance command-line binary
//! - `full` - Enable all features

mod logging;

pub mod cache;
pub mod config;
pub mod debug;
pub mod key;
pub mod lifecycle;
pub mod persist;
pub mod photo;
pub mod prelude;
pub mod record;
pub mod session;
#[cfg(feature = "cli")]
pub mod subscriber;
pub mod tier;

mod error;

// Re-export the unified error type
pub use error::{Error, Result};

pub use cache::VolatileCache;
pub use config::{Config, ConfigError, LogFormat, LoggingConfig, NativeMode, StoreConfig};
pub use debug::{DebugRegistry, DebugSnapshot, LoadSource, Tier, WriteError};
pub use key::{
    DEFAULT_KEY_PREFIX, FormKey, ParseVariantError, StorageKey, Variant, WorkLogId,
    extract_work_log_id, has_form_prefix, sanitize_path_segment,
};
pub use lifecycle::{LifecycleEvent, LifecycleSignals, LifecycleSubscription};
pub use persist::{ControllerBuilder, LoadedRecord, PersistenceController, SweepReport};
pub use photo::PhotoPreviewStore;
pub use record::{
    FieldKind, FieldSpec, FieldValue, FormRecord, PhotoPreview, PhotoPreviewRef, Photos,
    RecordError, field_spec, schema, validate_field,
};
pub use session::{FormSession, FormState, SaveStatus, Trigger, UpdateOutcome};
#[cfg(feature = "kv")]
pub use tier::FjallKv;
pub use tier::{
    DirFileStore, FileStore, FileStoreError, KvError, KvStore, MemoryFileStore, MemoryKv,
};
