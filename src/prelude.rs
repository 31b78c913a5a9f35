//! Convenient re-exports for common usage patterns.
//!
//! ```ignore
//! use checkout_store::prelude::*;
//!
//! let controller = PersistenceController::builder(Arc::new(MemoryKv::new())).build();
//! let form = FormSession::mount(controller, FormKey::shovel("7"));
//! ```

pub use std::sync::Arc;

// Unified error handling
pub use crate::error::{Error, Result};

// Keys and records
pub use crate::key::{FormKey, StorageKey, Variant, WorkLogId};
pub use crate::record::{FieldValue, FormRecord, PhotoPreview, PhotoPreviewRef, Photos};

// Orchestration
pub use crate::debug::{DebugSnapshot, LoadSource};
pub use crate::lifecycle::{LifecycleSignals, LifecycleSubscription};
pub use crate::persist::{PersistenceController, SweepReport};
pub use crate::session::{FormSession, FormState, SaveStatus, Trigger, UpdateOutcome};

// Tiers
#[cfg(feature = "kv")]
pub use crate::tier::FjallKv;
pub use crate::tier::{DirFileStore, FileStore, KvStore, MemoryFileStore, MemoryKv};

pub use crate::config::{Config, StoreConfig};
