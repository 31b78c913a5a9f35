//! A mounted checkout form bound to one storage key.
//!
//! [`FormSession`] holds the reactive state a form renders from and a save
//! indicator, both as `tokio::sync::watch` channels. It reloads on mount, on
//! key change, and on lifecycle events; each reload runs the synchronous
//! KV/cache path and then reconciles with the native file tier in the
//! background.
//!
//! Background work is tagged with an epoch. Rebinding to another key or
//! dropping the session bumps the epoch and aborts outstanding tasks, so a
//! late native read can never write into a form it no longer belongs to.
//! Within one epoch the last completed write wins: a native read that
//! resolves after a keystroke replaces the visible record.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::AbortHandle;

use crate::debug::{LoadSource, Tier};
use crate::error::Result;
use crate::key::FormKey;
use crate::lifecycle::{LifecycleEvent, LifecycleSignals, LifecycleSubscription};
use crate::logging::{debug, trace, warn};
use crate::persist::PersistenceController;
use crate::record::{FieldValue, FormRecord, PhotoPreview, Photos, RecordError, validate_field};

/// Save indicator shown next to the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    Idle,
    Saving,
    /// Shown briefly after a successful durable write, then back to idle.
    Saved,
    /// The durable write failed; the edit is kept in memory.
    Error,
}

/// Why a reload was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Mount,
    KeyChange,
    BecameVisible,
    GainedFocus,
}

impl From<LifecycleEvent> for Trigger {
    fn from(event: LifecycleEvent) -> Self {
        match event {
            LifecycleEvent::BecameVisible => Trigger::BecameVisible,
            LifecycleEvent::GainedFocus => Trigger::GainedFocus,
        }
    }
}

/// What an update did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The value matched the current one; nothing was written.
    Unchanged,
    Saved,
    /// The durable write failed; in-memory state still holds the edit.
    Failed,
}

/// Everything a form renders from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormState {
    pub key: FormKey,
    pub record: FormRecord,
    /// Previews resolved for display, whether stored inline or by ref.
    pub previews: Vec<PhotoPreview>,
    pub source: LoadSource,
}

impl FormState {
    fn new(key: FormKey, record: FormRecord, source: LoadSource) -> Self {
        let previews = record.photos().inline().map(<[_]>::to_vec).unwrap_or_default();
        Self {
            key,
            record,
            previews,
            source,
        }
    }
}

/// One mounted checkout form.
///
/// Dropping the session detaches it: pending reconciliation is cancelled and
/// its results discarded.
pub struct FormSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    controller: PersistenceController,
    state_tx: watch::Sender<FormState>,
    status_tx: watch::Sender<SaveStatus>,
    epoch: AtomicU64,
    status_seq: AtomicU64,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl FormSession {
    /// Mount a form for `key` and start loading its state.
    pub fn mount(controller: PersistenceController, key: FormKey) -> Self {
        let loaded = controller.load(&key);
        let state = FormState::new(key, loaded.record, loaded.source);
        let inner = SessionInner::new(controller, state);
        inner.spawn_reconcile(Trigger::Mount);
        Self { inner }
    }

    /// Mount a form and wait for the native tier before returning.
    ///
    /// For one-shot edits: the first update merges into the native copy
    /// instead of racing its background read. Stored preview refs are
    /// resolved before returning as well.
    pub async fn mount_reconciled(controller: PersistenceController, key: FormKey) -> Self {
        let loaded = controller.load(&key);
        let mut state = match controller.load_native(&key).await {
            Ok(Some(native)) => {
                controller.adopt_native(&key, native.clone());
                FormState::new(key, native, LoadSource::NativeFile)
            }
            Ok(None) => FormState::new(key, loaded.record, loaded.source),
            Err(e) => {
                warn!(key = %key, error = %e, "native read failed, using synchronous load");
                FormState::new(key, loaded.record, loaded.source)
            }
        };
        if let Photos::Refs(refs) = state.record.photos() {
            state.previews = controller.photos().load_previews(refs).await;
        }
        Self {
            inner: SessionInner::new(controller, state),
        }
    }

    pub fn key(&self) -> FormKey {
        self.inner.state_tx.borrow().key.clone()
    }

    /// Current form state.
    pub fn state(&self) -> FormState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn record(&self) -> FormRecord {
        self.inner.state_tx.borrow().record.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FormState> {
        self.inner.state_tx.subscribe()
    }

    pub fn save_status(&self) -> SaveStatus {
        *self.inner.status_tx.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SaveStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn controller(&self) -> &PersistenceController {
        &self.inner.controller
    }

    /// Re-run the full load sequence for the bound key.
    pub fn reload(&self, trigger: Trigger) {
        self.inner.reload(trigger);
    }

    /// Bind the form to another key.
    ///
    /// Visible state is replaced wholesale by the new key's record; nothing
    /// carries over from the previous key.
    pub fn rebind(&self, key: FormKey) {
        if self.inner.state_tx.borrow().key == key {
            return;
        }
        self.inner.cancel_background();
        debug!(key = %key, "form rebound");

        let loaded = self.inner.controller.load(&key);
        self.inner
            .state_tx
            .send_replace(FormState::new(key, loaded.record, loaded.source));
        self.inner.set_status(SaveStatus::Idle);
        self.inner.spawn_reconcile(Trigger::KeyChange);
    }

    /// Set one field and write the record through every tier.
    ///
    /// Identical values, and an empty value over an empty field, are no-ops.
    /// `Err` means the field or value is invalid for this variant; storage
    /// failures show up as [`UpdateOutcome::Failed`] and
    /// [`SaveStatus::Error`].
    pub fn update_field(&self, name: &str, value: impl Into<FieldValue>) -> Result<UpdateOutcome> {
        let value = value.into();
        validate_field(self.inner.state_tx.borrow().key.variant, name, &value)?;
        let mut changed: std::result::Result<Option<(FormKey, FormRecord)>, RecordError> = Ok(None);

        self.inner.state_tx.send_if_modified(|state| {
            let unchanged = match state.record.get(name) {
                Some(current) => *current == value,
                None => value.is_empty(),
            };
            if unchanged {
                return false;
            }
            match state.record.set_field(name, value.clone()) {
                Ok(()) => {
                    changed = Ok(Some((state.key.clone(), state.record.clone())));
                    true
                }
                Err(e) => {
                    changed = Err(e);
                    false
                }
            }
        });

        let Some((key, record)) = changed? else {
            trace!(field = name, "field unchanged, skipping write");
            return Ok(UpdateOutcome::Unchanged);
        };
        Ok(self.inner.write_through(&key, &record))
    }

    /// Replace the form's photo previews.
    ///
    /// With native storage the previews go to files and the record keeps refs;
    /// otherwise they are stored inline. If native storage fails, the previews
    /// are kept inline so they are not lost.
    pub async fn update_photo_previews(&self, previews: Vec<PhotoPreview>) -> UpdateOutcome {
        let (key, epoch) = {
            let state = self.inner.state_tx.borrow();
            // Refs whose files failed to load still count as stored photos.
            let unchanged = match state.record.photos() {
                Photos::None => previews.is_empty(),
                Photos::Inline(items) => *items == previews,
                Photos::Refs(refs) => refs.len() == previews.len() && state.previews == previews,
            };
            if unchanged {
                return UpdateOutcome::Unchanged;
            }
            (state.key.clone(), self.inner.epoch.load(Ordering::SeqCst))
        };
        self.inner.set_status(SaveStatus::Saving);

        let controller = &self.inner.controller;
        let photos = controller.photos();
        let representation = if photos.is_available() {
            let skey = controller.storage_key(&key);
            match photos.save_previews(&skey, &previews).await {
                Ok(refs) => Photos::Refs(refs),
                Err(e) => {
                    warn!(key = %skey, error = %e, "native preview save failed, storing inline");
                    controller
                        .debug_registry()
                        .record_write_error(&skey, Tier::NativeFile, e.to_string());
                    Photos::Inline(previews.clone())
                }
            }
        } else {
            Photos::Inline(previews.clone())
        };

        let apply = |record: &mut FormRecord| match &representation {
            Photos::Refs(refs) => record.set_preview_refs(refs.clone()),
            Photos::Inline(items) => record.set_inline_previews(items.clone()),
            Photos::None => record.set_inline_previews(Vec::new()),
        };

        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            // Rebound while saving: write the old key's record without touching
            // what the form now shows.
            let mut record = controller
                .cached(&key)
                .unwrap_or_else(|| FormRecord::empty(key.variant));
            apply(&mut record);
            return match controller.persist(&key, &record) {
                Ok(()) => UpdateOutcome::Saved,
                Err(_) => UpdateOutcome::Failed,
            };
        }

        let mut record = None;
        self.inner.state_tx.send_modify(|state| {
            apply(&mut state.record);
            state.previews = previews;
            record = Some(state.record.clone());
        });
        match record {
            Some(record) => self.inner.write_through(&key, &record),
            None => UpdateOutcome::Unchanged,
        }
    }

    /// Purge the bound key from every tier and reset the form.
    pub async fn clear_persisted_data(&self) {
        let key = self.key();
        self.inner.cancel_background();
        self.inner.controller.clear_persisted_data(&key).await;
        let variant = key.variant;
        self.inner
            .state_tx
            .send_replace(FormState::new(key, FormRecord::empty(variant), LoadSource::Empty));
        self.inner.set_status(SaveStatus::Idle);
    }

    /// Reload whenever `signals` reports the app visible or focused again.
    pub fn attach(&self, signals: &LifecycleSignals) -> LifecycleSubscription {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime, lifecycle listener not attached");
            return LifecycleSubscription::inactive();
        };

        let mut rx = signals.subscribe();
        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let task = handle.spawn(async move {
            loop {
                let trigger = match rx.recv().await {
                    Ok(event) => Trigger::from(event),
                    Err(broadcast::error::RecvError::Lagged(_)) => Trigger::BecameVisible,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.reload(trigger);
            }
        });
        LifecycleSubscription::new(task)
    }

    /// Unmount the form. Equivalent to dropping it.
    pub fn detach(self) {}
}

impl Drop for FormSession {
    fn drop(&mut self) {
        self.inner.cancel_background();
    }
}

impl SessionInner {
    fn new(controller: PersistenceController, state: FormState) -> Arc<Self> {
        let (state_tx, _) = watch::channel(state);
        let (status_tx, _) = watch::channel(SaveStatus::Idle);
        Arc::new(Self {
            controller,
            state_tx,
            status_tx,
            epoch: AtomicU64::new(0),
            status_seq: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
        })
    }

    fn reload(self: &Arc<Self>, trigger: Trigger) {
        let key = self.state_tx.borrow().key.clone();
        let loaded = self.controller.load(&key);
        trace!(key = %key, trigger = ?trigger, source = %loaded.source, "form reloaded");

        self.state_tx.send_modify(|state| {
            if state.key != key {
                return;
            }
            let keep_previews = state.record.photos() == loaded.record.photos();
            state.record = loaded.record;
            state.source = loaded.source;
            if !keep_previews {
                state.previews = state
                    .record
                    .photos()
                    .inline()
                    .map(<[_]>::to_vec)
                    .unwrap_or_default();
            }
        });
        self.spawn_reconcile(trigger);
    }

    /// Read the native tier in the background and adopt what it returns.
    fn spawn_reconcile(self: &Arc<Self>, trigger: Trigger) {
        if !self.controller.is_native() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(trigger = ?trigger, "no async runtime, native reconciliation skipped");
            return;
        };

        let epoch = self.epoch.load(Ordering::SeqCst);
        let weak = Arc::downgrade(self);
        let task = handle.spawn(async move {
            reconcile(weak, epoch).await;
        });
        self.track(task.abort_handle());
    }

    /// Write `record` through the tiers and drive the save indicator.
    fn write_through(self: &Arc<Self>, key: &FormKey, record: &FormRecord) -> UpdateOutcome {
        self.set_status(SaveStatus::Saving);
        match self.controller.persist(key, record) {
            Ok(()) => {
                self.flash_saved();
                UpdateOutcome::Saved
            }
            Err(_) => {
                self.set_status(SaveStatus::Error);
                UpdateOutcome::Failed
            }
        }
    }

    fn set_status(&self, status: SaveStatus) -> u64 {
        let seq = self.status_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.status_tx.send_replace(status);
        seq
    }

    /// Show `saved`, then fall back to idle unless another status replaced it.
    fn flash_saved(self: &Arc<Self>) {
        let seq = self.set_status(SaveStatus::Saved);
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let flash = self.controller.saved_flash();
        let weak = Arc::downgrade(self);
        let task = handle.spawn(async move {
            tokio::time::sleep(flash).await;
            if let Some(inner) = weak.upgrade()
                && inner.status_seq.load(Ordering::SeqCst) == seq
            {
                inner.status_tx.send_replace(SaveStatus::Idle);
            }
        });
        self.track(task.abort_handle());
    }

    fn track(&self, handle: AbortHandle) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Invalidate and abort all background work of the current epoch.
    fn cancel_background(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.abort();
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }
}

async fn reconcile(weak: Weak<SessionInner>, epoch: u64) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let key = inner.state_tx.borrow().key.clone();
    let controller = inner.controller.clone();
    drop(inner);

    let native = match controller.load_native(&key).await {
        Ok(native) => native,
        Err(e) => {
            warn!(key = %key, error = %e, "native reconciliation read failed");
            None
        }
    };

    let Some(inner) = weak.upgrade() else {
        return;
    };
    if !inner.is_current(epoch) {
        trace!(key = %key, "stale reconciliation discarded");
        return;
    }

    if let Some(record) = native {
        controller.adopt_native(&key, record.clone());
        inner.state_tx.send_modify(|state| {
            let keep_previews = state.record.photos() == record.photos();
            state.record = record;
            state.source = LoadSource::NativeFile;
            if !keep_previews {
                state.previews = state
                    .record
                    .photos()
                    .inline()
                    .map(<[_]>::to_vec)
                    .unwrap_or_default();
            }
        });
        debug!(key = %key, "native record applied");
    }

    let refs = match inner.state_tx.borrow().record.photos() {
        Photos::Refs(refs) => refs.clone(),
        _ => return,
    };
    drop(inner);

    let previews = controller.photos().load_previews(&refs).await;

    let Some(inner) = weak.upgrade() else {
        return;
    };
    if !inner.is_current(epoch) {
        return;
    }
    inner.state_tx.send_if_modified(|state| {
        if state.record.photos().refs() != Some(refs.as_slice()) || state.previews == previews {
            return false;
        }
        state.previews = previews;
        true
    });
}
