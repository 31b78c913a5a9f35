//! Integration tests for mounted form sessions.

mod common;

use std::sync::Arc;
use std::time::Duration;

use checkout_store::{
    FileStore, FormKey, FormSession, KvStore, LifecycleSignals, LoadSource, MemoryFileStore,
    MemoryKv,
    PersistenceController, PhotoPreview, Photos, SaveStatus, Tier, UpdateOutcome,
};
use common::{GatedFileStore, TestApp, controller_with_files, settle, wait_until};

fn previews(items: &[&str]) -> Vec<PhotoPreview> {
    items.iter().map(|s| PhotoPreview::new(*s)).collect()
}

// =============================================================================
// Field Update Tests
// =============================================================================

#[tokio::test]
async fn test_repeated_update_writes_once() -> anyhow::Result<()> {
    let app = TestApp::web();
    let key = FormKey::plow("formA");
    let form = FormSession::mount(app.controller.clone(), key.clone());

    assert_eq!(form.update_field("snowDepth", "3.5")?, UpdateOutcome::Saved);
    assert_eq!(app.kv_raw(&key).as_deref(), Some(r#"{"snowDepth":"3.5"}"#));
    assert_eq!(app.kv.write_count(), 1);

    assert_eq!(form.update_field("snowDepth", "3.5")?, UpdateOutcome::Unchanged);
    assert_eq!(app.kv.write_count(), 1);
    assert_eq!(form.record().text("snowDepth"), "3.5");

    form.clear_persisted_data().await;
    let loaded = app.controller.load(&key);
    assert!(loaded.record.is_empty());
    assert_eq!(loaded.record.encode()?, "{}");
    Ok(())
}

#[tokio::test]
async fn test_empty_value_on_empty_field_is_noop() -> anyhow::Result<()> {
    let app = TestApp::web();
    let form = FormSession::mount(app.controller.clone(), FormKey::shovel("1"));

    assert_eq!(form.update_field("notes", "")?, UpdateOutcome::Unchanged);
    assert_eq!(app.kv.write_count(), 0);
    assert_eq!(form.save_status(), SaveStatus::Idle);
    Ok(())
}

#[tokio::test]
async fn test_clearing_a_field_removes_it() -> anyhow::Result<()> {
    let app = TestApp::web();
    let key = FormKey::plow("2");
    let form = FormSession::mount(app.controller.clone(), key.clone());

    form.update_field("notes", "icy ramp")?;
    form.update_field("saltUsed", "40")?;
    assert_eq!(form.update_field("notes", "")?, UpdateOutcome::Saved);
    assert_eq!(app.kv_raw(&key).as_deref(), Some(r#"{"saltUsed":"40"}"#));
    Ok(())
}

#[tokio::test]
async fn test_list_fields_round_trip() -> anyhow::Result<()> {
    let app = TestApp::web();
    let key = FormKey::shovel("9");
    let form = FormSession::mount(app.controller.clone(), key.clone());

    let areas = vec!["front walk".to_string(), "side steps".to_string()];
    form.update_field("areasCleared", areas.clone())?;
    form.update_field("serviceType", "shovel_ice_melt")?;
    drop(form);

    let reopened = FormSession::mount(app.controller.clone(), key);
    assert_eq!(reopened.state().source, LoadSource::DurableKv);
    assert_eq!(
        reopened.record().get("areasCleared"),
        Some(&checkout_store::FieldValue::List(areas))
    );
    Ok(())
}

#[tokio::test]
async fn test_invalid_updates_are_rejected() -> anyhow::Result<()> {
    let app = TestApp::web();
    let form = FormSession::mount(app.controller.clone(), FormKey::plow("3"));

    let err = form.update_field("crewSize", "2").unwrap_err();
    assert!(err.is_record());
    let err = form.update_field("snowDepth", "deep").unwrap_err();
    assert!(err.is_record());
    let err = form.update_field("serviceType", "shovel").unwrap_err();
    assert!(err.is_record());

    // Partial decimals are accepted while typing.
    assert_eq!(form.update_field("snowDepth", "3.")?, UpdateOutcome::Saved);
    assert_eq!(app.kv.write_count(), 1);
    Ok(())
}

// =============================================================================
// Save Status Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_saved_flash_returns_to_idle() -> anyhow::Result<()> {
    let app = TestApp::web();
    let form = FormSession::mount(app.controller.clone(), FormKey::plow("4"));

    form.update_field("notes", "a")?;
    assert_eq!(form.save_status(), SaveStatus::Saved);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(form.save_status(), SaveStatus::Saved);

    // A second save restarts the flash.
    form.update_field("notes", "ab")?;
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(form.save_status(), SaveStatus::Saved);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(form.save_status(), SaveStatus::Idle);
    Ok(())
}

#[tokio::test]
async fn test_quota_failure_sets_error_status() -> anyhow::Result<()> {
    let kv = Arc::new(MemoryKv::with_quota(24));
    let controller = PersistenceController::builder(kv.clone()).build();
    let key = FormKey::plow("quota");
    let form = FormSession::mount(controller.clone(), key.clone());
    let mut status = form.subscribe_status();

    let outcome = form.update_field("notes", "far too long for the tiny quota")?;

    assert_eq!(outcome, UpdateOutcome::Failed);
    assert_eq!(*status.borrow_and_update(), SaveStatus::Error);
    // The edit is kept in memory.
    assert_eq!(form.record().text("notes"), "far too long for the tiny quota");
    assert!(controller.cached(&key).is_some());
    let snapshot = controller.debug_snapshot(&key).unwrap();
    assert_eq!(snapshot.last_write_error.unwrap().tier, Tier::DurableKv);
    Ok(())
}

// =============================================================================
// Photo Preview Tests
// =============================================================================

#[tokio::test]
async fn test_native_previews_are_stored_by_ref() -> anyhow::Result<()> {
    let app = TestApp::native();
    let key = FormKey::plow("photos");
    let form = FormSession::mount(app.controller.clone(), key.clone());
    let items = previews(&["data:image/jpeg;base64,AAAA", "data:image/jpeg;base64,BBBB"]);

    assert_eq!(form.update_photo_previews(items.clone()).await, UpdateOutcome::Saved);

    let stored: serde_json::Value = serde_json::from_str(&app.kv_raw(&key).unwrap())?;
    assert_eq!(stored["photoPreviewRefs"].as_array().map(Vec::len), Some(2));
    assert!(stored.get("photoPreviews").is_none());
    assert!(matches!(form.record().photos(), Photos::Refs(refs) if refs.len() == 2));
    assert_eq!(form.state().previews, items);
    Ok(())
}

#[tokio::test]
async fn test_web_previews_are_stored_inline() -> anyhow::Result<()> {
    let app = TestApp::web();
    let key = FormKey::shovel("photos");
    let form = FormSession::mount(app.controller.clone(), key.clone());
    let items = previews(&["data:image/png;base64,CCCC"]);

    form.update_photo_previews(items.clone()).await;

    let stored: serde_json::Value = serde_json::from_str(&app.kv_raw(&key).unwrap())?;
    assert_eq!(stored["photoPreviews"][0].as_str(), Some("data:image/png;base64,CCCC"));
    assert!(stored.get("photoPreviewRefs").is_none());

    assert_eq!(
        form.update_photo_previews(items).await,
        UpdateOutcome::Unchanged
    );
    assert_eq!(app.kv.write_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_native_preview_failure_falls_back_inline() -> anyhow::Result<()> {
    let files = Arc::new(GatedFileStore::open());
    files.fail_writes(true);
    let (kv, controller) = controller_with_files(files.clone());
    let key = FormKey::plow("fallback");
    let form = FormSession::mount(controller.clone(), key.clone());

    form.update_photo_previews(previews(&["data:image/jpeg;base64,DDDD"]))
        .await;
    controller.flush_native().await;

    let raw = kv.get(controller.storage_key(&key).as_str())?.unwrap();
    let stored: serde_json::Value = serde_json::from_str(&raw)?;
    assert!(stored.get("photoPreviews").is_some());
    assert!(stored.get("photoPreviewRefs").is_none());
    let snapshot = controller.debug_snapshot(&key).unwrap();
    assert_eq!(snapshot.last_write_error.unwrap().tier, Tier::NativeFile);
    Ok(())
}

#[tokio::test]
async fn test_previews_resolve_from_refs_on_remount() -> anyhow::Result<()> {
    let app = TestApp::native();
    let key = FormKey::plow("remount");
    let items = previews(&["data:image/jpeg;base64,EEEE", "data:image/jpeg;base64,FFFF"]);
    {
        let form = FormSession::mount(app.controller.clone(), key.clone());
        form.update_photo_previews(items.clone()).await;
        app.controller.flush_native().await;
    }

    let form = FormSession::mount(app.controller.clone(), key);
    let mut rx = form.subscribe();
    let state = wait_until(&mut rx, |s| !s.previews.is_empty()).await;
    assert_eq!(state.previews, items);
    Ok(())
}

#[tokio::test]
async fn test_dangling_preview_refs_can_be_removed() -> anyhow::Result<()> {
    let app = TestApp::native();
    let key = FormKey::plow("lost");
    {
        let form = FormSession::mount(app.controller.clone(), key.clone());
        form.update_photo_previews(previews(&["data:image/jpeg;base64,GGGG"]))
            .await;
        app.controller.flush_native().await;
    }
    app.files()
        .remove_dir(&app.controller.storage_key(&key).native_photo_dir())
        .await?;

    let form = FormSession::mount(app.controller.clone(), key.clone());
    let mut rx = form.subscribe();
    wait_until(&mut rx, |s| s.source == LoadSource::NativeFile).await;
    settle().await;
    assert!(form.state().previews.is_empty());
    assert!(matches!(form.record().photos(), Photos::Refs(refs) if refs.len() == 1));

    assert_eq!(form.update_photo_previews(Vec::new()).await, UpdateOutcome::Saved);
    assert_eq!(form.record().photos(), &Photos::None);
    assert_eq!(app.kv_raw(&key).as_deref(), Some("{}"));

    assert_eq!(
        form.update_photo_previews(Vec::new()).await,
        UpdateOutcome::Unchanged
    );
    Ok(())
}

// =============================================================================
// Rebind Tests
// =============================================================================

#[tokio::test]
async fn test_rebind_replaces_visible_state() -> anyhow::Result<()> {
    let app = TestApp::web();
    let first = FormKey::plow("K1");
    let second = FormKey::plow("K2");
    app.kv.set("checkout_form_plow_K2", r#"{"notes":"y"}"#)?;

    let form = FormSession::mount(app.controller.clone(), first.clone());
    form.update_field("notes", "x")?;
    form.update_field("saltUsed", "10")?;

    form.rebind(second.clone());

    let state = form.state();
    assert_eq!(state.key, second);
    assert_eq!(state.record.text("notes"), "y");
    assert!(state.record.get("saltUsed").is_none());
    assert_eq!(form.save_status(), SaveStatus::Idle);
    // The first key keeps its own record.
    assert_eq!(app.controller.load(&first).record.text("notes"), "x");
    Ok(())
}

#[tokio::test]
async fn test_rebind_discards_pending_reconciliation() -> anyhow::Result<()> {
    let files = Arc::new(GatedFileStore::new());
    files
        .inner
        .write_file("checkout-form/checkout_form_plow_K1.json", r#"{"notes":"k1 native"}"#)
        .await?;
    let (_, controller) = controller_with_files(files.clone());
    let first = FormKey::plow("K1");

    let form = FormSession::mount(controller.clone(), first.clone());
    files.wait_for_reads(1).await;
    form.rebind(FormKey::plow("K2"));
    files.release(2);
    settle().await;

    let state = form.state();
    assert_eq!(state.key, FormKey::plow("K2"));
    assert_eq!(state.record.text("notes"), "");
    assert!(controller.cached(&first).is_none());
    Ok(())
}

// =============================================================================
// Reconciliation Tests
// =============================================================================

#[tokio::test]
async fn test_native_copy_overwrites_sync_load() -> anyhow::Result<()> {
    let files = Arc::new(GatedFileStore::new());
    files
        .inner
        .write_file("checkout-form/checkout_form_plow_R.json", r#"{"notes":"native"}"#)
        .await?;
    let (kv, controller) = controller_with_files(files.clone());
    kv.set("checkout_form_plow_R", r#"{"notes":"stale kv"}"#)?;
    let key = FormKey::plow("R");

    let form = FormSession::mount(controller.clone(), key.clone());
    assert_eq!(form.state().source, LoadSource::DurableKv);
    assert_eq!(form.record().text("notes"), "stale kv");

    files.release(1);
    let mut rx = form.subscribe();
    let state = wait_until(&mut rx, |s| s.source == LoadSource::NativeFile).await;
    assert_eq!(state.record.text("notes"), "native");
    assert_eq!(controller.cached(&key).unwrap().text("notes"), "native");
    assert_eq!(
        controller.debug_snapshot(&key).unwrap().load_source,
        Some(LoadSource::NativeFile)
    );
    Ok(())
}

#[tokio::test]
async fn test_edit_landing_before_native_read_survives() -> anyhow::Result<()> {
    let files = Arc::new(GatedFileStore::new());
    files
        .inner
        .write_file("checkout-form/checkout_form_plow_W.json", r#"{"notes":"old"}"#)
        .await?;
    let (_, controller) = controller_with_files(files.clone());
    let key = FormKey::plow("W");

    let form = FormSession::mount(controller.clone(), key);
    files.wait_for_reads(1).await;
    form.update_field("notes", "typed")?;
    controller.flush_native().await;

    files.release(1);
    let mut rx = form.subscribe();
    let state = wait_until(&mut rx, |s| s.source == LoadSource::NativeFile).await;
    assert_eq!(state.record.text("notes"), "typed");
    Ok(())
}

#[tokio::test]
async fn test_reconciled_mount_edits_native_copy() -> anyhow::Result<()> {
    let files = Arc::new(MemoryFileStore::new());
    let key = FormKey::plow("cli");
    {
        let controller = PersistenceController::builder(Arc::new(MemoryKv::new()))
            .file_store(files.clone())
            .build();
        let form = FormSession::mount(controller.clone(), key.clone());
        form.update_field("notes", "keep me")?;
        form.update_field("snowDepth", "4")?;
        controller.flush_native().await;
    }

    // KV wiped: only the native copy holds the record.
    let controller = PersistenceController::builder(Arc::new(MemoryKv::new()))
        .file_store(files)
        .build();
    let form = FormSession::mount_reconciled(controller.clone(), key.clone()).await;
    assert_eq!(form.state().source, LoadSource::NativeFile);

    assert_eq!(form.update_field("saltUsed", "2")?, UpdateOutcome::Saved);
    controller.flush_native().await;

    let native = controller.load_native(&key).await?.unwrap();
    assert_eq!(native.text("notes"), "keep me");
    assert_eq!(native.text("snowDepth"), "4");
    assert_eq!(native.text("saltUsed"), "2");
    Ok(())
}

#[tokio::test]
async fn test_reconciled_mount_resolves_previews() -> anyhow::Result<()> {
    let app = TestApp::native();
    let key = FormKey::shovel("ready");
    let items = previews(&["data:image/jpeg;base64,HHHH"]);
    {
        let form = FormSession::mount(app.controller.clone(), key.clone());
        form.update_photo_previews(items.clone()).await;
        app.controller.flush_native().await;
    }

    let form = FormSession::mount_reconciled(app.controller.clone(), key).await;
    assert_eq!(form.state().previews, items);
    Ok(())
}

#[tokio::test]
async fn test_detach_cancels_reconciliation() -> anyhow::Result<()> {
    let files = Arc::new(GatedFileStore::new());
    files
        .inner
        .write_file("checkout-form/checkout_form_shovel_D.json", r#"{"notes":"late"}"#)
        .await?;
    let (_, controller) = controller_with_files(files.clone());
    let key = FormKey::shovel("D");

    let form = FormSession::mount(controller.clone(), key.clone());
    files.wait_for_reads(1).await;
    form.detach();
    files.release(1);
    settle().await;

    assert!(controller.cached(&key).is_none());
    Ok(())
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_visibility_and_focus_trigger_reload() -> anyhow::Result<()> {
    let app = TestApp::web();
    let key = FormKey::plow("L");
    let form = FormSession::mount(app.controller.clone(), key);
    let signals = LifecycleSignals::new();
    let subscription = form.attach(&signals);
    assert_eq!(signals.listener_count(), 1);
    let mut rx = form.subscribe();

    // Another tab writes the record.
    app.kv.set("checkout_form_plow_L", r#"{"notes":"other tab"}"#)?;
    assert_eq!(signals.became_visible(), 1);
    let state = wait_until(&mut rx, |s| s.record.text("notes") == "other tab").await;
    assert_eq!(state.source, LoadSource::DurableKv);

    app.kv.set("checkout_form_plow_L", r#"{"notes":"focused"}"#)?;
    signals.gained_focus();
    wait_until(&mut rx, |s| s.record.text("notes") == "focused").await;

    subscription.dispose();
    settle().await;
    assert_eq!(signals.listener_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_listener_ends_when_form_is_dropped() -> anyhow::Result<()> {
    let app = TestApp::web();
    let form = FormSession::mount(app.controller.clone(), FormKey::plow("gone"));
    let signals = LifecycleSignals::new();
    let subscription = form.attach(&signals);

    drop(form);
    signals.became_visible();
    settle().await;

    assert!(!subscription.is_active());
    Ok(())
}

// =============================================================================
// Clear Tests
// =============================================================================

#[tokio::test]
async fn test_clear_resets_form_state() -> anyhow::Result<()> {
    let app = TestApp::native();
    let key = FormKey::shovel("C");
    let form = FormSession::mount(app.controller.clone(), key.clone());
    form.update_field("crewSize", "3")?;
    form.update_photo_previews(previews(&["data:image/jpeg;base64,GGGG"]))
        .await;
    app.controller.flush_native().await;

    form.clear_persisted_data().await;

    let state = form.state();
    assert!(state.record.is_empty());
    assert!(state.previews.is_empty());
    assert_eq!(state.source, LoadSource::Empty);
    assert_eq!(form.save_status(), SaveStatus::Idle);
    assert!(app.kv_raw(&key).is_none());
    assert!(app.files().paths().is_empty());
    assert!(app.controller.debug_snapshot(&key).is_none());
    Ok(())
}
