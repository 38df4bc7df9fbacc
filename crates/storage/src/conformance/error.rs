use std::future::Future;

use super::{make_device, TestResult};
use crate::{SequencerStorage, StorageError};

pub(super) async fn run_error_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SequencerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "error",
        "get_device_nonexistent",
        get_device_nonexistent(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "get_device_for_update_nonexistent",
        get_device_for_update_nonexistent(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "update_device_nonexistent",
        update_device_nonexistent(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "get_test_sequence_nonexistent",
        get_test_sequence_nonexistent(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "get_manufacturing_order_nonexistent",
        get_manufacturing_order_nonexistent(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "empty_store_lists_are_empty",
        empty_store_lists_are_empty(factory).await,
    ));

    results
}

// ── 1. get_device on empty store returns DeviceNotFound ──────────────────────

async fn get_device_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SequencerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_device("LNA6213-999").await {
        Err(StorageError::DeviceNotFound { serial_number }) if serial_number == "LNA6213-999" => {
            Ok(())
        }
        other => Err(format!("expected DeviceNotFound, got {:?}", other)),
    }
}

// ── 2. get_device_for_update on empty store returns DeviceNotFound ───────────

async fn get_device_for_update_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SequencerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let result = s.get_device_for_update(&mut snap, "LNA6213-999").await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::DeviceNotFound { .. }) => Ok(()),
        other => Err(format!("expected DeviceNotFound, got {:?}", other)),
    }
}

// ── 3. update_device on a row that was never inserted ────────────────────────

async fn update_device_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SequencerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let result = s.update_device(&mut snap, make_device("LNA6213-999")).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::DeviceNotFound { .. }) => Ok(()),
        other => Err(format!("expected DeviceNotFound, got {:?}", other)),
    }
}

// ── 4. Reference lookups on an empty store ───────────────────────────────────

async fn get_test_sequence_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SequencerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_test_sequence("NOPE").await {
        Err(StorageError::DeviceTypeNotFound { device_type }) if device_type == "NOPE" => Ok(()),
        other => Err(format!("expected DeviceTypeNotFound, got {:?}", other)),
    }
}

async fn get_manufacturing_order_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SequencerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_manufacturing_order("MO-404").await {
        Err(StorageError::OrderNotFound { .. }) => Ok(()),
        other => Err(format!("expected OrderNotFound, got {:?}", other)),
    }
}

async fn empty_store_lists_are_empty<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SequencerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let devices = s.list_devices(0).await.map_err(|e| format!("{e}"))?;
    let types = s.list_device_types().await.map_err(|e| format!("{e}"))?;
    let defs = s
        .get_test_definitions(&["T1".to_string()])
        .await
        .map_err(|e| format!("{e}"))?;
    let orders = s
        .list_manufacturing_orders()
        .await
        .map_err(|e| format!("{e}"))?;
    if !devices.is_empty() || !types.is_empty() || !defs.is_empty() || !orders.is_empty() {
        return Err("expected every listing on an empty store to be empty".to_string());
    }
    Ok(())
}
