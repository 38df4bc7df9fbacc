//! Device row conformance tests: insert, read-back, duplicate detection.

use std::future::Future;

use super::{insert_committed, make_device, TestResult};
use crate::{SequencerStorage, StorageError};

pub(super) async fn run_device_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SequencerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "device",
        "insert_then_get_returns_all_fields",
        insert_then_get_returns_all_fields(factory).await,
    ));
    results.push(TestResult::from_result(
        "device",
        "duplicate_insert_returns_already_exists",
        duplicate_insert_returns_already_exists(factory).await,
    ));
    results.push(TestResult::from_result(
        "device",
        "duplicate_insert_within_one_snapshot",
        duplicate_insert_within_one_snapshot(factory).await,
    ));
    results.push(TestResult::from_result(
        "device",
        "update_preserves_completed_order",
        update_preserves_completed_order(factory).await,
    ));
    results.push(TestResult::from_result(
        "device",
        "list_devices_sorted_and_limited",
        list_devices_sorted_and_limited(factory).await,
    ));
    results.push(TestResult::from_result(
        "device",
        "list_devices_for_order_filters",
        list_devices_for_order_filters(factory).await,
    ));

    results
}

async fn insert_then_get_returns_all_fields<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SequencerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut device = make_device("LNA6213-001");
    device.manufacturing_order_number = Some("MO-7".to_string());
    insert_committed(&s, device.clone()).await?;

    let got = s
        .get_device("LNA6213-001")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if got != device {
        return Err(format!("read-back mismatch: {got:?} != {device:?}"));
    }
    Ok(())
}

async fn duplicate_insert_returns_already_exists<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SequencerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    insert_committed(&s, make_device("LNA6213-001")).await?;

    let mut snap = s
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let mut other = make_device("LNA6213-001");
    other.device_type = "LNP4216".to_string();
    let result = s.insert_device(&mut snap, other).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::DeviceAlreadyExists { serial_number }) if serial_number == "LNA6213-001" => {
            Ok(())
        }
        other => Err(format!("expected DeviceAlreadyExists, got {:?}", other)),
    }
}

async fn duplicate_insert_within_one_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
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
    s.insert_device(&mut snap, make_device("LNA6213-001"))
        .await
        .map_err(|e| format!("first insert: {e}"))?;
    let result = s.insert_device(&mut snap, make_device("LNA6213-001")).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::DeviceAlreadyExists { .. }) => Ok(()),
        other => Err(format!("expected DeviceAlreadyExists, got {:?}", other)),
    }
}

async fn update_preserves_completed_order<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SequencerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    insert_committed(&s, make_device("LNA6213-001")).await?;

    let mut snap = s
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let mut device = s
        .get_device_for_update(&mut snap, "LNA6213-001")
        .await
        .map_err(|e| format!("get for update: {e}"))?;
    device.completed_tests = vec!["T2".to_string(), "T1".to_string()];
    device.current_stage = "T3".to_string();
    s.update_device(&mut snap, device)
        .await
        .map_err(|e| format!("update: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let got = s
        .get_device("LNA6213-001")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if got.completed_tests != ["T2", "T1"] {
        return Err(format!("completed order lost: {:?}", got.completed_tests));
    }
    if got.current_stage != "T3" {
        return Err(format!("expected stage T3, got {}", got.current_stage));
    }
    Ok(())
}

async fn list_devices_sorted_and_limited<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SequencerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    for serial in ["LNA6213-003", "LNA6213-001", "LNA6213-002"] {
        insert_committed(&s, make_device(serial)).await?;
    }

    let all = s.list_devices(0).await.map_err(|e| format!("list: {e}"))?;
    let serials: Vec<&str> = all.iter().map(|d| d.serial_number.as_str()).collect();
    if serials != ["LNA6213-001", "LNA6213-002", "LNA6213-003"] {
        return Err(format!("expected sorted serials, got {serials:?}"));
    }

    let two = s.list_devices(2).await.map_err(|e| format!("list: {e}"))?;
    if two.len() != 2 {
        return Err(format!("expected 2 devices with limit 2, got {}", two.len()));
    }
    Ok(())
}

async fn list_devices_for_order_filters<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SequencerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut a = make_device("LNA6213-001");
    a.manufacturing_order_number = Some("MO-1".to_string());
    let mut b = make_device("LNA6213-002");
    b.manufacturing_order_number = Some("MO-2".to_string());
    let c = make_device("LNA6213-003");
    for d in [a, b, c] {
        insert_committed(&s, d).await?;
    }

    let devices = s
        .list_devices_for_order("MO-1")
        .await
        .map_err(|e| format!("list for order: {e}"))?;
    if devices.len() != 1 || devices[0].serial_number != "LNA6213-001" {
        return Err(format!("expected only LNA6213-001, got {devices:?}"));
    }
    Ok(())
}
