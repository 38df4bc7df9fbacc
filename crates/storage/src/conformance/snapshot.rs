//! Snapshot isolation conformance tests.
//!
//! Verifies that uncommitted writes are invisible outside a snapshot,
//! committed writes are visible, and aborted or dropped writes are discarded.

use std::future::Future;

use super::{insert_committed, make_device, TestResult};
use crate::{SequencerStorage, StorageError};

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SequencerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_insert_invisible",
        uncommitted_insert_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_update_invisible",
        uncommitted_update_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "staged_insert_visible_inside_snapshot",
        staged_insert_visible_inside_snapshot(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "abort_discards_insert",
        abort_discards_insert(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "abort_discards_update",
        abort_discards_update(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "drop_discards_update_and_releases_lock",
        drop_discards_update_and_releases_lock(factory).await,
    ));

    results
}

async fn uncommitted_insert_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .map_err(|e| format!("insert: {e}"))?;

    let outside = s.get_device("LNA6213-001").await;
    let listed = s.list_devices(0).await.map_err(|e| format!("list: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    match outside {
        Err(StorageError::DeviceNotFound { .. }) => {}
        other => return Err(format!("uncommitted insert leaked: {:?}", other)),
    }
    if !listed.is_empty() {
        return Err(format!("uncommitted insert listed: {listed:?}"));
    }
    s.get_device("LNA6213-001")
        .await
        .map(|_| ())
        .map_err(|e| format!("committed insert not visible: {e}"))
}

async fn uncommitted_update_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
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
    device.current_stage = "T1".to_string();
    s.update_device(&mut snap, device)
        .await
        .map_err(|e| format!("update: {e}"))?;

    let outside = s
        .get_device("LNA6213-001")
        .await
        .map_err(|e| format!("get: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    if outside.current_stage != "not_started" {
        return Err(format!(
            "uncommitted update leaked: stage {}",
            outside.current_stage
        ));
    }
    let after = s
        .get_device("LNA6213-001")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if after.current_stage != "T1" {
        return Err(format!("committed update lost: stage {}", after.current_stage));
    }
    Ok(())
}

async fn staged_insert_visible_inside_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .map_err(|e| format!("insert: {e}"))?;
    let result = s.get_device_for_update(&mut snap, "LNA6213-001").await;
    let _ = s.abort_snapshot(snap).await;
    result
        .map(|_| ())
        .map_err(|e| format!("staged insert not readable in its own snapshot: {e}"))
}

async fn abort_discards_insert<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .map_err(|e| format!("insert: {e}"))?;
    s.abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;

    match s.get_device("LNA6213-001").await {
        Err(StorageError::DeviceNotFound { .. }) => {}
        other => return Err(format!("aborted insert visible: {:?}", other)),
    }
    // The serial number must be free again.
    insert_committed(&s, make_device("LNA6213-001")).await
}

async fn abort_discards_update<S, F, Fut>(factory: &F) -> Result<(), String>
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
    device.completed_tests.push("T1".to_string());
    s.update_device(&mut snap, device)
        .await
        .map_err(|e| format!("update: {e}"))?;
    s.abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;

    let after = s
        .get_device("LNA6213-001")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if !after.completed_tests.is_empty() {
        return Err(format!(
            "aborted update visible: {:?}",
            after.completed_tests
        ));
    }
    Ok(())
}

async fn drop_discards_update_and_releases_lock<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SequencerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    insert_committed(&s, make_device("LNA6213-001")).await?;

    {
        let mut snap = s
            .begin_snapshot()
            .await
            .map_err(|e| format!("begin: {e}"))?;
        let mut device = s
            .get_device_for_update(&mut snap, "LNA6213-001")
            .await
            .map_err(|e| format!("get for update: {e}"))?;
        device.current_stage = "T2".to_string();
        s.update_device(&mut snap, device)
            .await
            .map_err(|e| format!("update: {e}"))?;
        // snapshot dropped here without commit
    }

    // A fresh snapshot must be able to take the row lock again.
    let mut snap = s
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let device = s
        .get_device_for_update(&mut snap, "LNA6213-001")
        .await
        .map_err(|e| format!("relock after drop: {e}"))?;
    let _ = s.abort_snapshot(snap).await;
    if device.current_stage != "not_started" {
        return Err(format!(
            "dropped update visible: stage {}",
            device.current_stage
        ));
    }
    Ok(())
}
