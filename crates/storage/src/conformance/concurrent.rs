use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::{insert_committed, make_device, TestResult};
use crate::{SequencerStorage, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SequencerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_read_modify_write_all_survive",
        concurrent_read_modify_write_all_survive(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_insert_exactly_one_wins",
        concurrent_insert_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "locked_device_does_not_block_other_devices",
        locked_device_does_not_block_other_devices(factory).await,
    ));

    results
}

// ── Read-modify-write on one device: no lost updates ────────────────────────

/// N tasks each lock the same device, append their own test id to
/// `completed_tests`, and commit. With row locking every append survives;
/// without it, interleaved reads would overwrite each other.
async fn concurrent_read_modify_write_all_survive<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SequencerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    insert_committed(storage.as_ref(), make_device("LNA6213-001")).await?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let mut device = s.get_device_for_update(&mut snap, "LNA6213-001").await?;
            // Give other tasks a chance to interleave between read and write.
            tokio::task::yield_now().await;
            device.completed_tests.push(format!("T{i}"));
            s.update_device(&mut snap, device).await?;
            s.commit_snapshot(snap).await?;
            Ok::<(), StorageError>(())
        }));
    }

    for handle in handles {
        handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
    }

    let device = storage
        .get_device("LNA6213-001")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if device.completed_tests.len() != N {
        return Err(format!(
            "expected {N} completed tests, got {} ({:?})",
            device.completed_tests.len(),
            device.completed_tests
        ));
    }
    Ok(())
}

// ── Concurrent insert: exactly one wins ─────────────────────────────────────

/// N tasks each attempt to insert the same serial number. Exactly one
/// succeeds; the rest must get DeviceAlreadyExists.
async fn concurrent_insert_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SequencerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            match s.insert_device(&mut snap, make_device("LNA6213-001")).await {
                Ok(()) => {
                    s.commit_snapshot(snap).await?;
                    Ok(true) // won
                }
                Err(StorageError::DeviceAlreadyExists { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false) // lost
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let mut winners = 0usize;
    let mut losers = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        } else {
            losers += 1;
        }
    }

    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    if losers != N - 1 {
        return Err(format!("expected {} losers, got {losers}", N - 1));
    }
    Ok(())
}

// ── Different devices are independent ───────────────────────────────────────

/// While one snapshot holds the lock on device A, another snapshot must be
/// able to lock, update and commit device B.
async fn locked_device_does_not_block_other_devices<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: SequencerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    insert_committed(storage.as_ref(), make_device("LNA6213-001")).await?;
    insert_committed(storage.as_ref(), make_device("LNA6213-002")).await?;

    let mut holder = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .get_device_for_update(&mut holder, "LNA6213-001")
        .await
        .map_err(|e| format!("lock A: {e}"))?;

    let s = storage.clone();
    let other = tokio::spawn(async move {
        let mut snap = s.begin_snapshot().await?;
        let mut device = s.get_device_for_update(&mut snap, "LNA6213-002").await?;
        device.current_stage = "T1".to_string();
        s.update_device(&mut snap, device).await?;
        s.commit_snapshot(snap).await
    });

    let outcome = tokio::time::timeout(Duration::from_secs(5), other).await;
    let _ = storage.abort_snapshot(holder).await;

    match outcome {
        Ok(joined) => joined
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}")),
        Err(_) => Err("update of device B blocked behind the lock on device A".to_string()),
    }
}
