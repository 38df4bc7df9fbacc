//! In-memory `SequencerStorage` backend.
//!
//! Tables live behind a `std::sync::Mutex`; row locks are per-serial
//! `tokio::sync::Mutex` guards owned by the snapshot that took them, so a
//! second snapshot touching the same device waits until the first commits,
//! aborts, or is dropped. Writes are staged in the snapshot and applied to
//! the tables on commit.
//!
//! A lock-table entry lives only while some snapshot holds or waits on it;
//! releasing a snapshot prunes the entries nobody else references.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

use crate::error::StorageError;
use crate::record::{
    DeviceRecord, ManufacturingOrderRecord, TestDefinitionRecord, TestSequenceRecord,
};
use crate::traits::SequencerStorage;

/// Seed contents for a [`MemoryStorage`], usually read from a JSON file.
///
/// Test sequences are kept as raw JSON, in the same shape the
/// `device_test_sequences.test_sequence` column stores them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabData {
    #[serde(default)]
    pub device_test_sequences: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub test_definitions: Vec<TestDefinitionRecord>,
    #[serde(default)]
    pub manufacturing_orders: Vec<ManufacturingOrderRecord>,
    #[serde(default)]
    pub devices: Vec<DeviceRecord>,
}

#[derive(Debug, Default)]
struct Tables {
    devices: BTreeMap<String, DeviceRecord>,
    sequences: BTreeMap<String, serde_json::Value>,
    definitions: BTreeMap<String, TestDefinitionRecord>,
    orders: Vec<ManufacturingOrderRecord>,
}

type LockTable = Arc<Mutex<HashMap<String, Arc<RowLock<()>>>>>;

/// An open transaction against a [`MemoryStorage`].
pub struct MemorySnapshot {
    staged: BTreeMap<String, DeviceRecord>,
    locks: HashMap<String, OwnedMutexGuard<()>>,
    /// Every serial this snapshot asked to lock, including waits that were
    /// cancelled before the guard arrived.
    touched: BTreeSet<String>,
    lock_table: LockTable,
}

impl Drop for MemorySnapshot {
    fn drop(&mut self) {
        if self.touched.is_empty() {
            return;
        }
        self.locks.clear();

        let mut table = self.lock_table.lock().unwrap_or_else(PoisonError::into_inner);
        for serial in std::mem::take(&mut self.touched) {
            // Only the table's own reference left: no holder, no waiter.
            if table.get(&serial).is_some_and(|l| Arc::strong_count(l) == 1) {
                table.remove(&serial);
            }
        }
    }
}

/// Process-local storage backend used by `labseq serve` and the test suites.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
    row_locks: LockTable,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with reference data and devices.
    pub fn from_lab_data(data: LabData) -> Self {
        let storage = Self::new();
        {
            let mut tables = storage.tables();
            tables.sequences = data.device_test_sequences;
            tables.definitions = data
                .test_definitions
                .into_iter()
                .map(|d| (d.test_id.clone(), d))
                .collect();
            tables.orders = data.manufacturing_orders;
            tables.devices = data
                .devices
                .into_iter()
                .map(|d| (d.serial_number.clone(), d))
                .collect();
        }
        storage
    }

    /// Insert or replace the raw test sequence of a device type.
    pub fn put_test_sequence(&self, device_type: &str, test_sequence: serde_json::Value) {
        self.tables()
            .sequences
            .insert(device_type.to_string(), test_sequence);
    }

    /// Insert or replace a test definition.
    pub fn put_test_definition(&self, definition: TestDefinitionRecord) {
        self.tables()
            .definitions
            .insert(definition.test_id.clone(), definition);
    }

    /// Insert or replace a manufacturing order (matched on trimmed number).
    pub fn put_manufacturing_order(&self, order: ManufacturingOrderRecord) {
        let mut tables = self.tables();
        let number = order.manufacturing_order_number.trim().to_string();
        tables
            .orders
            .retain(|o| o.manufacturing_order_number.trim() != number);
        tables.orders.push(order);
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_lock(&self, serial_number: &str) -> Arc<RowLock<()>> {
        self.row_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(serial_number.to_string())
            .or_default()
            .clone()
    }

    /// Take the row lock for `serial_number` unless this snapshot already holds it.
    async fn lock_row(&self, snapshot: &mut MemorySnapshot, serial_number: &str) {
        if snapshot.locks.contains_key(serial_number) {
            return;
        }
        snapshot.touched.insert(serial_number.to_string());
        let guard = self.row_lock(serial_number).lock_owned().await;
        snapshot.locks.insert(serial_number.to_string(), guard);
    }

    fn committed_device(&self, serial_number: &str) -> Option<DeviceRecord> {
        self.tables().devices.get(serial_number).cloned()
    }
}

fn device_not_found(serial_number: &str) -> StorageError {
    StorageError::DeviceNotFound {
        serial_number: serial_number.to_string(),
    }
}

#[async_trait]
impl SequencerStorage for MemoryStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        Ok(MemorySnapshot {
            staged: BTreeMap::new(),
            locks: HashMap::new(),
            touched: BTreeSet::new(),
            lock_table: self.row_locks.clone(),
        })
    }

    async fn commit_snapshot(&self, mut snapshot: MemorySnapshot) -> Result<(), StorageError> {
        let staged = std::mem::take(&mut snapshot.staged);
        {
            let mut tables = self.tables();
            for (serial, record) in staged {
                tables.devices.insert(serial, record);
            }
        }
        // Row locks are released only after the writes are visible.
        drop(snapshot);
        Ok(())
    }

    async fn abort_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        drop(snapshot);
        Ok(())
    }

    async fn insert_device(
        &self,
        snapshot: &mut MemorySnapshot,
        record: DeviceRecord,
    ) -> Result<(), StorageError> {
        let serial = record.serial_number.clone();
        self.lock_row(snapshot, &serial).await;
        if snapshot.staged.contains_key(&serial) || self.committed_device(&serial).is_some() {
            return Err(StorageError::DeviceAlreadyExists {
                serial_number: serial,
            });
        }
        snapshot.staged.insert(serial, record);
        Ok(())
    }

    async fn get_device_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        serial_number: &str,
    ) -> Result<DeviceRecord, StorageError> {
        self.lock_row(snapshot, serial_number).await;
        if let Some(staged) = snapshot.staged.get(serial_number) {
            return Ok(staged.clone());
        }
        self.committed_device(serial_number)
            .ok_or_else(|| device_not_found(serial_number))
    }

    async fn update_device(
        &self,
        snapshot: &mut MemorySnapshot,
        record: DeviceRecord,
    ) -> Result<(), StorageError> {
        let serial = record.serial_number.clone();
        self.lock_row(snapshot, &serial).await;
        if !snapshot.staged.contains_key(&serial) && self.committed_device(&serial).is_none() {
            return Err(device_not_found(&serial));
        }
        snapshot.staged.insert(serial, record);
        Ok(())
    }

    async fn get_device(&self, serial_number: &str) -> Result<DeviceRecord, StorageError> {
        self.committed_device(serial_number)
            .ok_or_else(|| device_not_found(serial_number))
    }

    async fn list_devices(&self, limit: usize) -> Result<Vec<DeviceRecord>, StorageError> {
        let tables = self.tables();
        let devices = tables.devices.values().cloned();
        Ok(if limit == 0 {
            devices.collect()
        } else {
            devices.take(limit).collect()
        })
    }

    async fn list_devices_for_order(
        &self,
        manufacturing_order_number: &str,
    ) -> Result<Vec<DeviceRecord>, StorageError> {
        let number = manufacturing_order_number.trim();
        Ok(self
            .tables()
            .devices
            .values()
            .filter(|d| {
                d.manufacturing_order_number
                    .as_deref()
                    .is_some_and(|mo| mo.trim() == number)
            })
            .cloned()
            .collect())
    }

    async fn get_test_sequence(
        &self,
        device_type: &str,
    ) -> Result<TestSequenceRecord, StorageError> {
        self.tables()
            .sequences
            .get(device_type)
            .map(|seq| TestSequenceRecord {
                device_type: device_type.to_string(),
                test_sequence: seq.clone(),
            })
            .ok_or_else(|| StorageError::DeviceTypeNotFound {
                device_type: device_type.to_string(),
            })
    }

    async fn list_device_types(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.tables().sequences.keys().cloned().collect())
    }

    async fn get_test_definitions(
        &self,
        test_ids: &[String],
    ) -> Result<Vec<TestDefinitionRecord>, StorageError> {
        let tables = self.tables();
        Ok(test_ids
            .iter()
            .filter_map(|id| tables.definitions.get(id).cloned())
            .collect())
    }

    async fn list_test_definitions(&self) -> Result<Vec<TestDefinitionRecord>, StorageError> {
        Ok(self.tables().definitions.values().cloned().collect())
    }

    async fn get_manufacturing_order(
        &self,
        manufacturing_order_number: &str,
    ) -> Result<ManufacturingOrderRecord, StorageError> {
        let number = manufacturing_order_number.trim();
        self.tables()
            .orders
            .iter()
            .find(|o| o.manufacturing_order_number.trim() == number)
            .cloned()
            .ok_or_else(|| StorageError::OrderNotFound {
                manufacturing_order_number: number.to_string(),
            })
    }

    async fn list_manufacturing_orders(
        &self,
    ) -> Result<Vec<ManufacturingOrderRecord>, StorageError> {
        let mut orders = self.tables().orders.clone();
        // Orders without a due date sort last, like NULLs under ORDER BY ... ASC.
        orders.sort_by(|a, b| {
            (a.due_date.is_none(), &a.due_date, &a.manufacturing_order_number).cmp(&(
                b.due_date.is_none(),
                &b.due_date,
                &b.manufacturing_order_number,
            ))
        });
        Ok(orders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(serial: &str) -> DeviceRecord {
        DeviceRecord {
            serial_number: serial.to_string(),
            device_type: "LNA6213".to_string(),
            current_stage: "not_started".to_string(),
            completed_tests: Vec::new(),
            required_tests: vec!["T1".to_string()],
            manufacturing_order_number: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn dropped_snapshot_releases_row_lock() {
        let storage = MemoryStorage::new();
        {
            let mut snap = storage.begin_snapshot().await.unwrap();
            storage.insert_device(&mut snap, device("A-1")).await.unwrap();
            // dropped without commit
        }
        let mut snap = storage.begin_snapshot().await.unwrap();
        storage.insert_device(&mut snap, device("A-1")).await.unwrap();
        storage.commit_snapshot(snap).await.unwrap();
        assert!(storage.get_device("A-1").await.is_ok());
    }

    fn lock_table_len(storage: &MemoryStorage) -> usize {
        storage.row_locks.lock().unwrap().len()
    }

    #[tokio::test]
    async fn failed_lookups_leave_no_lock_entries() {
        let storage = MemoryStorage::new();
        for i in 0..1000 {
            let mut snap = storage.begin_snapshot().await.unwrap();
            let serial = format!("NOPE-{i}");
            assert!(storage.get_device_for_update(&mut snap, &serial).await.is_err());
            storage.abort_snapshot(snap).await.unwrap();
        }
        assert_eq!(lock_table_len(&storage), 0);
    }

    #[tokio::test]
    async fn released_snapshots_prune_lock_entries() {
        let storage = MemoryStorage::new();

        let mut snap = storage.begin_snapshot().await.unwrap();
        storage.insert_device(&mut snap, device("A-1")).await.unwrap();
        assert_eq!(lock_table_len(&storage), 1);
        storage.commit_snapshot(snap).await.unwrap();
        assert_eq!(lock_table_len(&storage), 0);

        {
            let mut snap = storage.begin_snapshot().await.unwrap();
            storage.get_device_for_update(&mut snap, "A-1").await.unwrap();
            assert_eq!(lock_table_len(&storage), 1);
        }
        assert_eq!(lock_table_len(&storage), 0);
    }

    #[tokio::test]
    async fn lock_entry_survives_while_a_waiter_holds_it() {
        let storage = Arc::new(MemoryStorage::new());
        let mut first = storage.begin_snapshot().await.unwrap();
        storage.insert_device(&mut first, device("A-1")).await.unwrap();

        let waiter = {
            let storage = storage.clone();
            tokio::spawn(async move {
                let mut snap = storage.begin_snapshot().await.unwrap();
                let found = storage.get_device_for_update(&mut snap, "A-1").await;
                storage.abort_snapshot(snap).await.unwrap();
                found
            })
        };
        // Let the waiter queue up on the row lock.
        while Arc::strong_count(&storage.row_lock("A-1")) < 4 {
            tokio::task::yield_now().await;
        }

        storage.commit_snapshot(first).await.unwrap();
        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(lock_table_len(&storage), 0);
    }

    #[tokio::test]
    async fn lab_data_seeds_all_tables() {
        let data: LabData = serde_json::from_value(serde_json::json!({
            "device_test_sequences": {
                "LNA6213": [{"test_id": "T1", "sequence_order": 1, "is_required": "true"}]
            },
            "test_definitions": [{"test_id": "T1", "test_name": "Wirebond"}],
            "manufacturing_orders": [{
                "manufacturing_order_number": " MO-1 ",
                "device_types": [{"device_type": "LNA6213", "quantity": 4}]
            }]
        }))
        .unwrap();
        let storage = MemoryStorage::from_lab_data(data);

        assert_eq!(storage.list_device_types().await.unwrap(), vec!["LNA6213"]);
        let defs = storage.list_test_definitions().await.unwrap();
        assert_eq!(defs[0].estimated_duration_minutes, 0);
        let mo = storage.get_manufacturing_order("MO-1").await.unwrap();
        assert_eq!(mo.priority, "medium");
        assert_eq!(mo.device_types[0].quantity, 4);
    }

    #[tokio::test]
    async fn lab_data_accepts_null_definition_fields() {
        let data: LabData = serde_json::from_value(serde_json::json!({
            "test_definitions": [{
                "test_id": "T1",
                "test_name": "Wirebond",
                "description": null,
                "estimated_duration_minutes": null
            }]
        }))
        .unwrap();
        let storage = MemoryStorage::from_lab_data(data);

        let defs = storage.list_test_definitions().await.unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].description, "");
        assert_eq!(defs[0].estimated_duration_minutes, 0);
    }

    #[tokio::test]
    async fn orders_without_due_date_sort_last() {
        let storage = MemoryStorage::new();
        for (number, due) in [("MO-3", None), ("MO-2", Some("2026-03-01")), ("MO-1", Some("2026-05-01"))] {
            storage.put_manufacturing_order(ManufacturingOrderRecord {
                manufacturing_order_number: number.to_string(),
                product_name: String::new(),
                priority: "high".to_string(),
                due_date: due.map(str::to_string),
                operator: None,
                device_types: Vec::new(),
            });
        }
        let numbers: Vec<String> = storage
            .list_manufacturing_orders()
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.manufacturing_order_number)
            .collect();
        assert_eq!(numbers, vec!["MO-2", "MO-1", "MO-3"]);
    }
}
